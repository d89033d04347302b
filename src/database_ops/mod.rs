pub mod db;
pub mod field_sync;

pub use db::Db;
