pub mod csv_rewrite;
pub mod db_sync;
