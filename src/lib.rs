pub mod cli;
pub mod csv_ops;
pub mod database_ops;

pub mod util {
    pub mod env;
}
