pub mod database;

pub use database::{create_shared_database, Database, DatabaseHandle, SharedDatabase};
