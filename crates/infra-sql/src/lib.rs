// Keel Infrastructure - SQL Adapter
// Implements: QueryRunner (transactions, sandbox savepoints), MigrationJournal

mod connection;
mod dialect;
mod error;
mod journal;
mod runner;
mod transaction;
mod value;

pub use connection::create_pool;
pub use dialect::Dialect;
pub use journal::SqlMigrationJournal;
pub use runner::QueryRunner;
pub use value::SqlValue;

// Rows come back as the driver's own type; re-exported so callers can decode
// without naming sqlx themselves.
pub use sqlx::any::AnyRow;
pub use sqlx::Row;
