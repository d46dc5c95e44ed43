// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod journal;
pub mod migration_source;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use journal::MigrationJournal;
pub use migration_source::MigrationSource;
pub use time_provider::{SystemTimeProvider, TimeProvider};
