// Domain Layer - Pure business logic and entities

pub mod error;
pub mod journal;
pub mod migration;

// Re-exports
pub use error::DomainError;
pub use journal::{JournalRow, JournalTable};
pub use migration::{
    pending, reject_duplicate_versions, slugify, MigrationRecord, Version, MIGRATION_EXTENSION,
};
