// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid migration version: {0} (expected 14 digits, YYYYMMDDHHMMSS)")]
    InvalidVersion(String),

    #[error("Invalid migration file name: {0} (expected <YYYYMMDDHHMMSS>-<name>.sql)")]
    InvalidMigrationName(String),

    #[error("Duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    #[error("Invalid journal table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid migration name: {0:?} (needs at least one letter or digit)")]
    InvalidMigrationSlug(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
