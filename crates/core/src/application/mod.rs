// Application Layer - Use Cases

pub mod migrator;

// Re-exports
pub use migrator::{DryRunReport, MigrationReport, MigrationStatus, Migrator};
