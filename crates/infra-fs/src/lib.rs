// Keel Infrastructure - Filesystem Adapters
// Implements: MigrationSource

pub mod migration_dir;

pub use migration_dir::FsMigrationSource;
