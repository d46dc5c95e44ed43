// Migrator Service - Core use cases for schema migrations

pub mod apply;


pub use apply::{DryRunReport, MigrationReport, MigrationStatus};

use crate::domain::MigrationRecord;
use crate::error::Result;
use crate::port::{IdProvider, MigrationJournal, MigrationSource};
use std::sync::Arc;

/// Migrator
///
/// Wires a migration source to a journal. Each call recomputes the pending
/// set from the journal; nothing is cached between runs.
pub struct Migrator {
    journal: Arc<dyn MigrationJournal>,
    source: Arc<dyn MigrationSource>,
    id_provider: Arc<dyn IdProvider>,
}

impl Migrator {
    pub fn new(
        journal: Arc<dyn MigrationJournal>,
        source: Arc<dyn MigrationSource>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            journal,
            source,
            id_provider,
        }
    }

    /// Apply every pending migration, one transaction each
    pub async fn migrate(&self) -> Result<MigrationReport> {
        apply::execute(
            self.journal.as_ref(),
            self.source.as_ref(),
            self.id_provider.as_ref(),
        )
        .await
    }

    /// Run every pending migration inside one transaction, then roll back
    pub async fn dry_run(&self) -> Result<DryRunReport> {
        apply::dry_run(
            self.journal.as_ref(),
            self.source.as_ref(),
            self.id_provider.as_ref(),
        )
        .await
    }

    /// Applied journal rows and pending records
    pub async fn status(&self) -> Result<MigrationStatus> {
        apply::status(self.journal.as_ref(), self.source.as_ref()).await
    }

    /// Pending records, ascending by version
    pub async fn pending(&self) -> Result<Vec<MigrationRecord>> {
        apply::plan(self.journal.as_ref(), self.source.as_ref()).await
    }
}
