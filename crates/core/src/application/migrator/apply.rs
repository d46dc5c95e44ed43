// Apply / Dry-run Use Cases

use crate::domain::{self, JournalRow, MigrationRecord, Version};
use crate::error::Result;
use crate::port::{IdProvider, MigrationJournal, MigrationSource};
use tracing::{debug, info, warn};

/// Outcome of a successful `migrate` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this run, in apply order
    pub applied: Vec<Version>,
}

/// Outcome of a successful dry run
///
/// `validated` lists the migrations that ran cleanly; `rolled_back` reports
/// that the isolation rollback happened. The two are separate facts: a
/// failing dry run is an `Err`, never a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunReport {
    pub validated: Vec<Version>,
    pub rolled_back: bool,
}

/// Journal contents next to the migrations still waiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: Vec<JournalRow>,
    pub pending: Vec<MigrationRecord>,
}

/// Compute the pending set
///
/// 1. Ensure the journal table exists
/// 2. Read applied versions
/// 3. Load records from the source, refusing duplicate versions
/// 4. Keep records whose version is not in the journal, ascending
pub async fn plan(
    journal: &dyn MigrationJournal,
    source: &dyn MigrationSource,
) -> Result<Vec<MigrationRecord>> {
    journal.ensure_journal().await?;
    let applied = journal.applied_versions().await?;

    let records = source.load().await?;
    domain::reject_duplicate_versions(&records)?;

    let pending: Vec<MigrationRecord> = domain::pending(&records, &applied)
        .into_iter()
        .cloned()
        .collect();

    debug!(
        available = records.len(),
        applied = applied.len(),
        pending = pending.len(),
        "Computed pending migrations"
    );

    Ok(pending)
}

/// Apply pending migrations sequentially
///
/// Each migration runs in its own transaction together with its journal
/// insert. The first failure halts the batch: migrations applied before it
/// stay applied, later ones are not attempted.
pub async fn execute(
    journal: &dyn MigrationJournal,
    source: &dyn MigrationSource,
    id_provider: &dyn IdProvider,
) -> Result<MigrationReport> {
    let pending = plan(journal, source).await?;

    if pending.is_empty() {
        info!("No pending migrations");
        return Ok(MigrationReport::default());
    }

    let mut report = MigrationReport::default();
    for record in &pending {
        let id = id_provider.generate_id();
        if let Err(e) = journal.apply(record, id).await {
            warn!(
                version = %record.version,
                file = %record.file_name,
                applied_before_failure = report.applied.len(),
                error = %e,
                "Migration failed, halting"
            );
            return Err(e);
        }

        info!(version = %record.version, file = %record.file_name, "Applied migration");
        report.applied.push(record.version.clone());
    }

    info!(count = report.applied.len(), "All pending migrations applied");
    Ok(report)
}

/// Validate pending migrations against the real schema without persisting
pub async fn dry_run(
    journal: &dyn MigrationJournal,
    source: &dyn MigrationSource,
    id_provider: &dyn IdProvider,
) -> Result<DryRunReport> {
    let pending = plan(journal, source).await?;

    let batch: Vec<(MigrationRecord, uuid::Uuid)> = pending
        .into_iter()
        .map(|r| (r, id_provider.generate_id()))
        .collect();

    let validated = journal.validate(&batch).await?;
    debug_assert_eq!(validated, batch.len());

    info!(count = validated, "Dry run succeeded, changes rolled back");

    Ok(DryRunReport {
        validated: batch.into_iter().map(|(r, _)| r.version).collect(),
        rolled_back: true,
    })
}

pub async fn status(
    journal: &dyn MigrationJournal,
    source: &dyn MigrationSource,
) -> Result<MigrationStatus> {
    let pending = plan(journal, source).await?;
    let applied = journal.journal_rows().await?;
    Ok(MigrationStatus { applied, pending })
}
