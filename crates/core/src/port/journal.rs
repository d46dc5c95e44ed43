// Migration Journal Port
//
// Implemented by database adapters. Every method that writes runs inside a
// transaction owned by the adapter; callers never see a half-applied
// migration.

use crate::domain::{JournalRow, MigrationRecord, Version};
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait MigrationJournal: Send + Sync {
    /// Create the journal table if it does not exist (idempotent)
    async fn ensure_journal(&self) -> Result<()>;

    /// Versions recorded in the journal, most recently applied first
    async fn applied_versions(&self) -> Result<Vec<Version>>;

    /// Full journal contents, ascending by version
    async fn journal_rows(&self) -> Result<Vec<JournalRow>>;

    /// Run the migration body and record it under `id`, atomically
    ///
    /// Either both the body's effects and the journal row persist, or
    /// neither does.
    async fn apply(&self, record: &MigrationRecord, id: Uuid) -> Result<()>;

    /// Run every record (body + journal insert) inside one transaction that
    /// is always rolled back. Returns how many records ran successfully,
    /// which on `Ok` is all of them.
    async fn validate(&self, records: &[(MigrationRecord, Uuid)]) -> Result<usize>;
}
