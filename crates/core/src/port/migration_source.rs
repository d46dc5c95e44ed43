// Migration Source Port

use crate::domain::MigrationRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Where migration scripts come from
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Read every available migration record, sorted by file name
    async fn load(&self) -> Result<Vec<MigrationRecord>>;
}
