// SQL Migration Journal
//
// Journal table + migration bodies, both run through the query runner so a
// sandboxed or traced runner behaves the same here as anywhere else.

use crate::error::map_sqlx_error;
use crate::runner::QueryRunner;
use crate::value::SqlValue;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use keel_core::classify::DriverFailure;
use keel_core::domain::{JournalRow, JournalTable, MigrationRecord, Version};
use keel_core::error::{AppError, Result};
use keel_core::port::MigrationJournal;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub struct SqlMigrationJournal {
    runner: Arc<QueryRunner>,
    table: JournalTable,
}

impl SqlMigrationJournal {
    pub fn new(runner: Arc<QueryRunner>, table: JournalTable) -> Self {
        Self { runner, table }
    }
}

#[async_trait]
impl MigrationJournal for SqlMigrationJournal {
    async fn ensure_journal(&self) -> Result<()> {
        let ddl = self.runner.dialect().create_journal_sql(&self.table);
        self.runner.execute_script(&ddl).await?;
        debug!(table = %self.table, "Journal table ready");
        Ok(())
    }

    async fn applied_versions(&self) -> Result<Vec<Version>> {
        let sql = self.runner.dialect().select_versions_sql(&self.table);
        let rows = self.runner.query(&sql, &[]).await?;

        rows.iter()
            .map(|row| -> Result<Version> {
                let version: String = row.try_get("version").map_err(map_sqlx_error)?;
                Ok(Version::parse(&version)?)
            })
            .collect()
    }

    async fn journal_rows(&self) -> Result<Vec<JournalRow>> {
        let sql = self.runner.dialect().select_rows_sql(&self.table);
        let rows = self.runner.query(&sql, &[]).await?;
        rows.iter().map(row_to_journal).collect()
    }

    async fn apply(&self, record: &MigrationRecord, id: Uuid) -> Result<()> {
        let insert = self.runner.dialect().insert_journal_sql(&self.table);
        let record = record.clone();

        self.runner
            .transaction(move |tx| Box::pin(async move { run_one(tx, &insert, &record, id).await }))
            .await?;
        Ok(())
    }

    async fn validate(&self, records: &[(MigrationRecord, Uuid)]) -> Result<usize> {
        let insert = self.runner.dialect().insert_journal_sql(&self.table);
        let records = records.to_vec();
        let count = records.len();

        self.runner
            .transaction(move |tx| {
                Box::pin(async move {
                    for (record, id) in &records {
                        run_one(tx, &insert, record, *id).await?;
                    }
                    tx.rollback().await
                })
            })
            .await?;

        debug!(count, "Validated migrations, rolled back");
        Ok(count)
    }
}

/// Migration body followed by its journal row, on the transaction's runner
fn run_one<'a>(
    tx: &'a QueryRunner,
    insert: &'a str,
    record: &'a MigrationRecord,
    id: Uuid,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        tx.execute_script(&record.body).await?;
        let params = [
            SqlValue::from(id),
            SqlValue::from(record.version.as_str()),
            SqlValue::from(record.file_name.as_str()),
            SqlValue::from(record.body.as_str()),
        ];
        tx.execute(insert, &params).await?;
        Ok(())
    })
}

fn row_to_journal(row: &AnyRow) -> Result<JournalRow> {
    let id: String = row.try_get("id").map_err(map_sqlx_error)?;
    let version: String = row.try_get("version").map_err(map_sqlx_error)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_error)?;

    Ok(JournalRow {
        id: Uuid::parse_str(&id)
            .map_err(|e| decode_error(format!("journal id {:?}: {}", id, e)))?,
        version: Version::parse(&version)?,
        file_name: row.try_get("file_name").map_err(map_sqlx_error)?,
        body: row.try_get("query").map_err(map_sqlx_error)?,
        created_at: NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_FORMAT).map_err(|e| {
            decode_error(format!("journal created_at {:?}: {}", created_at, e))
        })?,
    })
}

fn decode_error(message: String) -> AppError {
    AppError::Driver(DriverFailure::new(None, message))
}
