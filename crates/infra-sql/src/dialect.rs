// SQL Dialects
//
// Only the journal DDL/DML differs between engines. Placeholders are `$n`
// on both.

use keel_core::domain::JournalTable;
use keel_core::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Pick the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(AppError::Config(format!(
                "unsupported database URL scheme: {:?}",
                other
            ))),
        }
    }

    /// Value for the `db.system` span field
    pub fn system(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::Sqlite => "sqlite",
        }
    }

    pub fn create_journal_sql(&self, table: &JournalTable) -> String {
        let (id_type, now) = match self {
            Dialect::Postgres => ("UUID", "NOW()"),
            Dialect::Sqlite => ("TEXT", "CURRENT_TIMESTAMP"),
        };
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id {id_type} PRIMARY KEY,
                version VARCHAR(14) NOT NULL UNIQUE,
                file_name VARCHAR(255) NOT NULL,
                query TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT {now}
            )
            "#
        )
    }

    pub fn insert_journal_sql(&self, table: &JournalTable) -> String {
        let id = match self {
            Dialect::Postgres => "CAST($1 AS UUID)",
            Dialect::Sqlite => "$1",
        };
        format!("INSERT INTO {table} (id, version, file_name, query) VALUES ({id}, $2, $3, $4)")
    }

    pub fn select_versions_sql(&self, table: &JournalTable) -> String {
        format!("SELECT version FROM {table} ORDER BY created_at DESC, version DESC")
    }

    pub fn select_rows_sql(&self, table: &JournalTable) -> String {
        format!(
            r#"
            SELECT CAST(id AS TEXT) AS id, version, file_name, query,
                   CAST(created_at AS TEXT) AS created_at
            FROM {table}
            ORDER BY version ASC
            "#
        )
    }
}
