// Journal Domain Model
//
// The journal table is the single source of truth for "already applied".

use super::error::{DomainError, Result};
use super::migration::Version;
use chrono::NaiveDateTime;
use std::fmt;
use uuid::Uuid;

/// Default journal table name
pub const DEFAULT_JOURNAL_TABLE: &str = "migrations";

/// Postgres truncates identifiers beyond this
const MAX_IDENTIFIER_LEN: usize = 63;

/// One applied migration, as stored in the journal table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRow {
    pub id: Uuid,
    pub version: Version,
    pub file_name: String,
    pub body: String,
    pub created_at: NaiveDateTime,
}

/// Validated journal table identifier
///
/// The name is interpolated into DDL and DML, so only plain identifiers are
/// accepted: `table` or `schema.table`, each part `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalTable(String);

impl JournalTable {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut parts = name.split('.');
        let valid = match (parts.next(), parts.next(), parts.next()) {
            (Some(table), None, None) => is_identifier(table),
            (Some(schema), Some(table), None) => is_identifier(schema) && is_identifier(table),
            _ => false,
        };

        if valid {
            Ok(Self(name))
        } else {
            Err(DomainError::InvalidTableName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JournalTable {
    fn default() -> Self {
        Self(DEFAULT_JOURNAL_TABLE.to_string())
    }
}

impl fmt::Display for JournalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
