// Migration Domain Model

use super::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;

/// File extension of migration scripts (without the dot)
pub const MIGRATION_EXTENSION: &str = "sql";

const VERSION_LEN: usize = 14;
const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// Migration version: fixed-width `YYYYMMDDHHMMSS` timestamp
///
/// Fixed width and zero padding make lexicographic order chronological, so
/// the derived `Ord` on the inner string is the apply order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(String);

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() == VERSION_LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(DomainError::InvalidVersion(s.to_string()))
        }
    }

    /// Version for a point in time; sub-second precision and zone are dropped
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format(VERSION_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A migration script read from the migration directory
///
/// Immutable once read; identity is the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub version: Version,
    pub file_name: String,
    pub body: String,
}

impl MigrationRecord {
    /// Build a record from `<YYYYMMDDHHMMSS>-<name>.sql` and its contents
    pub fn from_file(file_name: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        let file_name = file_name.into();
        let invalid = || DomainError::InvalidMigrationName(file_name.clone());

        let stem = file_name
            .strip_suffix(MIGRATION_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(invalid)?;

        let (prefix, name) = stem.split_once('-').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        let version = Version::parse(prefix).map_err(|_| invalid())?;

        Ok(Self {
            version,
            file_name,
            body: body.into(),
        })
    }

    /// File name for a new migration created at `at`
    pub fn file_name_for(at: DateTime<Utc>, slug: &str) -> String {
        format!(
            "{}-{}.{}",
            Version::from_datetime(at),
            slug,
            MIGRATION_EXTENSION
        )
    }
}

/// Migrations not yet recorded in the journal, ascending by version
pub fn pending<'a>(
    records: &'a [MigrationRecord],
    applied: &[Version],
) -> Vec<&'a MigrationRecord> {
    let applied: HashSet<&Version> = applied.iter().collect();
    let mut out: Vec<&MigrationRecord> = records
        .iter()
        .filter(|r| !applied.contains(&r.version))
        .collect();
    out.sort_by(|a, b| a.version.cmp(&b.version));
    out
}

/// Two files sharing a version would be ambiguous to apply; refuse the set
pub fn reject_duplicate_versions(records: &[MigrationRecord]) -> Result<()> {
    let mut seen: Vec<&MigrationRecord> = Vec::with_capacity(records.len());
    for record in records {
        if let Some(first) = seen.iter().find(|r| r.version == record.version) {
            return Err(DomainError::DuplicateVersion {
                version: record.version.to_string(),
                first: first.file_name.clone(),
                second: record.file_name.clone(),
            });
        }
        seen.push(record);
    }
    Ok(())
}

/// Normalise a human migration name into a file-name slug
///
/// Lowercases ASCII letters and collapses every run of other characters
/// into a single `-`.
pub fn slugify(name: &str) -> Result<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        return Err(DomainError::InvalidMigrationSlug(name.to_string()));
    }
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(file_name: &str) -> MigrationRecord {
        MigrationRecord::from_file(file_name, "SELECT 1;").unwrap()
    }

    fn version(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_parse() {
        assert!(Version::parse("20200511072746").is_ok());
        assert!(Version::parse("2020051107274").is_err());
        assert!(Version::parse("202005110727461").is_err());
        assert!(Version::parse("2020051107274a").is_err());
    }

    #[test]
    fn test_version_from_datetime_strips_millis() {
        let at = Utc
            .with_ymd_and_hms(2020, 5, 11, 7, 27, 46)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(123))
            .unwrap();
        assert_eq!(Version::from_datetime(at).as_str(), "20200511072746");
    }

    #[test]
    fn test_record_from_file() {
        let r = MigrationRecord::from_file("20200511072746-create-users.sql", "CREATE TABLE t ();")
            .unwrap();
        assert_eq!(r.version.as_str(), "20200511072746");
        assert_eq!(r.file_name, "20200511072746-create-users.sql");
        assert_eq!(r.body, "CREATE TABLE t ();");
    }

    #[test]
    fn test_record_rejects_bad_names() {
        for name in [
            "20200511072746.sql",
            "20200511072746-.sql",
            "2020051107274-short.sql",
            "20200511072746-users.txt",
            "create-users.sql",
        ] {
            assert!(
                matches!(
                    MigrationRecord::from_file(name, ""),
                    Err(DomainError::InvalidMigrationName(_))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_pending_excludes_applied_and_sorts() {
        let records = vec![
            record("20200511073458-c.sql"),
            record("20200511072746-a.sql"),
            record("20200511073348-b.sql"),
        ];
        let applied = vec![version("20200511072746")];

        let pending: Vec<&str> = pending(&records, &applied)
            .iter()
            .map(|r| r.version.as_str())
            .collect();

        assert_eq!(pending, vec!["20200511073348", "20200511073458"]);
    }

    #[test]
    fn test_pending_empty_journal_is_everything() {
        let records = vec![record("20200511072746-a.sql"), record("20200511073348-b.sql")];
        assert_eq!(pending(&records, &[]).len(), 2);
    }

    #[test]
    fn test_pending_ignores_unknown_applied_versions() {
        let records = vec![record("20200511072746-a.sql")];
        let applied = vec![version("20190101000000"), version("20200511072746")];
        assert!(pending(&records, &applied).is_empty());
    }

    #[test]
    fn test_duplicate_versions_rejected() {
        let records = vec![
            record("20200511072746-a.sql"),
            record("20200511072746-b.sql"),
        ];
        let err = reject_duplicate_versions(&records).unwrap_err();
        assert_eq!(
            err,
            DomainError::DuplicateVersion {
                version: "20200511072746".to_string(),
                first: "20200511072746-a.sql".to_string(),
                second: "20200511072746-b.sql".to_string(),
            }
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Create Users").unwrap(), "create-users");
        assert_eq!(slugify("  add__email--index ").unwrap(), "add-email-index");
        assert_eq!(slugify("v2").unwrap(), "v2");
        assert!(slugify(" -- ").is_err());
    }

    #[test]
    fn test_file_name_for() {
        let at = Utc.with_ymd_and_hms(2020, 5, 11, 7, 33, 48).unwrap();
        assert_eq!(
            MigrationRecord::file_name_for(at, "add-index"),
            "20200511073348-add-index.sql"
        );
    }
}
