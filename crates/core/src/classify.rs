// Driver Error Classifier
//
// Maps raw database failures onto domain error kinds. Adapters build a
// `DriverFailure` from their driver's error and call `classify` at the point
// of query execution, so a transaction body sees the specific kind before
// the transaction unwinds.

use crate::error::AppError;
use std::fmt;

/// Postgres SQLSTATE for unique_violation
pub const PG_UNIQUE_VIOLATION: &str = "23505";
/// Postgres SQLSTATE for invalid_text_representation
pub const PG_INVALID_TEXT_REPRESENTATION: &str = "22P02";
/// SQLite extended codes: SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
pub const SQLITE_UNIQUE_CODES: [&str; 2] = ["2067", "1555"];

/// Both spellings are recognised; older server versions used the second one.
const BAD_UUID_MESSAGES: [&str; 2] = [
    "invalid input syntax for type uuid",
    "invalid input syntax for uuid",
];

/// Raw failure reported by the database driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverFailure {
    pub code: Option<String>,
    pub message: String,
}

impl DriverFailure {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Classify a driver failure into a domain error
pub fn classify(failure: DriverFailure) -> AppError {
    let Some(code) = failure.code.as_deref() else {
        return AppError::Driver(failure);
    };

    if code == PG_UNIQUE_VIOLATION || SQLITE_UNIQUE_CODES.contains(&code) {
        return AppError::DuplicateEntry(failure);
    }

    if code == PG_INVALID_TEXT_REPRESENTATION && is_bad_uuid_message(&failure.message) {
        return AppError::BadUuid(failure);
    }

    AppError::Driver(failure)
}

fn is_bad_uuid_message(message: &str) -> bool {
    BAD_UUID_MESSAGES.iter().any(|m| message.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn failure(code: Option<&str>, message: &str) -> DriverFailure {
        DriverFailure::new(code.map(str::to_string), message)
    }

    #[test]
    fn test_postgres_unique_violation() {
        let err = classify(failure(
            Some("23505"),
            "duplicate key value violates unique constraint \"users_email_key\"",
        ));
        assert!(matches!(err, AppError::DuplicateEntry(_)));
        assert_eq!(err.kind(), ErrorKind::DomainData);
    }

    #[test]
    fn test_sqlite_unique_violation() {
        for code in ["2067", "1555"] {
            let err = classify(failure(Some(code), "UNIQUE constraint failed: users.email"));
            assert!(matches!(err, AppError::DuplicateEntry(_)), "code {code}");
        }
    }

    #[test]
    fn test_bad_uuid_both_messages() {
        let current = classify(failure(
            Some("22P02"),
            "invalid input syntax for type uuid: \"abc\"",
        ));
        let legacy = classify(failure(Some("22P02"), "invalid input syntax for uuid: \"abc\""));

        assert!(matches!(current, AppError::BadUuid(_)));
        assert!(matches!(legacy, AppError::BadUuid(_)));
    }

    #[test]
    fn test_invalid_text_other_type_passes_through() {
        let err = classify(failure(
            Some("22P02"),
            "invalid input syntax for type integer: \"x\"",
        ));
        assert!(matches!(err, AppError::Driver(_)));
    }

    #[test]
    fn test_unknown_code_passes_through_unchanged() {
        let err = classify(failure(Some("42704"), "type \"nope\" does not exist"));
        match err {
            AppError::Driver(f) => {
                assert_eq!(f.code.as_deref(), Some("42704"));
                assert_eq!(f.message, "type \"nope\" does not exist");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_missing_code_passes_through() {
        let err = classify(failure(None, "something broke"));
        assert!(matches!(err, AppError::Driver(_)));
    }
}
