// Central Error Type for the Application

use crate::classify::DriverFailure;
use thiserror::Error;

/// Application-level error type
///
/// Every failure a runner, journal or migrator can produce is one of these
/// variants. Callers outside the crate match on [`AppError::kind`] rather
/// than on message text.
#[derive(Error, Debug)]
pub enum AppError {
    /// Misuse of the runner state machine (nested transaction, close inside
    /// a transaction, raw ROLLBACK, rollback outside a transaction)
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(DriverFailure),

    #[error("Bad UUID: {0}")]
    BadUuid(DriverFailure),

    /// Unclassified database error, message passed through untouched
    #[error("{0}")]
    Driver(DriverFailure),

    /// A transaction body failed and the transaction was rolled back
    #[error("Transaction rolled back: {0}")]
    Transaction(#[source] Box<AppError>),

    /// Control signal raised by `rollback()`; consumed by `transaction()`
    #[error("Transaction rolled back manually")]
    ManualRollback,

    /// Pool, I/O or protocol failure below the SQL layer
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`AppError`], used at process boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IllegalState,
    DomainData,
    Transaction,
    Driver,
    Connection,
    Config,
    Domain,
    Io,
}

impl AppError {
    /// Wrap an error that caused a transaction to roll back
    pub fn transaction(cause: AppError) -> Self {
        AppError::Transaction(Box::new(cause))
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        AppError::IllegalState(msg.into())
    }

    pub fn is_manual_rollback(&self) -> bool {
        matches!(self, AppError::ManualRollback)
    }

    /// The innermost error, with every `Transaction` layer peeled off
    pub fn root(&self) -> &AppError {
        let mut current = self;
        while let AppError::Transaction(inner) = current {
            current = inner;
        }
        current
    }

    /// The driver message of the root cause, if it came from the database
    pub fn driver_message(&self) -> Option<&str> {
        match self.root() {
            AppError::DuplicateEntry(f) | AppError::BadUuid(f) | AppError::Driver(f) => {
                Some(f.message.as_str())
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::IllegalState(_) | AppError::ManualRollback => ErrorKind::IllegalState,
            AppError::DuplicateEntry(_) | AppError::BadUuid(_) => ErrorKind::DomainData,
            AppError::Driver(_) => ErrorKind::Driver,
            AppError::Transaction(_) => ErrorKind::Transaction,
            AppError::Connection(_) => ErrorKind::Connection,
            AppError::Config(_) => ErrorKind::Config,
            AppError::Domain(_) => ErrorKind::Domain,
            AppError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<::config::ConfigError> for AppError {
    fn from(err: ::config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}
