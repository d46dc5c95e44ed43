// sqlx::Error -> AppError
//
// Database errors go through the core classifier; everything below the SQL
// layer (pool, I/O, TLS, protocol) becomes `AppError::Connection`.

use keel_core::classify::{classify, DriverFailure};
use keel_core::error::AppError;

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned());
            classify(DriverFailure::new(code, db_err.message()))
        }
        sqlx::Error::RowNotFound => AppError::Driver(DriverFailure::new(None, "Row not found")),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Driver(DriverFailure::new(None, format!("Column not found: {}", col)))
        }
        err @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }) => {
            AppError::Driver(DriverFailure::new(None, err.to_string()))
        }
        sqlx::Error::PoolTimedOut => {
            AppError::Connection("timed out waiting for a pooled connection".to_string())
        }
        sqlx::Error::PoolClosed => AppError::Connection("connection pool is closed".to_string()),
        other => AppError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connection_errors() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            AppError::Connection(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            AppError::Connection(_)
        ));
    }

    #[test]
    fn test_row_not_found_is_driver_error() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert_eq!(err.driver_message(), Some("Row not found"));
    }
}
