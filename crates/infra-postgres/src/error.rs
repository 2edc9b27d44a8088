// sqlx error mapping
//
// Orphan rules prevent `From<sqlx::Error> for EngineError` here, so
// every query goes through this helper.

use queue_sdk_core::port::EngineError;

/// Convert sqlx::Error to EngineError with the Postgres error class attached
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // https://www.postgresql.org/docs/current/errcodes-appendix.html
            Some("23505") => EngineError::Database(format!(
                "Unique constraint violation: {}",
                db_err.message()
            )),
            Some("23503") => EngineError::Database(format!(
                "Foreign key constraint violation: {}",
                db_err.message()
            )),
            Some("40001") | Some("40P01") => EngineError::Database(format!(
                "Transaction conflict: {}",
                db_err.message()
            )),
            Some("57P01") | Some("57P02") | Some("57P03") => {
                EngineError::Unavailable(format!("Server shutting down: {}", db_err.message()))
            }
            Some("28P01") | Some("28000") => {
                EngineError::Unavailable(format!("Authentication failed: {}", db_err.message()))
            }
            Some(code) => {
                EngineError::Database(format!("Database error [{}]: {}", code, db_err.message()))
            }
            None => EngineError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::PoolTimedOut => {
            EngineError::Unavailable("Timed out waiting for a database connection".to_string())
        }
        sqlx::Error::PoolClosed => EngineError::Unavailable("Connection pool closed".to_string()),
        sqlx::Error::Io(e) => EngineError::Unavailable(format!("I/O error: {}", e)),
        sqlx::Error::Tls(e) => EngineError::Unavailable(format!("TLS error: {}", e)),
        sqlx::Error::RowNotFound => EngineError::NotFound("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            EngineError::Internal(format!("Column not found: {}", col))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            EngineError::Internal(format!("Failed to decode column {}: {}", index, source))
        }
        _ => EngineError::Database(err.to_string()),
    }
}
