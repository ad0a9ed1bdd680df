use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

// SQLite primary/extended result codes treated as transient contention
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";
const SQLITE_LOCKED_SHAREDCACHE: &str = "262";
const SQLITE_BUSY_RECOVERY: &str = "261";
const SQLITE_BUSY_SNAPSHOT: &str = "517";
const SQLITE_BUSY_TIMEOUT: &str = "773";

#[derive(Debug)]
pub enum AppError {
    Database(anyhow::Error),
    DatabaseError(String),
    NotFound(String),
    InvalidState(String),
    /// Transient contention on an aggregate row or the storage lock.
    /// Retried inside the engine; callers only see it from the `_tx` layer.
    Conflict(String),
    Unavailable(String),
    Internal(String),
    ConfigurationError(String),
}

impl AppError {
    /// Whether the failed unit of work may be retried as a whole.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(err) => write!(f, "Database error: {}", err),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Database(err) => {
                tracing::error!("Database error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidState(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::ConfigurationError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => {
                AppError::Unavailable("Timed out waiting for a database connection".to_string())
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                let busy = matches!(
                    code.as_deref(),
                    Some(SQLITE_BUSY)
                        | Some(SQLITE_LOCKED)
                        | Some(SQLITE_LOCKED_SHAREDCACHE)
                        | Some(SQLITE_BUSY_RECOVERY)
                        | Some(SQLITE_BUSY_SNAPSHOT)
                        | Some(SQLITE_BUSY_TIMEOUT)
                );
                if busy || db_err.is_unique_violation() {
                    AppError::Conflict(db_err.message().to_string())
                } else {
                    AppError::DatabaseError(err.to_string())
                }
            }
            _ => AppError::DatabaseError(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
