//! Application error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Transient upstream failure: timeout, connect error, bad gateway.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Transient database failure worth retrying (pool or connection level).
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// Permanent database failure: constraint violation, bad statement.
    #[error("database error: {0}")]
    Database(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    #[allow(dead_code)]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Whether this is a transient network failure the retry policy applies to.
    pub fn is_transient_network(&self) -> bool {
        matches!(self, AppError::Upstream(_))
    }

    /// Whether this is a transient database failure the retry policy applies to.
    pub fn is_transient_database(&self) -> bool {
        matches!(self, AppError::DatabaseUnavailable(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Internal failure classes map to generic messages; detail stays in the logs.
        let (status, error_message) = match &self {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Upstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upstream error".to_string()),
            AppError::Database(_) | AppError::DatabaseUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database error".to_string())
            }
            AppError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache error".to_string()),
            AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => AppError::DatabaseUnavailable(err.to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AppError::Upstream("timed out".into()).is_transient_network());
        assert!(!AppError::Database("duplicate key".into()).is_transient_network());

        assert!(AppError::DatabaseUnavailable("pool timed out".into()).is_transient_database());
        assert!(!AppError::Database("duplicate key".into()).is_transient_database());
        assert!(!AppError::Upstream("timed out".into()).is_transient_database());
    }

    #[test]
    fn pool_errors_map_to_transient() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient_database());

        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_transient_database());
    }
}
