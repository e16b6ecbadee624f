//! Cache-specific error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis unavailable, pool exhausted or the connection dropped
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    #[error("Cache operation error: {0}")]
    OperationError(String),
}

impl CacheError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::ConnectionError(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
            CacheError::ConnectionError(err.to_string())
        } else {
            CacheError::OperationError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        CacheError::ConnectionError(format!("pool: {}", err))
    }
}

impl From<CacheError> for crate::error::AppError {
    fn from(err: CacheError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache {
            message: err.to_string(),
        }))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_retryable() {
        assert!(CacheError::ConnectionError("refused".to_string()).is_retryable());
        assert!(!CacheError::SerializationError("bad json".to_string()).is_retryable());
    }
}
