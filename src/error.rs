//! Unified error handling for the Paygrid backend
//!
//! Module errors convert into [`AppError`], which carries the HTTP status,
//! a stable machine-readable [`ErrorCode`] and a user-facing message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by API clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "UNSUPPORTED_METHOD")]
    UnsupportedMethod,
    #[serde(rename = "FRAUD_SUSPECTED")]
    FraudSuspected,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "INVALID_TRANSACTIONS")]
    InvalidTransactions,
    #[serde(rename = "ALL_PAYMENT_METHODS_FAILED")]
    AllPaymentMethodsFailed,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "INVALID_CURRENCY")]
    InvalidCurrency,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "STORAGE_ERROR")]
    StorageError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "FRAUD_SCREEN_UNAVAILABLE")]
    FraudScreenUnavailable,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No processor or routing support for the requested method
    UnsupportedMethod { method: String },
    /// Fraud screen flagged the payment; needs manual review
    FraudSuspected { risk_score: f64, reason: String },
    /// Transaction with given ID doesn't exist
    TransactionNotFound { transaction_id: String },
    /// Offline sync batch rejected as a whole
    InvalidTransactions { reason: String },
    /// Every method in a fallback sequence failed
    AllPaymentMethodsFailed { attempted: Vec<String> },
}

/// Infrastructure-level errors (database, cache, durable stores, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Storage { message: String },
    Configuration { message: String },
}

/// External collaborator errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Processor adapter error
    PaymentProcessor {
        processor: String,
        message: String,
        is_retryable: bool,
    },
    /// Fraud screen could not produce an assessment
    FraudScreen { message: String },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn not_found(transaction_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
            transaction_id: transaction_id.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UnsupportedMethod { .. } => 422,
                DomainError::FraudSuspected { .. } => 403,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::InvalidTransactions { .. } => 400,
                DomainError::AllPaymentMethodsFailed { .. } => 402,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor { .. } => 502,
                ExternalError::FraudScreen { .. } => 503,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UnsupportedMethod { .. } => ErrorCode::UnsupportedMethod,
                DomainError::FraudSuspected { .. } => ErrorCode::FraudSuspected,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::InvalidTransactions { .. } => ErrorCode::InvalidTransactions,
                DomainError::AllPaymentMethodsFailed { .. } => ErrorCode::AllPaymentMethodsFailed,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Storage { .. } => ErrorCode::StorageError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor { .. } => ErrorCode::PaymentProviderError,
                ExternalError::FraudScreen { .. } => ErrorCode::FraudScreenUnavailable,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { .. } => ErrorCode::InvalidCurrency,
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UnsupportedMethod { method } => {
                    format!("Payment method '{}' is not supported", method)
                }
                DomainError::FraudSuspected { .. } => {
                    "Payment was flagged for review and cannot be processed".to_string()
                }
                DomainError::TransactionNotFound { transaction_id } => {
                    format!("Transaction '{}' not found", transaction_id)
                }
                DomainError::InvalidTransactions { reason } => {
                    format!("Invalid transaction batch: {}", reason)
                }
                DomainError::AllPaymentMethodsFailed { attempted } => {
                    format!(
                        "All payment methods failed ({})",
                        attempted.join(", ")
                    )
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor {
                    processor,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment processor ({}) is temporarily unavailable. Please try again",
                            processor
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::FraudScreen { .. } => {
                    "Payment screening is temporarily unavailable. Please try again".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Storage { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor { is_retryable, .. } => *is_retryable,
                ExternalError::FraudScreen { .. } => true,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraud_suspected_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::FraudSuspected {
            risk_score: 0.92,
            reason: "velocity".to_string(),
        }));

        assert_eq!(error.status_code(), 403);
        assert_eq!(error.error_code(), ErrorCode::FraudSuspected);
        assert!(!error.is_retryable());
        // screening internals stay out of the client message
        assert!(!error.user_message().contains("velocity"));
    }

    #[test]
    fn test_unsupported_method_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::UnsupportedMethod {
            method: "paypal".to_string(),
        }));

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::UnsupportedMethod);
        assert!(error.user_message().contains("paypal"));
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "knowledge".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAmount);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::AllPaymentMethodsFailed).unwrap();
        assert_eq!(json, "\"ALL_PAYMENT_METHODS_FAILED\"");
    }
}
