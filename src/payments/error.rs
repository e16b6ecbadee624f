use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Unsupported currency: {currency}")]
    InvalidCurrency { currency: String },

    #[error("Unsupported payment method: {method}")]
    UnsupportedMethod { method: String },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Processor {processor} timed out after {timeout_secs}s")]
    Timeout { processor: String, timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Processor error: processor={processor}, message={message}")]
    ProcessorError {
        processor: String,
        message: String,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::InvalidCurrency { .. } => false,
            PaymentError::UnsupportedMethod { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::ProcessorError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::InvalidCurrency { .. } => 400,
            PaymentError::UnsupportedMethod { .. } => 422,
            PaymentError::PaymentDeclinedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::Timeout { .. } => 504,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::ProcessorError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::InvalidCurrency { currency } => {
                format!("Currency '{}' is not supported", currency)
            }
            PaymentError::UnsupportedMethod { method } => {
                format!("Payment method '{}' is not supported", method)
            }
            PaymentError::PaymentDeclinedError { .. } => {
                "Payment was declined by the processor".to_string()
            }
            PaymentError::NetworkError { .. } | PaymentError::Timeout { .. } => {
                "Payment processor is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment processor. Please retry shortly".to_string()
            }
            PaymentError::ProcessorError { .. } => {
                "Payment processor returned an error".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};

        let message = err.to_string();
        let is_retryable = err.is_retryable();
        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::InvalidCurrency { currency } => {
                AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency,
                    reason: "currency is not in the supported set".to_string(),
                })
            }
            PaymentError::UnsupportedMethod { method } => {
                AppErrorKind::Domain(DomainError::UnsupportedMethod { method })
            }
            PaymentError::Timeout {
                processor,
                timeout_secs,
            } => AppErrorKind::External(ExternalError::Timeout {
                service: processor,
                timeout_secs,
            }),
            PaymentError::ProcessorError { processor, .. } => {
                AppErrorKind::External(ExternalError::PaymentProcessor {
                    processor,
                    message,
                    is_retryable,
                })
            }
            _ => AppErrorKind::External(ExternalError::PaymentProcessor {
                processor: "payments".to_string(),
                message,
                is_retryable,
            }),
        };

        AppError::new(kind)
    }
}
