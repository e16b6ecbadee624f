//! Offline payment capture and settlement
//!
//! Capture issues a signed, channel-specific token (USSD code, SMS code or
//! sealed QR payload) and records the transaction as pending. Sync later
//! verifies batches of captured transactions and commits each one exactly
//! once to the processed store.
//!
//! Lifecycle is one-directional: `pending -> completed` through sync, or
//! `pending -> expired` once `expires_at` has passed. Expiry is computed on
//! read and nothing is ever deleted.

pub mod capture;
pub mod signing;
pub mod store;
pub mod sync;

pub use capture::{CaptureReceipt, CaptureRequest, OfflineCaptureService, StatusReport};
pub use signing::{AesGcmEnvelope, HmacSigner, PayloadCipher, PayloadSigner, SignedPayload};
pub use store::{InMemoryOfflineStore, JournalOfflineStore, OfflineStore};
pub use sync::{OfflineSyncService, SyncErrorCode, SyncRecord, SyncReport, SyncResult, SyncStatus};

use crate::config::{env_parse, ConfigError};
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError};
use crate::payments::types::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEV_SIGNING_KEY: &str = "paygrid-dev-signing-key";
const DEV_QR_KEY: &str = "7061796772696420646576207172206b65792030303030303030303030303030";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct OfflineConfig {
    pub ussd_ttl: Duration,
    pub sms_ttl: Duration,
    pub qr_ttl: Duration,
    pub ussd_prefix: String,
    pub sms_shortcode: String,
    pub signing_key: String,
    /// AES-256 key for QR payloads, 64 hex characters
    pub qr_key: String,
    /// Durable journal location; `None` keeps offline state in memory only
    pub journal_path: Option<PathBuf>,
    pub default_merchant: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            ussd_ttl: Duration::from_secs(15 * 60),
            sms_ttl: Duration::from_secs(30 * 60),
            qr_ttl: Duration::from_secs(60 * 60),
            ussd_prefix: "*123".to_string(),
            sms_shortcode: "12345".to_string(),
            signing_key: DEV_SIGNING_KEY.to_string(),
            qr_key: DEV_QR_KEY.to_string(),
            journal_path: None,
            default_merchant: "UNKNOWN".to_string(),
        }
    }
}

impl OfflineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let development = environment == "development" || environment == "test";
        let secret = |key: &str, default: String| match std::env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ if development => Ok(default),
            _ => Err(ConfigError::MissingVariable(key.to_string())),
        };
        let signing_key = secret("OFFLINE_SIGNING_KEY", defaults.signing_key)?;
        let qr_key = secret("OFFLINE_QR_KEY", defaults.qr_key)?;

        Ok(Self {
            ussd_ttl: Duration::from_secs(env_parse(
                "OFFLINE_USSD_TTL_SECS",
                defaults.ussd_ttl.as_secs(),
            )?),
            sms_ttl: Duration::from_secs(env_parse(
                "OFFLINE_SMS_TTL_SECS",
                defaults.sms_ttl.as_secs(),
            )?),
            qr_ttl: Duration::from_secs(env_parse(
                "OFFLINE_QR_TTL_SECS",
                defaults.qr_ttl.as_secs(),
            )?),
            ussd_prefix: std::env::var("OFFLINE_USSD_PREFIX").unwrap_or(defaults.ussd_prefix),
            sms_shortcode: std::env::var("OFFLINE_SMS_SHORTCODE")
                .unwrap_or(defaults.sms_shortcode),
            signing_key,
            qr_key,
            journal_path: std::env::var("OFFLINE_JOURNAL_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            default_merchant: std::env::var("OFFLINE_DEFAULT_MERCHANT")
                .unwrap_or(defaults.default_merchant),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_key.len() < 16 {
            return Err(ConfigError::InvalidValue(
                "OFFLINE_SIGNING_KEY must be at least 16 bytes".to_string(),
            ));
        }
        if !matches!(hex::decode(&self.qr_key), Ok(key) if key.len() == 32) {
            return Err(ConfigError::InvalidValue(
                "OFFLINE_QR_KEY must be 64 hex characters (32 bytes)".to_string(),
            ));
        }
        if self.ussd_ttl.is_zero() || self.sms_ttl.is_zero() || self.qr_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "offline transaction TTLs must be greater than 0".to_string(),
            ));
        }
        if !self.ussd_prefix.starts_with('*') {
            return Err(ConfigError::InvalidValue(
                "OFFLINE_USSD_PREFIX must start with '*'".to_string(),
            ));
        }
        if self.default_merchant.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "OFFLINE_DEFAULT_MERCHANT cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self, channel: OfflineChannel) -> Duration {
        match channel {
            OfflineChannel::Ussd => self.ussd_ttl,
            OfflineChannel::Sms => self.sms_ttl,
            OfflineChannel::Qr => self.qr_ttl,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

pub type OfflineResult<T> = Result<T, OfflineError>;

#[derive(Debug, Clone, Error)]
pub enum OfflineError {
    #[error("No valid transactions to sync")]
    EmptyBatch,

    #[error("Invalid {field}: {reason}")]
    InvalidRequest { field: String, reason: String },

    #[error("Offline store error: {message}")]
    Store { message: String },

    #[error("Payload sealing failed: {message}")]
    Sealing { message: String },
}

impl OfflineError {
    pub fn store(message: impl fmt::Display) -> Self {
        OfflineError::Store {
            message: message.to_string(),
        }
    }
}

impl From<OfflineError> for AppError {
    fn from(err: OfflineError) -> Self {
        let kind = match err {
            OfflineError::EmptyBatch => AppErrorKind::Domain(DomainError::InvalidTransactions {
                reason: "No valid transactions to sync".to_string(),
            }),
            OfflineError::InvalidRequest { field, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidField { field, reason })
            }
            OfflineError::Store { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Storage { message })
            }
            OfflineError::Sealing { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
        };
        AppError::new(kind)
    }
}

// ============================================================================
// Shared types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineChannel {
    Ussd,
    Sms,
    Qr,
}

impl OfflineChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineChannel::Ussd => "ussd",
            OfflineChannel::Sms => "sms",
            OfflineChannel::Qr => "qr",
        }
    }
}

impl fmt::Display for OfflineChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineStatus {
    Pending,
    Completed,
    Expired,
    NotFound,
}

impl OfflineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OfflineStatus::Completed | OfflineStatus::Expired)
    }
}

/// A captured transaction waiting for sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineTransaction {
    pub id: String,
    pub amount: f64,
    pub currency: Currency,
    pub customer_ref: Option<String>,
    pub merchant: String,
    pub channel: OfflineChannel,
    /// USSD code, SMS code or sealed QR content
    pub code: String,
    /// Signed timestamp, milliseconds since the epoch
    pub timestamp: i64,
    pub signature: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl OfflineTransaction {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> OfflineStatus {
        if self.is_expired_at(now) {
            OfflineStatus::Expired
        } else {
            OfflineStatus::Pending
        }
    }

    pub fn payload(&self) -> SignedPayload {
        SignedPayload {
            id: self.id.clone(),
            amount: self.amount,
            currency: self.currency,
            merchant: self.merchant.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Presence in the processed store means the transaction was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTransaction {
    pub id: String,
    pub amount: f64,
    pub currency: Currency,
    pub merchant: String,
    pub timestamp: i64,
    pub signature: String,
    pub channel: Option<OfflineChannel>,
    pub synced_at: DateTime<Utc>,
}
