//! Reconciliation of offline-captured transactions
//!
//! Each record is judged on its own: a bad record is reported and the rest
//! of the batch carries on. Resubmitting a batch is always safe because
//! commits are deduplicated by transaction id.

use super::{
    OfflineError, OfflineResult, OfflineStore, PayloadSigner, ProcessedTransaction, SignedPayload,
};
use crate::payments::types::Currency;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A captured transaction as submitted by a device coming back online.
/// Every field is optional on the wire so that incomplete records are
/// rejected individually instead of failing the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub merchant: Option<String>,
    pub timestamp: Option<i64>,
    pub signature: Option<String>,
}

impl SyncRecord {
    fn payload(&self) -> Option<(SignedPayload, &str)> {
        let id = self.id.as_deref().filter(|id| !id.trim().is_empty())?;
        let amount = self.amount.filter(|a| a.is_finite() && *a > 0.0)?;
        let currency: Currency = self.currency.as_deref()?.parse().ok()?;
        let signature = self.signature.as_deref().filter(|s| !s.is_empty())?;
        Some((
            SignedPayload {
                id: id.to_string(),
                amount,
                currency,
                merchant: self.merchant.clone()?,
                timestamp: self.timestamp?,
            },
            signature,
        ))
    }
}

impl From<&ProcessedTransaction> for SyncRecord {
    fn from(tx: &ProcessedTransaction) -> Self {
        Self {
            id: Some(tx.id.clone()),
            amount: Some(tx.amount),
            currency: Some(tx.currency.as_str().to_string()),
            merchant: Some(tx.merchant.clone()),
            timestamp: Some(tx.timestamp),
            signature: Some(tx.signature.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Processed,
    AlreadyProcessed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorCode {
    InvalidTransaction,
    TransactionExpired,
    ProcessingError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SyncStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncErrorCode>,
    pub message: String,
}

impl SyncResult {
    fn ok(id: &str, status: SyncStatus, message: &str) -> Self {
        Self {
            id: id.to_string(),
            success: true,
            status: Some(status),
            error: None,
            message: message.to_string(),
        }
    }

    fn failed(id: &str, error: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            status: None,
            error: Some(error),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub total: usize,
    /// Committed plus already-processed records
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<SyncResult>,
}

pub struct OfflineSyncService {
    store: Arc<dyn OfflineStore>,
    signer: Arc<dyn PayloadSigner>,
}

impl OfflineSyncService {
    pub fn new(store: Arc<dyn OfflineStore>, signer: Arc<dyn PayloadSigner>) -> Self {
        Self { store, signer }
    }

    /// Verify and commit a batch. Only an empty batch fails the call.
    pub async fn sync(&self, batch: &[SyncRecord]) -> OfflineResult<SyncReport> {
        if batch.is_empty() {
            return Err(OfflineError::EmptyBatch);
        }

        let mut results = Vec::with_capacity(batch.len());
        for record in batch {
            results.push(self.sync_one(record).await);
        }

        let processed = results.iter().filter(|r| r.success).count();
        let report = SyncReport {
            total: batch.len(),
            processed,
            failed: results.len() - processed,
            results,
        };
        info!(
            total = report.total,
            processed = report.processed,
            failed = report.failed,
            "Offline sync batch completed"
        );
        Ok(report)
    }

    async fn sync_one(&self, record: &SyncRecord) -> SyncResult {
        let id = record.id.clone().unwrap_or_else(|| "unknown".to_string());

        let Some((payload, signature)) = record.payload() else {
            warn!(transaction_id = %id, "Offline record missing required fields");
            return SyncResult::failed(
                &id,
                SyncErrorCode::InvalidTransaction,
                "Transaction verification failed",
            );
        };
        if !self.signer.verify(&payload, signature) {
            warn!(transaction_id = %id, "Offline record signature mismatch");
            return SyncResult::failed(
                &id,
                SyncErrorCode::InvalidTransaction,
                "Transaction verification failed",
            );
        }

        match self.commit(&payload, signature).await {
            Ok(result) => result,
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "Offline record commit failed");
                SyncResult::failed(&id, SyncErrorCode::ProcessingError, e.to_string())
            }
        }
    }

    async fn commit(&self, payload: &SignedPayload, signature: &str) -> OfflineResult<SyncResult> {
        if self.store.processed(&payload.id).await?.is_some() {
            return Ok(SyncResult::ok(
                &payload.id,
                SyncStatus::AlreadyProcessed,
                "Transaction already processed",
            ));
        }

        let pending = self.store.pending(&payload.id).await?;
        let now = Utc::now();
        if let Some(pending) = &pending {
            if pending.is_expired_at(now) {
                warn!(
                    transaction_id = %payload.id,
                    expires_at = %pending.expires_at,
                    "Offline record submitted after expiry"
                );
                return Ok(SyncResult::failed(
                    &payload.id,
                    SyncErrorCode::TransactionExpired,
                    "Transaction expired before it was synced",
                ));
            }
        }

        let record = ProcessedTransaction {
            id: payload.id.clone(),
            amount: payload.amount,
            currency: payload.currency,
            merchant: payload.merchant.clone(),
            timestamp: payload.timestamp,
            signature: signature.to_string(),
            channel: pending.as_ref().map(|p| p.channel),
            synced_at: now,
        };

        if self.store.commit(&record).await? {
            info!(transaction_id = %payload.id, amount = payload.amount, "Offline transaction committed");
            Ok(SyncResult::ok(
                &payload.id,
                SyncStatus::Processed,
                "Transaction processed successfully",
            ))
        } else {
            // lost a race with a concurrent submission of the same id
            Ok(SyncResult::ok(
                &payload.id,
                SyncStatus::AlreadyProcessed,
                "Transaction already processed",
            ))
        }
    }
}
