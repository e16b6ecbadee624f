//! Offline capture over USSD, SMS and QR

use super::{
    OfflineChannel, OfflineConfig, OfflineError, OfflineResult, OfflineStatus, OfflineStore,
    OfflineTransaction, PayloadCipher, PayloadSigner,
};
use crate::logging::mask;
use crate::payments::types::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub amount: f64,
    pub currency: Currency,
    #[serde(default)]
    pub customer_ref: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl CaptureRequest {
    pub fn new(amount: f64, currency: Currency) -> Self {
        Self {
            amount,
            currency,
            customer_ref: None,
            merchant_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_customer(mut self, customer_ref: impl Into<String>) -> Self {
        self.customer_ref = Some(customer_ref.into());
        self
    }

    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    fn validate(&self) -> OfflineResult<()> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(OfflineError::InvalidRequest {
                field: "amount".to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        if let Some(merchant) = &self.merchant_id {
            if merchant.contains('|') {
                return Err(OfflineError::InvalidRequest {
                    field: "merchant_id".to_string(),
                    reason: "must not contain '|'".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReceipt {
    pub transaction_id: String,
    pub channel: OfflineChannel,
    /// USSD code, SMS code or sealed QR content
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_message: Option<String>,
    pub instructions: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub transaction_id: String,
    pub status: OfflineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Contents of a QR code before sealing.
#[derive(Serialize)]
struct QrContent<'a> {
    id: &'a str,
    amount: f64,
    currency: Currency,
    merchant: &'a str,
    timestamp: i64,
    signature: &'a str,
}

pub struct OfflineCaptureService {
    store: Arc<dyn OfflineStore>,
    signer: Arc<dyn PayloadSigner>,
    cipher: Arc<dyn PayloadCipher>,
    config: OfflineConfig,
}

impl OfflineCaptureService {
    pub fn new(
        store: Arc<dyn OfflineStore>,
        signer: Arc<dyn PayloadSigner>,
        cipher: Arc<dyn PayloadCipher>,
        config: OfflineConfig,
    ) -> Self {
        Self {
            store,
            signer,
            cipher,
            config,
        }
    }

    pub async fn capture_ussd(&self, request: CaptureRequest) -> OfflineResult<CaptureReceipt> {
        let mut tx = self.draft(&request, OfflineChannel::Ussd)?;
        tx.code = format!(
            "{}*{}*{}#",
            self.config.ussd_prefix,
            request.amount,
            short_id(&tx.id, 8)
        );
        let instructions = format!(
            "Dial {} on your phone to complete the payment of {} {}",
            tx.code,
            request.amount,
            request.currency.as_str()
        );
        self.issue(tx, instructions, None).await
    }

    pub async fn capture_sms(&self, request: CaptureRequest) -> OfflineResult<CaptureReceipt> {
        let mut tx = self.draft(&request, OfflineChannel::Sms)?;
        tx.code = format!("PAY{}", short_id(&tx.id, 6).to_uppercase());
        let message = format!(
            "Send {} to {} to pay {} {}",
            tx.code,
            self.config.sms_shortcode,
            request.amount,
            request.currency.as_str()
        );
        self.issue(tx, message.clone(), Some(message)).await
    }

    pub async fn capture_qr(&self, request: CaptureRequest) -> OfflineResult<CaptureReceipt> {
        let mut tx = self.draft(&request, OfflineChannel::Qr)?;
        let content = QrContent {
            id: &tx.id,
            amount: tx.amount,
            currency: tx.currency,
            merchant: &tx.merchant,
            timestamp: tx.timestamp,
            signature: &tx.signature,
        };
        let plaintext = serde_json::to_vec(&content).map_err(|e| OfflineError::Sealing {
            message: e.to_string(),
        })?;
        tx.code = self.cipher.seal(&plaintext)?;
        self.issue(
            tx,
            "Scan this QR code with your mobile app to complete the payment offline".to_string(),
            None,
        )
        .await
    }

    /// Build and sign a pending transaction; the channel code is filled in
    /// by the caller.
    fn draft(
        &self,
        request: &CaptureRequest,
        channel: OfflineChannel,
    ) -> OfflineResult<OfflineTransaction> {
        request.validate()?;

        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.ttl(channel)).map_err(|e| {
            OfflineError::InvalidRequest {
                field: "ttl".to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut tx = OfflineTransaction {
            id: Uuid::new_v4().to_string(),
            amount: request.amount,
            currency: request.currency,
            customer_ref: request.customer_ref.clone(),
            merchant: request
                .merchant_id
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.config.default_merchant.clone()),
            channel,
            code: String::new(),
            timestamp: created_at.timestamp_millis(),
            signature: String::new(),
            created_at,
            expires_at: created_at + ttl,
            metadata: request.metadata.clone(),
        };
        tx.signature = self.signer.sign(&tx.payload());
        Ok(tx)
    }

    async fn issue(
        &self,
        tx: OfflineTransaction,
        instructions: String,
        sms_message: Option<String>,
    ) -> OfflineResult<CaptureReceipt> {
        self.store.insert_pending(&tx).await?;

        info!(
            transaction_id = %tx.id,
            channel = %tx.channel,
            amount = tx.amount,
            currency = tx.currency.as_str(),
            customer = %tx.customer_ref.as_deref().map(mask).unwrap_or_default(),
            expires_at = %tx.expires_at,
            "Offline transaction captured"
        );

        Ok(CaptureReceipt {
            transaction_id: tx.id,
            channel: tx.channel,
            code: tx.code,
            sms_message,
            instructions,
            signature: tx.signature,
            created_at: tx.created_at,
            expires_at: tx.expires_at,
        })
    }

    /// `completed` once synced, `pending` or `expired` while only captured,
    /// `not_found` otherwise.
    pub async fn check_status(&self, transaction_id: &str) -> OfflineResult<StatusReport> {
        if let Some(processed) = self.store.processed(transaction_id).await? {
            return Ok(StatusReport {
                transaction_id: transaction_id.to_string(),
                status: OfflineStatus::Completed,
                amount: Some(processed.amount),
                currency: Some(processed.currency),
                expires_at: None,
                processed_at: Some(processed.synced_at),
            });
        }

        if let Some(pending) = self.store.pending(transaction_id).await? {
            return Ok(StatusReport {
                transaction_id: transaction_id.to_string(),
                status: pending.status_at(Utc::now()),
                amount: Some(pending.amount),
                currency: Some(pending.currency),
                expires_at: Some(pending.expires_at),
                processed_at: None,
            });
        }

        debug!(transaction_id = %transaction_id, "Offline transaction not found");
        Ok(StatusReport {
            transaction_id: transaction_id.to_string(),
            status: OfflineStatus::NotFound,
            amount: None,
            currency: None,
            expires_at: None,
            processed_at: None,
        })
    }
}

fn short_id(id: &str, len: usize) -> String {
    id.chars().filter(|c| c.is_ascii_hexdigit()).take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::{AesGcmEnvelope, HmacSigner, InMemoryOfflineStore};
    use regex::Regex;

    fn envelope() -> AesGcmEnvelope {
        AesGcmEnvelope::from_hex(&OfflineConfig::default().qr_key).unwrap()
    }

    fn service(store: Arc<InMemoryOfflineStore>) -> OfflineCaptureService {
        OfflineCaptureService::new(
            store,
            Arc::new(HmacSigner::new("test-signing-key-0001").unwrap()),
            Arc::new(envelope()),
            OfflineConfig::default(),
        )
    }

    #[tokio::test]
    async fn ussd_code_format_and_expiry() {
        let service = service(Arc::new(InMemoryOfflineStore::new()));
        let receipt = service
            .capture_ussd(CaptureRequest::new(100.0, Currency::Kes))
            .await
            .unwrap();

        let pattern = Regex::new(r"^\*123\*100\*[0-9a-f]{8}#$").unwrap();
        assert!(pattern.is_match(&receipt.code), "code: {}", receipt.code);
        assert_eq!(
            receipt.expires_at - receipt.created_at,
            chrono::Duration::minutes(15)
        );
        assert!(receipt.instructions.starts_with("Dial *123*100*"));
        assert!(receipt.instructions.ends_with("100 KES"));
    }

    #[tokio::test]
    async fn sms_code_uses_uppercase_short_id() {
        let service = service(Arc::new(InMemoryOfflineStore::new()));
        let receipt = service
            .capture_sms(CaptureRequest::new(250.5, Currency::Ngn))
            .await
            .unwrap();

        let expected = format!("PAY{}", receipt.transaction_id[..6].to_uppercase());
        assert_eq!(receipt.code, expected);
        assert_eq!(
            receipt.sms_message.as_deref(),
            Some(format!("Send {} to 12345 to pay 250.5 NGN", expected).as_str())
        );
        assert_eq!(
            receipt.expires_at - receipt.created_at,
            chrono::Duration::minutes(30)
        );
    }

    #[tokio::test]
    async fn qr_content_opens_to_signed_payload() {
        let service = service(Arc::new(InMemoryOfflineStore::new()));
        let receipt = service
            .capture_qr(CaptureRequest::new(42.0, Currency::Usd).with_merchant("M-77"))
            .await
            .unwrap();

        assert!(!receipt.code.contains("M-77"));
        let opened = envelope().open(&receipt.code).unwrap();
        let content: JsonValue = serde_json::from_slice(&opened).unwrap();
        assert_eq!(content["id"], receipt.transaction_id.as_str());
        assert_eq!(content["merchant"], "M-77");
        assert_eq!(content["currency"], "USD");
        assert_eq!(content["signature"], receipt.signature.as_str());
    }

    #[tokio::test]
    async fn status_moves_from_pending_to_expired() {
        let store = Arc::new(InMemoryOfflineStore::new());
        let service = service(store.clone());
        let receipt = service
            .capture_ussd(CaptureRequest::new(10.0, Currency::Kes))
            .await
            .unwrap();

        let status = service.check_status(&receipt.transaction_id).await.unwrap();
        assert_eq!(status.status, OfflineStatus::Pending);

        let mut tx = store.pending(&receipt.transaction_id).await.unwrap().unwrap();
        tx.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.insert_pending(&tx).await.unwrap();

        let status = service.check_status(&receipt.transaction_id).await.unwrap();
        assert_eq!(status.status, OfflineStatus::Expired);

        let missing = service.check_status("nope").await.unwrap();
        assert_eq!(missing.status, OfflineStatus::NotFound);
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected() {
        let service = service(Arc::new(InMemoryOfflineStore::new()));
        let result = service
            .capture_sms(CaptureRequest::new(-5.0, Currency::Kes))
            .await;
        assert!(matches!(result, Err(OfflineError::InvalidRequest { .. })));
    }
}
