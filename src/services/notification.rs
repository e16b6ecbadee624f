//! Post-processing sinks: webhook delivery, balance updates and receipts
//!
//! All of these are best effort. The orchestrator logs their failures and
//! never lets them change a payment result.

use crate::logging::mask;
use crate::payments::types::{Currency, PaymentMethod};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub amount: f64,
    pub currency: Currency,
    pub success: bool,
    pub processor_reference: Option<String>,
    pub fee: Option<f64>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("{sink} unavailable: {message}")]
    Unavailable { sink: String, message: String },
}

#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, event: &PaymentEvent) -> Result<(), SinkError>;
}

#[async_trait]
pub trait BalanceLedger: Send + Sync {
    async fn apply(&self, event: &PaymentEvent) -> Result<(), SinkError>;
}

#[async_trait]
pub trait ReceiptIssuer: Send + Sync {
    /// Returns the receipt id.
    async fn issue(&self, event: &PaymentEvent) -> Result<String, SinkError>;
}

/// Writes every notification to the structured log.
#[derive(Debug, Default, Clone)]
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WebhookNotifier for NotificationService {
    async fn notify(&self, event: &PaymentEvent) -> Result<(), SinkError> {
        let customer = event.customer_id.as_deref().map(mask).unwrap_or_default();
        if event.success {
            info!(
                transaction_id = %event.transaction_id,
                method = %event.method,
                amount = event.amount,
                currency = %event.currency,
                customer = %customer,
                "NOTIFICATION: payment succeeded"
            );
        } else {
            error!(
                transaction_id = %event.transaction_id,
                method = %event.method,
                customer = %customer,
                "NOTIFICATION: payment failed"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoggingBalanceLedger;

#[async_trait]
impl BalanceLedger for LoggingBalanceLedger {
    async fn apply(&self, event: &PaymentEvent) -> Result<(), SinkError> {
        let net = event.amount - event.fee.unwrap_or(0.0);
        info!(
            transaction_id = %event.transaction_id,
            gross = event.amount,
            net,
            currency = %event.currency,
            "Balance credited"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoggingReceiptIssuer;

#[async_trait]
impl ReceiptIssuer for LoggingReceiptIssuer {
    async fn issue(&self, event: &PaymentEvent) -> Result<String, SinkError> {
        let receipt_id = format!(
            "RCPT-{}",
            event.transaction_id.trim_start_matches("TXN-")
        );
        info!(
            transaction_id = %event.transaction_id,
            receipt_id = %receipt_id,
            "Receipt issued"
        );
        Ok(receipt_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> PaymentEvent {
        PaymentEvent {
            transaction_id: "TXN-abc".to_string(),
            method: PaymentMethod::MobileMoney,
            amount: 100.0,
            currency: Currency::Kes,
            success: true,
            processor_reference: Some("simulated_mobile_money_TXN-abc".to_string()),
            fee: Some(1.5),
            customer_id: Some("254712345678".to_string()),
        }
    }

    #[tokio::test]
    async fn logging_sinks_accept_events() {
        assert!(NotificationService::new().notify(&event()).await.is_ok());
        assert!(LoggingBalanceLedger.apply(&event()).await.is_ok());
        assert_eq!(
            LoggingReceiptIssuer.issue(&event()).await.unwrap(),
            "RCPT-abc"
        );
    }
}
