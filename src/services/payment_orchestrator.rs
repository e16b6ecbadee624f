//! Payment Orchestrator Service
//!
//! Runs one payment through validation, fraud screening, routing and
//! processor dispatch, feeds the outcome back into the routing model, and
//! finishes with best-effort post-processing.

use crate::config::{env_parse, ConfigError};
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, InfrastructureError};
use crate::logging::mask;
use crate::payments::error::PaymentError;
use crate::payments::factory::ProcessorRegistry;
use crate::payments::types::{
    PaymentMethod, ProcessingPerformance, ProcessorRequest, ProcessorResponse, TransactionRequest,
};
use crate::routing::arbiter::{RoutingArbiter, RoutingDecision};
use crate::routing::store::ModelStore;
use crate::services::fraud::FraudScreen;
use crate::services::notification::{
    BalanceLedger, LoggingBalanceLedger, LoggingReceiptIssuer, NotificationService, PaymentEvent,
    ReceiptIssuer, WebhookNotifier,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration Types
// ============================================================================

/// Configuration for the payment orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Attempts per method, including the first
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Upper bound for a single processor call
    pub processor_timeout_secs: u64,
    /// Amount above which the rule-based fraud screen flags a payment
    pub fraud_max_amount: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_retry_delay_ms: 2_000,
            max_retry_delay_ms: 30_000,
            processor_timeout_secs: 30,
            fraud_max_amount: 1_000_000.0,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts)?,
            initial_retry_delay_ms: env_parse("INITIAL_RETRY_DELAY_MS", defaults.initial_retry_delay_ms)?,
            max_retry_delay_ms: env_parse("MAX_RETRY_DELAY_MS", defaults.max_retry_delay_ms)?,
            processor_timeout_secs: env_parse("PROCESSOR_TIMEOUT_SECS", defaults.processor_timeout_secs)?,
            fraud_max_amount: env_parse("FRAUD_MAX_AMOUNT", defaults.fraud_max_amount)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.initial_retry_delay_ms > self.max_retry_delay_ms {
            return Err(ConfigError::InvalidValue(
                "INITIAL_RETRY_DELAY_MS must be <= MAX_RETRY_DELAY_MS".to_string(),
            ));
        }
        if self.processor_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PROCESSOR_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }
        if !self.fraud_max_amount.is_finite() || self.fraud_max_amount <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "FRAUD_MAX_AMOUNT must be a positive number".to_string(),
            ));
        }
        Ok(())
    }

    /// `initial * 2^(attempt - 1)`, capped at the maximum delay.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self
            .initial_retry_delay_ms
            .saturating_mul(factor)
            .min(self.max_retry_delay_ms);
        Duration::from_millis(delay)
    }

    fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_secs)
    }
}

// ============================================================================
// Transaction State Machine Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Requested,
    Validated,
    Routed,
    Processing,
    Succeeded,
    Failed,
    /// Balance update outstanding
    Settling,
    Settled,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionState::Requested => "REQUESTED",
            TransactionState::Validated => "VALIDATED",
            TransactionState::Routed => "ROUTED",
            TransactionState::Processing => "PROCESSING",
            TransactionState::Succeeded => "SUCCEEDED",
            TransactionState::Failed => "FAILED",
            TransactionState::Settling => "SETTLING",
            TransactionState::Settled => "SETTLED",
        };
        f.write_str(name)
    }
}

impl TransactionState {
    /// Get all valid transitions from this state
    pub fn valid_transitions(&self) -> &'static [TransactionState] {
        match self {
            TransactionState::Requested => &[TransactionState::Validated, TransactionState::Failed],
            TransactionState::Validated => &[TransactionState::Routed, TransactionState::Failed],
            TransactionState::Routed => &[TransactionState::Processing],
            TransactionState::Processing => {
                &[TransactionState::Succeeded, TransactionState::Failed]
            }
            TransactionState::Succeeded => &[TransactionState::Settling],
            TransactionState::Settling => &[TransactionState::Settled],
            // Terminal states - no valid transitions
            TransactionState::Failed | TransactionState::Settled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TransactionState) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Failed | TransactionState::Settled)
    }
}

/// Ordered record of the states one payment passed through.
#[derive(Debug, Clone)]
struct StateTrail {
    transaction_id: String,
    states: Vec<TransactionState>,
}

impl StateTrail {
    fn new(transaction_id: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            states: vec![TransactionState::Requested],
        }
    }

    fn current(&self) -> TransactionState {
        self.states
            .last()
            .copied()
            .unwrap_or(TransactionState::Requested)
    }

    fn advance(&mut self, target: TransactionState) -> OrchestratorResult<()> {
        let current = self.current();
        if !current.can_transition_to(target) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: current,
                to: target,
            });
        }
        info!(
            transaction_id = %self.transaction_id,
            from = %current,
            to = %target,
            "Transaction state changed"
        );
        self.states.push(target);
        Ok(())
    }
}

// ============================================================================
// Request / Outcome Types
// ============================================================================

/// A payment to run. Without `method` the routing arbiter chooses one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    #[serde(flatten)]
    pub transaction: TransactionRequest,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

impl PaymentRequest {
    pub fn routed(transaction: TransactionRequest) -> Self {
        Self {
            transaction,
            method: None,
        }
    }

    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.method = Some(method);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub success: bool,
    pub state: TransactionState,
    pub state_trail: Vec<TransactionState>,
    pub processor_reference: Option<String>,
    pub fee: Option<f64>,
    pub processing_time_ms: Option<u64>,
    pub attempts: u32,
    pub error: Option<String>,
    pub receipt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempted_methods: Vec<PaymentMethod>,
}

// ============================================================================
// Orchestrator Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Payment flagged as suspicious (risk {risk_score:.2}): {reason}")]
    FraudSuspected { risk_score: f64, reason: String },

    #[error("Fraud screen unavailable: {message}")]
    FraudScreenUnavailable { message: String },

    #[error("All payment methods failed: {}", .attempted.join(", "))]
    AllMethodsFailed { attempted: Vec<String> },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: TransactionState,
        to: TransactionState,
    },
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::Payment(e) => return e.into(),
            OrchestratorError::FraudSuspected { risk_score, reason } => {
                AppErrorKind::Domain(DomainError::FraudSuspected { risk_score, reason })
            }
            OrchestratorError::FraudScreenUnavailable { message } => {
                AppErrorKind::External(ExternalError::FraudScreen { message })
            }
            OrchestratorError::AllMethodsFailed { attempted } => {
                AppErrorKind::Domain(DomainError::AllPaymentMethodsFailed { attempted })
            }
            err @ OrchestratorError::InvalidStateTransition { .. } => {
                AppErrorKind::Infrastructure(InfrastructureError::Storage {
                    message: err.to_string(),
                })
            }
        };
        AppError::new(kind)
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

/// Result of dispatching to one processor, after retries.
struct Dispatch {
    response: Option<ProcessorResponse>,
    error: Option<String>,
    attempts: u32,
}

pub struct PaymentOrchestrator {
    arbiter: Arc<RoutingArbiter>,
    processors: ProcessorRegistry,
    fraud: Arc<dyn FraudScreen>,
    config: OrchestratorConfig,
    model_store: Option<Arc<dyn ModelStore>>,
    /// Set while a snapshot save is queued but not yet started
    save_pending: Arc<AtomicBool>,
    webhooks: Arc<dyn WebhookNotifier>,
    ledger: Arc<dyn BalanceLedger>,
    receipts: Arc<dyn ReceiptIssuer>,
}

impl PaymentOrchestrator {
    pub fn new(
        arbiter: Arc<RoutingArbiter>,
        processors: ProcessorRegistry,
        fraud: Arc<dyn FraudScreen>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            arbiter,
            processors,
            fraud,
            config,
            model_store: None,
            save_pending: Arc::new(AtomicBool::new(false)),
            webhooks: Arc::new(NotificationService::new()),
            ledger: Arc::new(LoggingBalanceLedger),
            receipts: Arc::new(LoggingReceiptIssuer),
        }
    }

    pub fn with_model_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.model_store = Some(store);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Arc<dyn WebhookNotifier>) -> Self {
        self.webhooks = webhooks;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn BalanceLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_receipts(mut self, receipts: Arc<dyn ReceiptIssuer>) -> Self {
        self.receipts = receipts;
        self
    }

    pub fn arbiter(&self) -> &Arc<RoutingArbiter> {
        &self.arbiter
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Run one payment end to end. A processor failure is a failed outcome,
    /// not an error; errors are reserved for rejections before dispatch.
    pub async fn process_payment(&self, request: PaymentRequest) -> OrchestratorResult<PaymentOutcome> {
        let transaction_id = new_transaction_id();
        let mut trail = StateTrail::new(&transaction_id);

        self.pre_check(&transaction_id, &request.transaction).await?;
        trail.advance(TransactionState::Validated)?;

        let (method, decision) = match request.method {
            Some(method) => {
                info!(
                    transaction_id = %transaction_id,
                    method = %method,
                    "Using caller-selected payment method"
                );
                (method, None)
            }
            None => {
                let decision = self.arbiter.decide(&transaction_id, &request.transaction).await;
                (decision.chosen_method, Some(decision))
            }
        };
        self.processors.get(method)?;
        trail.advance(TransactionState::Routed)?;

        let mut outcome = self
            .execute(&transaction_id, &request.transaction, method, &mut trail)
            .await?;
        outcome.decision = decision;
        Ok(outcome)
    }

    /// Try `methods` in order until one succeeds. Validation and fraud
    /// screening run once for the whole attempt.
    pub async fn process_with_fallback(
        &self,
        request: TransactionRequest,
        methods: &[PaymentMethod],
    ) -> OrchestratorResult<PaymentOutcome> {
        if methods.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "at least one fallback method is required".to_string(),
                field: Some("methods".to_string()),
            }
            .into());
        }

        let transaction_id = new_transaction_id();
        self.pre_check(&transaction_id, &request).await?;

        let mut attempted = Vec::new();
        for &method in methods {
            attempted.push(method);
            if self.processors.get(method).is_err() {
                warn!(transaction_id = %transaction_id, method = %method, "No processor for fallback method");
                continue;
            }

            let mut trail = StateTrail::new(&transaction_id);
            trail.advance(TransactionState::Validated)?;
            trail.advance(TransactionState::Routed)?;
            let mut outcome = self.execute(&transaction_id, &request, method, &mut trail).await?;
            if outcome.success {
                outcome.attempted_methods = attempted;
                return Ok(outcome);
            }
            warn!(
                transaction_id = %transaction_id,
                method = %method,
                error = outcome.error.as_deref().unwrap_or("declined"),
                "Payment method failed, trying next"
            );
        }

        error!(transaction_id = %transaction_id, attempted = attempted.len(), "All payment methods failed");
        Err(OrchestratorError::AllMethodsFailed {
            attempted: attempted.iter().map(|m| m.to_string()).collect(),
        })
    }

    async fn pre_check(&self, transaction_id: &str, request: &TransactionRequest) -> OrchestratorResult<()> {
        request.validate()?;

        let screened = tokio::time::timeout(self.config.processor_timeout(), self.fraud.screen(request)).await;
        let assessment = match screened {
            Ok(Ok(assessment)) => assessment,
            Ok(Err(e)) => {
                error!(transaction_id = %transaction_id, error = %e, "Fraud screen failed, rejecting payment");
                return Err(OrchestratorError::FraudScreenUnavailable {
                    message: e.to_string(),
                });
            }
            Err(_) => {
                error!(transaction_id = %transaction_id, screen = self.fraud.name(), "Fraud screen timed out, rejecting payment");
                return Err(OrchestratorError::FraudScreenUnavailable {
                    message: format!("{} timed out", self.fraud.name()),
                });
            }
        };

        if assessment.is_suspicious {
            let reason = assessment
                .reason
                .unwrap_or_else(|| "flagged by fraud screen".to_string());
            warn!(
                transaction_id = %transaction_id,
                risk_score = assessment.risk_score,
                reason = %reason,
                customer = %request.customer_id.as_deref().map(mask).unwrap_or_default(),
                "Payment rejected by fraud screen"
            );
            return Err(OrchestratorError::FraudSuspected {
                risk_score: assessment.risk_score,
                reason,
            });
        }
        Ok(())
    }

    async fn execute(
        &self,
        transaction_id: &str,
        request: &TransactionRequest,
        method: PaymentMethod,
        trail: &mut StateTrail,
    ) -> OrchestratorResult<PaymentOutcome> {
        trail.advance(TransactionState::Processing)?;
        let dispatch = self.dispatch(transaction_id, request, method).await?;

        let success = dispatch.response.as_ref().is_some_and(|r| r.success);
        trail.advance(if success {
            TransactionState::Succeeded
        } else {
            TransactionState::Failed
        })?;

        self.learn(transaction_id, request, method, success, dispatch.response.as_ref())
            .await;

        let event = PaymentEvent {
            transaction_id: transaction_id.to_string(),
            method,
            amount: request.amount,
            currency: request.currency,
            success,
            processor_reference: dispatch.response.as_ref().map(|r| r.transaction_id.clone()),
            fee: dispatch.response.as_ref().and_then(|r| r.fee),
            customer_id: request.customer_id.clone(),
        };
        let receipt_id = self.post_process(&event, trail).await?;

        let error = dispatch.error.or_else(|| {
            dispatch
                .response
                .as_ref()
                .filter(|r| !r.success)
                .map(|r| r.message.clone().unwrap_or_else(|| "payment declined".to_string()))
        });
        Ok(PaymentOutcome {
            transaction_id: transaction_id.to_string(),
            method,
            success,
            state: trail.current(),
            state_trail: trail.states.clone(),
            processor_reference: event.processor_reference,
            fee: event.fee,
            processing_time_ms: dispatch.response.as_ref().map(|r| r.processing_time_ms),
            attempts: dispatch.attempts,
            error,
            receipt_id,
            decision: None,
            attempted_methods: Vec::new(),
        })
    }

    /// Call the processor with retry and a per-attempt timeout. Only
    /// retryable errors are retried; a decline is final.
    async fn dispatch(
        &self,
        transaction_id: &str,
        request: &TransactionRequest,
        method: PaymentMethod,
    ) -> OrchestratorResult<Dispatch> {
        let processor = self.processors.get(method)?;
        let processor_request = ProcessorRequest {
            transaction_id: transaction_id.to_string(),
            amount: request.amount,
            currency: request.currency,
            method,
            customer_id: request.customer_id.clone(),
            metadata: request.metadata.clone(),
        };

        let max_attempts = self.config.max_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.config.processor_timeout(),
                processor.process(processor_request.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PaymentError::Timeout {
                    processor: processor.name().to_string(),
                    timeout_secs: self.config.processor_timeout_secs,
                }),
            };

            match result {
                Ok(response) => {
                    info!(
                        transaction_id = %transaction_id,
                        processor = processor.name(),
                        success = response.success,
                        attempt,
                        processing_time_ms = response.processing_time_ms,
                        "Processor responded"
                    );
                    return Ok(Dispatch {
                        response: Some(response),
                        error: None,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        transaction_id = %transaction_id,
                        processor = processor.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Processor call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        transaction_id = %transaction_id,
                        processor = processor.name(),
                        attempt,
                        error = %e,
                        "Processor call failed"
                    );
                    return Ok(Dispatch {
                        response: None,
                        error: Some(e.to_string()),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    async fn learn(
        &self,
        transaction_id: &str,
        request: &TransactionRequest,
        method: PaymentMethod,
        success: bool,
        response: Option<&ProcessorResponse>,
    ) {
        let performance = ProcessingPerformance {
            cost: response.and_then(|r| r.fee),
            processing_time_ms: response.map(|r| r.processing_time_ms),
        };
        self.arbiter.model().learn(request, method, success, performance);
        self.arbiter
            .record_outcome(transaction_id, method, success)
            .await;

        self.schedule_model_save(transaction_id);
    }

    /// Persist the model in the background. Outcomes that arrive while a save
    /// is still queued are folded into that save.
    fn schedule_model_save(&self, transaction_id: &str) {
        let Some(store) = self.model_store.clone() else {
            return;
        };
        if self.save_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let pending = self.save_pending.clone();
        let model = self.arbiter.model().clone();
        let transaction_id = transaction_id.to_string();
        tokio::spawn(async move {
            pending.store(false, Ordering::Release);
            if let Err(e) = store.save(&model.snapshot()).await {
                warn!(transaction_id = %transaction_id, error = %e, "Failed to persist routing model");
            }
        });
    }

    /// Webhook, receipt and balance update. Each step is isolated; only a
    /// successful balance update settles the payment.
    async fn post_process(
        &self,
        event: &PaymentEvent,
        trail: &mut StateTrail,
    ) -> OrchestratorResult<Option<String>> {
        if let Err(e) = self.webhooks.notify(event).await {
            warn!(transaction_id = %event.transaction_id, error = %e, "Webhook delivery failed");
        }
        if !event.success {
            return Ok(None);
        }

        let receipt_id = match self.receipts.issue(event).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(transaction_id = %event.transaction_id, error = %e, "Receipt generation failed");
                None
            }
        };

        trail.advance(TransactionState::Settling)?;
        match self.ledger.apply(event).await {
            Ok(()) => trail.advance(TransactionState::Settled)?,
            Err(e) => {
                warn!(
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "Balance update failed, settlement left queued"
                );
            }
        }
        Ok(receipt_id)
    }
}

fn new_transaction_id() -> String {
    format!("TXN-{}", Uuid::new_v4())
}
