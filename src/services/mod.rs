//! Payment orchestration and its collaborators

pub mod fraud;
pub mod notification;
pub mod payment_orchestrator;

pub use fraud::{FraudAssessment, FraudScreen, FraudScreenError, RuleBasedFraudScreen};
pub use notification::{
    BalanceLedger, LoggingBalanceLedger, LoggingReceiptIssuer, NotificationService, PaymentEvent,
    ReceiptIssuer, SinkError, WebhookNotifier,
};
pub use payment_orchestrator::{
    OrchestratorConfig, OrchestratorError, OrchestratorResult, PaymentOrchestrator,
    PaymentOutcome, PaymentRequest, TransactionState,
};
