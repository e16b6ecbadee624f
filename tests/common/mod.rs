//! Shared wiring for integration tests: in-memory storage, simulated
//! processors and a knowledge source that is always down.

#![allow(dead_code)]

use async_trait::async_trait;
use paygrid_backend::api::AppState;
use paygrid_backend::compliance::knowledge::{
    Completion, KnowledgeAnswer, KnowledgeError, KnowledgeResult, KnowledgeSource,
};
use paygrid_backend::compliance::{
    ComplianceConfig, ComplianceOptimizer, ComplianceScoreProvider, OptimizerConfig,
};
use paygrid_backend::health::HealthChecker;
use paygrid_backend::offline::{
    AesGcmEnvelope, HmacSigner, InMemoryOfflineStore, OfflineCaptureService, OfflineConfig,
    OfflineStore, OfflineSyncService,
};
use paygrid_backend::payments::factory::{ProcessorRegistry, ProcessorRegistryConfig};
use paygrid_backend::routing::{ArbiterConfig, ModelConfig, RoutingArbiter, WeightedRoutingModel};
use paygrid_backend::services::{OrchestratorConfig, PaymentOrchestrator, RuleBasedFraudScreen};
use std::sync::Arc;

pub const TEST_SIGNING_KEY: &str = "integration-test-signing-key";
pub const TEST_QR_KEY: &str = "696e746567726174696f6e2d746573742d71722d6b65792d3030303030303030";

pub struct UnreachableKnowledge;

#[async_trait]
impl KnowledgeSource for UnreachableKnowledge {
    async fn answer_question(&self, _prompt: &str) -> KnowledgeResult<KnowledgeAnswer> {
        Err(KnowledgeError::Network {
            message: "connection refused".to_string(),
        })
    }

    async fn generate_completion(&self, _prompt: &str) -> KnowledgeResult<Completion> {
        Err(KnowledgeError::Network {
            message: "connection refused".to_string(),
        })
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

pub fn arbiter() -> Arc<RoutingArbiter> {
    let provider = Arc::new(ComplianceScoreProvider::new(
        Arc::new(UnreachableKnowledge),
        ComplianceConfig::default(),
    ));
    let optimizer = Arc::new(ComplianceOptimizer::new(provider, OptimizerConfig::default()));
    Arc::new(
        RoutingArbiter::new(
            Arc::new(WeightedRoutingModel::new(ModelConfig::default())),
            ArbiterConfig::default(),
        )
        .with_optimizer(optimizer),
    )
}

pub fn orchestrator() -> PaymentOrchestrator {
    let config = OrchestratorConfig {
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        ..OrchestratorConfig::default()
    };
    PaymentOrchestrator::new(
        arbiter(),
        ProcessorRegistry::simulated(&ProcessorRegistryConfig::default()),
        Arc::new(RuleBasedFraudScreen::new(config.fraud_max_amount)),
        config,
    )
}

pub fn offline_config() -> OfflineConfig {
    OfflineConfig {
        signing_key: TEST_SIGNING_KEY.to_string(),
        qr_key: TEST_QR_KEY.to_string(),
        ..OfflineConfig::default()
    }
}

pub fn signer() -> Arc<HmacSigner> {
    Arc::new(HmacSigner::new(TEST_SIGNING_KEY).unwrap())
}

pub fn offline_services(store: Arc<dyn OfflineStore>) -> (OfflineCaptureService, OfflineSyncService) {
    let capture = OfflineCaptureService::new(
        store.clone(),
        signer(),
        Arc::new(AesGcmEnvelope::from_hex(TEST_QR_KEY).unwrap()),
        offline_config(),
    );
    let sync = OfflineSyncService::new(store, signer());
    (capture, sync)
}

pub fn app_state() -> AppState {
    let store: Arc<dyn OfflineStore> = Arc::new(InMemoryOfflineStore::new());
    let (capture, sync) = offline_services(store.clone());
    AppState {
        orchestrator: Arc::new(orchestrator()),
        capture: Arc::new(capture),
        sync: Arc::new(sync),
        health: HealthChecker::new(store),
    }
}
