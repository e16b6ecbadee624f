use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProcessor;
use crate::payments::providers::SimulatedProcessor;
use crate::payments::types::PaymentMethod;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

const ALL_METHODS: [PaymentMethod; 9] = [
    PaymentMethod::Card,
    PaymentMethod::BankTransfer,
    PaymentMethod::MobileMoney,
    PaymentMethod::Crypto,
    PaymentMethod::Upi,
    PaymentMethod::Alipay,
    PaymentMethod::Wechat,
    PaymentMethod::Ussd,
    PaymentMethod::QrCode,
];

fn default_fee_bps(method: PaymentMethod) -> u32 {
    match method {
        PaymentMethod::Card => 290,
        PaymentMethod::BankTransfer => 50,
        PaymentMethod::MobileMoney => 150,
        PaymentMethod::Crypto => 100,
        PaymentMethod::Upi => 30,
        PaymentMethod::Alipay | PaymentMethod::Wechat => 120,
        PaymentMethod::Ussd => 100,
        PaymentMethod::QrCode => 80,
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorRegistryConfig {
    pub enabled_methods: Vec<PaymentMethod>,
    pub fee_bps: HashMap<PaymentMethod, u32>,
}

impl Default for ProcessorRegistryConfig {
    fn default() -> Self {
        Self {
            enabled_methods: ALL_METHODS.to_vec(),
            fee_bps: ALL_METHODS
                .iter()
                .map(|m| (*m, default_fee_bps(*m)))
                .collect(),
        }
    }
}

impl ProcessorRegistryConfig {
    /// `ENABLED_PAYMENT_METHODS` is a comma separated list; `{METHOD}_FEE_BPS`
    /// overrides the simulated fee per method, e.g. `MOBILE_MONEY_FEE_BPS`.
    pub fn from_env() -> PaymentResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("ENABLED_PAYMENT_METHODS") {
            let mut enabled = Vec::new();
            for part in raw.split(',') {
                let value = part.trim();
                if value.is_empty() {
                    continue;
                }
                let method = PaymentMethod::from_str(value)?;
                if !enabled.contains(&method) {
                    enabled.push(method);
                }
            }
            if enabled.is_empty() {
                return Err(PaymentError::ValidationError {
                    message: "at least one payment method must be enabled".to_string(),
                    field: Some("ENABLED_PAYMENT_METHODS".to_string()),
                });
            }
            config.enabled_methods = enabled;
        }

        for method in ALL_METHODS {
            let key = format!("{}_FEE_BPS", method.as_str().to_uppercase());
            if let Some(bps) = std::env::var(&key).ok().and_then(|v| v.parse::<u32>().ok()) {
                config.fee_bps.insert(method, bps);
            }
        }

        Ok(config)
    }
}

/// Processor adapters keyed by the rail they serve.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<PaymentMethod, Arc<dyn PaymentProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `SimulatedProcessor` per enabled method.
    pub fn simulated(config: &ProcessorRegistryConfig) -> Self {
        let mut registry = Self::new();
        for method in &config.enabled_methods {
            let bps = config
                .fee_bps
                .get(method)
                .copied()
                .unwrap_or_else(|| default_fee_bps(*method));
            registry.register(Arc::new(SimulatedProcessor::new(*method, bps)));
        }
        registry
    }

    /// Replaces any processor already registered for the same method.
    pub fn register(&mut self, processor: Arc<dyn PaymentProcessor>) {
        self.processors.insert(processor.method(), processor);
    }

    pub fn with_processor(mut self, processor: Arc<dyn PaymentProcessor>) -> Self {
        self.register(processor);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> PaymentResult<Arc<dyn PaymentProcessor>> {
        self.processors
            .get(&method)
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedMethod {
                method: method.to_string(),
            })
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.processors.keys().copied().collect();
        methods.sort();
        methods
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
