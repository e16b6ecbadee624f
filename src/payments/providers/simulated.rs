//! In-process processor used for development, demos and tests.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{PaymentMethod, ProcessorRequest, ProcessorResponse, ProcessorStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedBehaviour {
    Approve,
    Decline,
    /// Fail with a retryable network error this many times, then approve
    FailTransient(u32),
    /// Every call fails with a non-retryable processor error
    Unavailable,
}

pub struct SimulatedProcessor {
    method: PaymentMethod,
    name: String,
    fee_bps: u32,
    latency: Duration,
    behaviour: SimulatedBehaviour,
    remaining_failures: AtomicU32,
}

impl SimulatedProcessor {
    pub fn new(method: PaymentMethod, fee_bps: u32) -> Self {
        Self {
            method,
            name: format!("simulated_{}", method),
            fee_bps,
            latency: Duration::ZERO,
            behaviour: SimulatedBehaviour::Approve,
            remaining_failures: AtomicU32::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_behaviour(mut self, behaviour: SimulatedBehaviour) -> Self {
        if let SimulatedBehaviour::FailTransient(n) = behaviour {
            self.remaining_failures = AtomicU32::new(n);
        }
        self.behaviour = behaviour;
        self
    }

    fn fee(&self, amount: f64) -> f64 {
        ((amount * self.fee_bps as f64 / 10_000.0) * 100.0).round() / 100.0
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn process(&self, request: ProcessorRequest) -> PaymentResult<ProcessorResponse> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.behaviour {
            SimulatedBehaviour::Approve => {}
            SimulatedBehaviour::Decline => {
                return Ok(ProcessorResponse {
                    success: false,
                    transaction_id: format!("{}_{}", self.name, request.transaction_id),
                    status: ProcessorStatus::Declined,
                    fee: None,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    message: Some("Declined by issuer".to_string()),
                });
            }
            SimulatedBehaviour::FailTransient(_) => {
                let failed = self
                    .remaining_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failed {
                    return Err(PaymentError::NetworkError {
                        message: format!("{} temporarily unreachable", self.name),
                    });
                }
            }
            SimulatedBehaviour::Unavailable => {
                return Err(PaymentError::ProcessorError {
                    processor: self.name.clone(),
                    message: "processor unavailable".to_string(),
                    retryable: false,
                });
            }
        }

        debug!(
            processor = %self.name,
            transaction_id = %request.transaction_id,
            amount = request.amount,
            "Simulated charge approved"
        );
        Ok(ProcessorResponse {
            success: true,
            transaction_id: format!("{}_{}", self.name, request.transaction_id),
            status: ProcessorStatus::Success,
            fee: Some(self.fee(request.amount)),
            processing_time_ms: started.elapsed().as_millis() as u64,
            message: None,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn method(&self) -> PaymentMethod {
        self.method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::Currency;
    use std::collections::HashMap;

    fn request() -> ProcessorRequest {
        ProcessorRequest {
            transaction_id: "TXN-1".to_string(),
            amount: 1000.0,
            currency: Currency::Kes,
            method: PaymentMethod::MobileMoney,
            customer_id: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn approve_charges_fee_in_basis_points() {
        let processor = SimulatedProcessor::new(PaymentMethod::MobileMoney, 150);
        let response = processor.process(request()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.fee, Some(15.0));
    }

    #[tokio::test]
    async fn transient_failures_run_out() {
        let processor = SimulatedProcessor::new(PaymentMethod::MobileMoney, 150)
            .with_behaviour(SimulatedBehaviour::FailTransient(2));
        for _ in 0..2 {
            let err = processor.process(request()).await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(processor.process(request()).await.unwrap().success);
    }

    #[tokio::test]
    async fn unavailable_is_not_retryable() {
        let processor = SimulatedProcessor::new(PaymentMethod::Card, 290)
            .with_behaviour(SimulatedBehaviour::Unavailable);
        assert!(!processor.process(request()).await.unwrap_err().is_retryable());
    }
}
