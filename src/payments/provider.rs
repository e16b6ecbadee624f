use crate::payments::error::PaymentResult;
use crate::payments::types::{Currency, PaymentMethod, ProcessorRequest, ProcessorResponse};
use async_trait::async_trait;

/// Adapter for one payment rail.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn process(&self, request: ProcessorRequest) -> PaymentResult<ProcessorResponse>;

    fn name(&self) -> &str;

    fn method(&self) -> PaymentMethod;

    /// Empty means every currency is accepted.
    fn supported_currencies(&self) -> &[Currency] {
        &[]
    }

    fn supports(&self, currency: Currency) -> bool {
        let supported = self.supported_currencies();
        supported.is_empty() || supported.contains(&currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::ProcessorStatus;
    use std::collections::HashMap;

    struct MockProcessor;

    #[async_trait]
    impl PaymentProcessor for MockProcessor {
        async fn process(&self, request: ProcessorRequest) -> PaymentResult<ProcessorResponse> {
            Ok(ProcessorResponse {
                success: true,
                transaction_id: format!("mock_{}", request.transaction_id),
                status: ProcessorStatus::Success,
                fee: Some(request.amount * 0.01),
                processing_time_ms: 5,
                message: None,
            })
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn method(&self) -> PaymentMethod {
            PaymentMethod::Upi
        }

        fn supported_currencies(&self) -> &[Currency] {
            &[Currency::Inr]
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_processor() {
        let processor: Box<dyn PaymentProcessor> = Box::new(MockProcessor);
        assert!(processor.supports(Currency::Inr));
        assert!(!processor.supports(Currency::Usd));

        let response = processor
            .process(ProcessorRequest {
                transaction_id: "TXN-1".to_string(),
                amount: 500.0,
                currency: Currency::Inr,
                method: PaymentMethod::Upi,
                customer_id: None,
                metadata: HashMap::new(),
            })
            .await
            .expect("processing should succeed");
        assert_eq!(response.status, ProcessorStatus::Success);
        assert_eq!(response.fee, Some(5.0));
    }
}
