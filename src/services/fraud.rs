//! Fraud screening collaborator

use crate::payments::types::TransactionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub is_suspicious: bool,
    pub risk_score: f64,
    pub reason: Option<String>,
}

impl FraudAssessment {
    pub fn clear(risk_score: f64) -> Self {
        Self {
            is_suspicious: false,
            risk_score,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FraudScreenError {
    #[error("Fraud screen {screen} unavailable: {message}")]
    Unavailable { screen: String, message: String },
}

#[async_trait]
pub trait FraudScreen: Send + Sync {
    async fn screen(&self, request: &TransactionRequest) -> Result<FraudAssessment, FraudScreenError>;

    fn name(&self) -> &str;
}

/// Amount and routing heuristics. Stands in for a scoring service in
/// deployments without one.
#[derive(Debug, Clone)]
pub struct RuleBasedFraudScreen {
    max_amount: f64,
    threshold: f64,
}

impl RuleBasedFraudScreen {
    pub fn new(max_amount: f64) -> Self {
        Self {
            max_amount,
            threshold: 0.8,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    fn assess(&self, request: &TransactionRequest) -> FraudAssessment {
        let mut risk: f64 = 0.05;
        let mut reasons = Vec::new();

        if request.amount > self.max_amount {
            risk += 0.85;
            reasons.push(format!(
                "amount {} exceeds screening limit {}",
                request.amount, self.max_amount
            ));
        } else if request.amount > self.max_amount * 0.5 {
            risk += 0.3;
        }

        if request.is_cross_border() {
            risk += 0.1;
        }
        if request.urgent {
            risk += 0.05;
        }

        let risk_score = risk.clamp(0.0, 1.0);
        if risk_score >= self.threshold {
            FraudAssessment {
                is_suspicious: true,
                risk_score,
                reason: Some(if reasons.is_empty() {
                    "combined risk above threshold".to_string()
                } else {
                    reasons.join("; ")
                }),
            }
        } else {
            FraudAssessment::clear(risk_score)
        }
    }
}

#[async_trait]
impl FraudScreen for RuleBasedFraudScreen {
    async fn screen(&self, request: &TransactionRequest) -> Result<FraudAssessment, FraudScreenError> {
        Ok(self.assess(request))
    }

    fn name(&self) -> &str {
        "rule_based"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{Currency, MethodSet, PaymentMethod};

    fn request(amount: f64) -> TransactionRequest {
        TransactionRequest::new(
            amount,
            Currency::Kes,
            "KE",
            MethodSet::single(PaymentMethod::MobileMoney),
        )
    }

    #[tokio::test]
    async fn ordinary_payment_is_clear() {
        let screen = RuleBasedFraudScreen::new(10_000.0);
        let assessment = screen.screen(&request(50.0)).await.unwrap();
        assert!(!assessment.is_suspicious);
        assert!(assessment.risk_score < 0.2);
    }

    #[tokio::test]
    async fn amount_over_limit_is_flagged() {
        let screen = RuleBasedFraudScreen::new(10_000.0);
        let assessment = screen.screen(&request(50_000.0)).await.unwrap();
        assert!(assessment.is_suspicious);
        assert!(assessment.reason.unwrap().contains("screening limit"));
    }

    #[tokio::test]
    async fn risk_factors_accumulate_against_threshold() {
        let screen = RuleBasedFraudScreen::new(10_000.0).with_threshold(0.45);
        let risky = request(6_000.0).with_destination("NG").urgent();
        let assessment = screen.screen(&risky).await.unwrap();
        assert!(assessment.is_suspicious);
        assert!((assessment.risk_score - 0.5).abs() < 1e-9);
    }
}
