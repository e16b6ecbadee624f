//! Regulation- and tax-aware method recommendation

use crate::compliance::provider::ComplianceScoreProvider;
use crate::compliance::types::{EfficiencyAssessment, ScoreSource};
use crate::config::{env_parse, ConfigError};
use crate::payments::types::{PaymentMethod, TransactionRequest};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Score assumed for the part of the decision compliance does not cover.
const NEUTRAL_BASELINE: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub regulatory_weight: f64,
    pub tax_weight: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            regulatory_weight: 0.4,
            tax_weight: 0.3,
        }
    }
}

impl OptimizerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_parse("COMPLIANCE_OPTIMIZATION_ENABLED", defaults.enabled)?,
            regulatory_weight: env_parse(
                "COMPLIANCE_REGULATORY_WEIGHT",
                defaults.regulatory_weight,
            )?,
            tax_weight: env_parse("COMPLIANCE_TAX_WEIGHT", defaults.tax_weight)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regulatory_weight < 0.0 || self.tax_weight < 0.0 {
            return Err(ConfigError::InvalidValue(
                "COMPLIANCE_REGULATORY_WEIGHT and COMPLIANCE_TAX_WEIGHT must be >= 0".to_string(),
            ));
        }
        if self.regulatory_weight + self.tax_weight > 1.0 {
            return Err(ConfigError::ValidationFailed(
                "compliance regulatory and tax weights must sum to at most 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodCompliance {
    pub regulatory: f64,
    pub tax: f64,
    pub combined: f64,
    pub source: ScoreSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRecommendation {
    pub recommended_method: PaymentMethod,
    pub optimized: bool,
    pub scores: BTreeMap<PaymentMethod, MethodCompliance>,
    pub explanation: String,
    pub cross_border: bool,
    pub source_region: String,
    pub destination_region: String,
}

impl ComplianceRecommendation {
    pub fn score(&self, method: PaymentMethod) -> Option<&MethodCompliance> {
        self.scores.get(&method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentationSource {
    Cache,
    FreshCalculation,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationRequirements {
    pub requirements: Vec<String>,
    pub source: DocumentationSource,
    pub timestamp: DateTime<Utc>,
}

type DocumentationKey = (String, PaymentMethod);

pub struct ComplianceOptimizer {
    provider: Arc<ComplianceScoreProvider>,
    config: OptimizerConfig,
    documentation: RwLock<HashMap<DocumentationKey, Vec<String>>>,
}

impl ComplianceOptimizer {
    pub fn new(provider: Arc<ComplianceScoreProvider>, config: OptimizerConfig) -> Self {
        Self {
            provider,
            config,
            documentation: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn provider(&self) -> &ComplianceScoreProvider {
        &self.provider
    }

    /// Score every available method on regulatory and tax efficiency and
    /// recommend the best one. Lookups for all methods run concurrently.
    pub async fn optimize(&self, request: &TransactionRequest) -> ComplianceRecommendation {
        let source = request.source().to_uppercase();
        let destination = request.destination().to_uppercase();
        let cross_border = request.is_cross_border();

        if !self.config.enabled {
            return ComplianceRecommendation {
                recommended_method: request.available_methods.first(),
                optimized: false,
                scores: BTreeMap::new(),
                explanation: "Regulatory optimization disabled".to_string(),
                cross_border,
                source_region: source,
                destination_region: destination,
            };
        }

        let assessments = join_all(request.available_methods.iter().map(|method| {
            let source = source.as_str();
            let destination = destination.as_str();
            async move {
                if cross_border {
                    self.provider
                        .calculate_cross_border_efficiency(source, destination, method)
                        .await
                } else {
                    self.provider
                        .calculate_regulatory_efficiency(source, method)
                        .await
                }
            }
        }))
        .await;

        let mut scores = BTreeMap::new();
        for assessment in &assessments {
            self.remember_documentation(&source, cross_border.then_some(destination.as_str()), assessment)
                .await;
            scores.insert(assessment.method, self.score(assessment));
        }

        let mut best = request.available_methods.first();
        let mut best_score = f64::MIN;
        for method in request.available_methods.iter() {
            let combined = scores.get(&method).map(|s| s.combined).unwrap_or(0.0);
            if combined > best_score {
                best_score = combined;
                best = method;
            }
        }

        let explanation = match scores.get(&best) {
            Some(score) => explain(best, score, &source, &destination, cross_border),
            None => "Recommended based on availability".to_string(),
        };
        debug!(method = %best, score = best_score, cross_border, "Compliance recommendation");

        ComplianceRecommendation {
            recommended_method: best,
            optimized: true,
            scores,
            explanation,
            cross_border,
            source_region: source,
            destination_region: destination,
        }
    }

    fn score(&self, assessment: &EfficiencyAssessment) -> MethodCompliance {
        let regulatory = assessment.efficiency_score;
        let tax = assessment.tax_efficiency_score;
        let neutral = 1.0 - self.config.regulatory_weight - self.config.tax_weight;
        MethodCompliance {
            regulatory,
            tax,
            combined: regulatory * self.config.regulatory_weight
                + tax * self.config.tax_weight
                + neutral * NEUTRAL_BASELINE,
            source: assessment.source,
        }
    }

    async fn remember_documentation(
        &self,
        source: &str,
        destination: Option<&str>,
        assessment: &EfficiencyAssessment,
    ) {
        if assessment.source == ScoreSource::Fallback {
            return;
        }
        self.documentation.write().await.insert(
            (scope(source, destination), assessment.method),
            assessment.documentation_requirements.clone(),
        );
    }

    /// Documents a customer must provide to pay with `method`.
    pub async fn documentation_requirements(
        &self,
        request: &TransactionRequest,
        method: PaymentMethod,
    ) -> DocumentationRequirements {
        let source = request.source().to_uppercase();
        let destination = request.destination().to_uppercase();
        let cross_border = request.is_cross_border();
        let key = (
            scope(&source, cross_border.then_some(destination.as_str())),
            method,
        );

        if let Some(requirements) = self.documentation.read().await.get(&key) {
            return DocumentationRequirements {
                requirements: requirements.clone(),
                source: DocumentationSource::Cache,
                timestamp: Utc::now(),
            };
        }

        let assessment = if cross_border {
            self.provider
                .calculate_cross_border_efficiency(&source, &destination, method)
                .await
        } else {
            self.provider
                .calculate_regulatory_efficiency(&source, method)
                .await
        };
        self.remember_documentation(&source, cross_border.then_some(destination.as_str()), &assessment)
            .await;

        if let Some(requirements) = self.documentation.read().await.get(&key) {
            return DocumentationRequirements {
                requirements: requirements.clone(),
                source: DocumentationSource::FreshCalculation,
                timestamp: Utc::now(),
            };
        }

        DocumentationRequirements {
            requirements: generic_requirements(method, cross_border),
            source: DocumentationSource::Generic,
            timestamp: Utc::now(),
        }
    }
}

fn scope(source: &str, destination: Option<&str>) -> String {
    match destination {
        Some(dest) => format!("{}_to_{}", source, dest),
        None => source.to_string(),
    }
}

fn generic_requirements(method: PaymentMethod, cross_border: bool) -> Vec<String> {
    let mut requirements = vec![
        "Government-issued photo ID".to_string(),
        "Proof of address".to_string(),
    ];
    match method {
        PaymentMethod::BankTransfer => requirements.push("Bank account verification".to_string()),
        PaymentMethod::MobileMoney | PaymentMethod::Ussd => {
            requirements.push("Registered mobile number".to_string())
        }
        PaymentMethod::Crypto => requirements.push("Wallet ownership attestation".to_string()),
        _ => {}
    }
    if cross_border {
        requirements.push("Source of funds declaration".to_string());
        requirements.push("Purpose of payment".to_string());
    }
    requirements
}

fn percent(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

fn explain(
    method: PaymentMethod,
    score: &MethodCompliance,
    source: &str,
    destination: &str,
    cross_border: bool,
) -> String {
    let mut explanation = format!("{} provides ", method);

    if score.regulatory > 0.7 {
        explanation.push_str(&format!(
            "strong regulatory efficiency ({}%)",
            percent(score.regulatory)
        ));
    } else if score.regulatory > 0.5 {
        explanation.push_str(&format!(
            "moderate regulatory efficiency ({}%)",
            percent(score.regulatory)
        ));
    } else {
        explanation.push_str("acceptable regulatory compliance");
    }

    if score.tax > 0.7 {
        explanation.push_str(&format!(" with excellent tax efficiency ({}%)", percent(score.tax)));
    } else if score.tax > 0.5 {
        explanation.push_str(&format!(" with good tax efficiency ({}%)", percent(score.tax)));
    } else {
        explanation.push_str(" with standard tax handling");
    }

    if cross_border {
        explanation.push_str(&format!(
            " for cross-border transactions from {} to {}",
            source, destination
        ));
    }
    explanation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::provider::tests::ScriptedKnowledge;
    use crate::compliance::provider::ComplianceConfig;
    use crate::payments::types::{Currency, MethodSet};

    fn optimizer(reply: &str, config: OptimizerConfig) -> ComplianceOptimizer {
        let provider = ComplianceScoreProvider::new(
            Arc::new(ScriptedKnowledge::answering(reply)),
            ComplianceConfig::default(),
        );
        ComplianceOptimizer::new(Arc::new(provider), config)
    }

    fn request() -> TransactionRequest {
        TransactionRequest::new(
            120.0,
            Currency::Kes,
            "KE",
            MethodSet::new(vec![PaymentMethod::Card, PaymentMethod::MobileMoney]).unwrap(),
        )
    }

    #[tokio::test]
    async fn disabled_optimizer_returns_first_method() {
        let optimizer = optimizer(
            "{}",
            OptimizerConfig {
                enabled: false,
                ..OptimizerConfig::default()
            },
        );
        let recommendation = optimizer.optimize(&request()).await;
        assert_eq!(recommendation.recommended_method, PaymentMethod::Card);
        assert!(!recommendation.optimized);
        assert!(recommendation.scores.is_empty());
    }

    #[tokio::test]
    async fn combined_score_blends_neutral_baseline() {
        let optimizer = optimizer(
            r#"{"efficiencyScore": 0.8, "taxEfficiencyScore": 0.6}"#,
            OptimizerConfig::default(),
        );
        let recommendation = optimizer.optimize(&request()).await;
        let card = recommendation.score(PaymentMethod::Card).unwrap();
        // 0.4*0.8 + 0.3*0.6 + 0.3*0.7
        assert!((card.combined - 0.71).abs() < 1e-9);
        // equal scores: list order wins
        assert_eq!(recommendation.recommended_method, PaymentMethod::Card);
        assert_eq!(
            recommendation.explanation,
            "card provides strong regulatory efficiency (80%) with good tax efficiency (60%)"
        );
    }

    #[tokio::test]
    async fn unreachable_knowledge_source_still_recommends() {
        let provider = ComplianceScoreProvider::new(
            Arc::new(ScriptedKnowledge::failing()),
            ComplianceConfig::default(),
        );
        let optimizer = ComplianceOptimizer::new(Arc::new(provider), OptimizerConfig::default());
        let recommendation = optimizer.optimize(&request()).await;
        assert!(request().available_methods.contains(recommendation.recommended_method));
        assert!(recommendation
            .scores
            .values()
            .all(|s| s.source == ScoreSource::Fallback));
    }

    #[tokio::test]
    async fn documentation_comes_from_cache_after_optimize() {
        let optimizer = optimizer(
            r#"{"efficiencyScore": 0.8, "documentationRequirements": ["National ID"]}"#,
            OptimizerConfig::default(),
        );
        let tx = request();

        let first = optimizer
            .documentation_requirements(&tx, PaymentMethod::MobileMoney)
            .await;
        assert_eq!(first.source, DocumentationSource::FreshCalculation);
        assert_eq!(first.requirements, vec!["National ID".to_string()]);

        optimizer.optimize(&tx).await;
        let second = optimizer
            .documentation_requirements(&tx, PaymentMethod::Card)
            .await;
        assert_eq!(second.source, DocumentationSource::Cache);
    }

    #[tokio::test]
    async fn documentation_falls_back_to_generic_list() {
        let provider = ComplianceScoreProvider::new(
            Arc::new(ScriptedKnowledge::failing()),
            ComplianceConfig::default(),
        );
        let optimizer = ComplianceOptimizer::new(Arc::new(provider), OptimizerConfig::default());
        let tx = request().with_destination("NG");
        let docs = optimizer
            .documentation_requirements(&tx, PaymentMethod::BankTransfer)
            .await;
        assert_eq!(docs.source, DocumentationSource::Generic);
        assert!(docs
            .requirements
            .contains(&"Source of funds declaration".to_string()));
    }

    #[test]
    fn explanation_mentions_cross_border_route() {
        let score = MethodCompliance {
            regulatory: 0.4,
            tax: 0.9,
            combined: 0.0,
            source: ScoreSource::Fresh,
        };
        assert_eq!(
            explain(PaymentMethod::Upi, &score, "IN", "GB", true),
            "upi provides acceptable regulatory compliance with excellent tax efficiency (90%) \
             for cross-border transactions from IN to GB"
        );
    }

    #[test]
    fn weights_over_one_are_rejected() {
        let config = OptimizerConfig {
            enabled: true,
            regulatory_weight: 0.7,
            tax_weight: 0.5,
        };
        assert!(config.validate().is_err());
    }
}
