//! Final routing decision
//!
//! The arbiter composes two capabilities: the learned baseline from
//! [`WeightedRoutingModel`] and, when configured, the regulation/tax view of
//! a [`ComplianceOptimizer`]. How they are merged is a configuration choice
//! ([`MergeStrategy`]). Every decision is explained, kept in a bounded
//! history, and can later be annotated with the processing outcome.

use crate::compliance::optimizer::{ComplianceOptimizer, ComplianceRecommendation};
use crate::config::{env_parse, ConfigError};
use crate::payments::types::{Currency, PaymentMethod, TransactionRequest};
use crate::routing::model::{Prediction, WeightedRoutingModel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const CROSS_BORDER_FACTOR_WEIGHT: f64 = 0.1;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Learned baseline, cost, regulatory and tax scores blended by weight
    Weighted,
    /// Learned baseline score only; the optimizer is never consulted
    BaselineOnly,
}

impl FromStr for MergeStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weighted" => Ok(MergeStrategy::Weighted),
            "baseline_only" | "baseline" => Ok(MergeStrategy::BaselineOnly),
            other => Err(ConfigError::InvalidValue(format!(
                "ARBITER_MERGE_STRATEGY: unknown strategy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub weight_success: f64,
    pub weight_cost: f64,
    pub weight_regulatory: f64,
    pub weight_tax: f64,
    pub merge_strategy: MergeStrategy,
    /// Multiplier applied to an explicit customer-preferred method
    pub user_preference_boost: f64,
    /// Upper bound on the compliance part of a decision
    pub decision_budget: Duration,
    pub history_cap: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            weight_success: 0.3,
            weight_cost: 0.2,
            weight_regulatory: 0.3,
            weight_tax: 0.2,
            merge_strategy: MergeStrategy::Weighted,
            user_preference_boost: 1.2,
            decision_budget: Duration::from_millis(1500),
            history_cap: 1000,
        }
    }
}

impl ArbiterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let merge_strategy = match std::env::var("ARBITER_MERGE_STRATEGY") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => defaults.merge_strategy,
        };

        Ok(Self {
            weight_success: env_parse("ARBITER_WEIGHT_SUCCESS", defaults.weight_success)?,
            weight_cost: env_parse("ARBITER_WEIGHT_COST", defaults.weight_cost)?,
            weight_regulatory: env_parse("ARBITER_WEIGHT_REGULATORY", defaults.weight_regulatory)?,
            weight_tax: env_parse("ARBITER_WEIGHT_TAX", defaults.weight_tax)?,
            merge_strategy,
            user_preference_boost: env_parse(
                "ARBITER_USER_PREFERENCE_BOOST",
                defaults.user_preference_boost,
            )?,
            decision_budget: Duration::from_millis(env_parse(
                "ARBITER_DECISION_BUDGET_MS",
                defaults.decision_budget.as_millis() as u64,
            )?),
            history_cap: env_parse("ARBITER_HISTORY_CAP", defaults.history_cap)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            ("ARBITER_WEIGHT_SUCCESS", self.weight_success),
            ("ARBITER_WEIGHT_COST", self.weight_cost),
            ("ARBITER_WEIGHT_REGULATORY", self.weight_regulatory),
            ("ARBITER_WEIGHT_TAX", self.weight_tax),
        ];
        for (name, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be in [0, 1]",
                    name
                )));
            }
        }

        let sum: f64 = weights.iter().map(|(_, w)| w).sum();
        if sum <= 0.0 || sum > 1.0 + 1e-9 {
            return Err(ConfigError::ValidationFailed(format!(
                "arbiter weights must sum to a value in (0, 1], got {:.3}",
                sum
            )));
        }
        if self.user_preference_boost < 1.0 {
            return Err(ConfigError::InvalidValue(
                "ARBITER_USER_PREFERENCE_BOOST must be >= 1".to_string(),
            ));
        }
        if self.history_cap == 0 {
            return Err(ConfigError::InvalidValue(
                "ARBITER_HISTORY_CAP must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Decision types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodScore {
    pub baseline: f64,
    pub cost: f64,
    /// Absent when compliance was not evaluated for this decision
    pub regulatory: Option<f64>,
    pub tax: Option<f64>,
    pub combined: f64,
    pub confidence: f64,
}

/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub transaction_id: String,
    pub chosen_method: PaymentMethod,
    pub scores: BTreeMap<PaymentMethod, MethodScore>,
    pub reasoning: String,
    pub regulatory_override: bool,
    pub user_preference_override: bool,
    pub confidence: f64,
    pub compliance_evaluated: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub method: PaymentMethod,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Audit entry for one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: RoutingDecision,
    pub baseline_method: PaymentMethod,
    pub compliance_method: Option<PaymentMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_explanation: Option<String>,
    pub source_region: String,
    pub destination_region: String,
    pub amount: f64,
    pub currency: Currency,
    pub cross_border: bool,
    pub outcome: Option<DecisionOutcome>,
}

struct Factor {
    weight: f64,
    description: String,
}

fn percent(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

// ============================================================================
// Arbiter
// ============================================================================

pub struct RoutingArbiter {
    model: Arc<WeightedRoutingModel>,
    optimizer: Option<Arc<ComplianceOptimizer>>,
    config: ArbiterConfig,
    history: RwLock<VecDeque<DecisionRecord>>,
}

impl RoutingArbiter {
    pub fn new(model: Arc<WeightedRoutingModel>, config: ArbiterConfig) -> Self {
        Self {
            model,
            optimizer: None,
            config,
            history: RwLock::new(VecDeque::new()),
        }
    }

    pub fn with_optimizer(mut self, optimizer: Arc<ComplianceOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn model(&self) -> &Arc<WeightedRoutingModel> {
        &self.model
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Choose a method for `request`. Always returns a member of the
    /// request's available methods; compliance problems only reduce the
    /// inputs the decision is based on.
    pub async fn decide(&self, transaction_id: &str, request: &TransactionRequest) -> RoutingDecision {
        let prediction = self.model.predict(request);
        let recommendation = self.evaluate_compliance(transaction_id, request).await;

        let mut scores = BTreeMap::new();
        for method in request.available_methods.iter() {
            scores.insert(method, self.score(method, &prediction, recommendation.as_ref()));
        }

        let preferred = request
            .preferred_method
            .filter(|m| request.available_methods.contains(*m));
        if let Some(method) = preferred {
            if let Some(score) = scores.get_mut(&method) {
                score.combined *= self.config.user_preference_boost;
            }
        }

        let mut chosen = request.available_methods.first();
        let mut best = f64::MIN;
        for method in request.available_methods.iter() {
            let combined = scores.get(&method).map(|s| s.combined).unwrap_or(0.0);
            if combined > best {
                best = combined;
                chosen = method;
            }
        }

        let baseline_method = prediction.predicted_method;
        let combined_of = |m: PaymentMethod| scores.get(&m).map(|s| s.combined).unwrap_or(0.0);
        let regulatory_override = chosen != baseline_method && combined_of(chosen) > combined_of(baseline_method);
        let user_preference_override = preferred.is_some_and(|p| p != chosen);

        let reasoning = self.reasoning(
            chosen,
            &prediction,
            recommendation.as_ref(),
            preferred,
        );

        let decision = RoutingDecision {
            transaction_id: transaction_id.to_string(),
            chosen_method: chosen,
            confidence: if prediction.fallback {
                0.0
            } else {
                best.clamp(0.0, 1.0)
            },
            scores,
            reasoning,
            regulatory_override,
            user_preference_override,
            compliance_evaluated: recommendation.is_some(),
            timestamp: Utc::now(),
        };

        info!(
            transaction_id = %transaction_id,
            method = %decision.chosen_method,
            baseline_method = %baseline_method,
            confidence = decision.confidence,
            regulatory_override,
            user_preference_override,
            "Routing decision made"
        );

        self.remember(DecisionRecord {
            decision: decision.clone(),
            baseline_method,
            compliance_method: recommendation.as_ref().map(|r| r.recommended_method),
            compliance_explanation: recommendation.map(|r| r.explanation),
            source_region: request.source().to_uppercase(),
            destination_region: request.destination().to_uppercase(),
            amount: request.amount,
            currency: request.currency,
            cross_border: request.is_cross_border(),
            outcome: None,
        })
        .await;

        decision
    }

    async fn evaluate_compliance(
        &self,
        transaction_id: &str,
        request: &TransactionRequest,
    ) -> Option<ComplianceRecommendation> {
        if self.config.merge_strategy == MergeStrategy::BaselineOnly {
            return None;
        }
        let optimizer = self.optimizer.as_ref()?;

        match tokio::time::timeout(self.config.decision_budget, optimizer.optimize(request)).await {
            Ok(recommendation) if recommendation.optimized => Some(recommendation),
            Ok(_) => None,
            Err(_) => {
                warn!(
                    transaction_id = %transaction_id,
                    budget_ms = self.config.decision_budget.as_millis() as u64,
                    "Compliance evaluation exceeded decision budget, routing on baseline"
                );
                None
            }
        }
    }

    fn score(
        &self,
        method: PaymentMethod,
        prediction: &Prediction,
        recommendation: Option<&ComplianceRecommendation>,
    ) -> MethodScore {
        let baseline = prediction.score(method);
        let cost = self.model.cost_efficiency(method);
        let compliance = recommendation.and_then(|r| r.score(method));

        let combined = match self.config.merge_strategy {
            MergeStrategy::BaselineOnly => baseline,
            MergeStrategy::Weighted => {
                let mut combined =
                    baseline * self.config.weight_success + cost * self.config.weight_cost;
                if let Some(c) = compliance {
                    combined += c.regulatory * self.config.weight_regulatory
                        + c.tax * self.config.weight_tax;
                }
                combined
            }
        };

        MethodScore {
            baseline,
            cost,
            regulatory: compliance.map(|c| c.regulatory),
            tax: compliance.map(|c| c.tax),
            combined,
            confidence: if prediction.fallback {
                0.0
            } else {
                compliance.map(|c| c.source.confidence()).unwrap_or(1.0)
            },
        }
    }

    fn reasoning(
        &self,
        chosen: PaymentMethod,
        prediction: &Prediction,
        recommendation: Option<&ComplianceRecommendation>,
        preferred: Option<PaymentMethod>,
    ) -> String {
        let mut factors = Vec::new();

        if prediction.predicted_method == chosen && !prediction.fallback {
            factors.push(Factor {
                weight: self.config.weight_success,
                description: format!(
                    "high success probability ({}%)",
                    percent(prediction.score(chosen))
                ),
            });
            if self.config.merge_strategy == MergeStrategy::Weighted {
                factors.push(Factor {
                    weight: self.config.weight_cost,
                    description: format!(
                        "competitive processing fees ({}% efficiency)",
                        percent(self.model.cost_efficiency(chosen))
                    ),
                });
            }
        }

        if let Some(rec) = recommendation.filter(|r| r.recommended_method == chosen) {
            if let Some(score) = rec.score(chosen) {
                factors.push(Factor {
                    weight: self.config.weight_regulatory,
                    description: format!(
                        "minimal regulatory overhead ({}% efficiency)",
                        percent(score.regulatory)
                    ),
                });
                factors.push(Factor {
                    weight: self.config.weight_tax,
                    description: format!("tax optimization ({}% efficiency)", percent(score.tax)),
                });
            }
            if rec.cross_border {
                factors.push(Factor {
                    weight: CROSS_BORDER_FACTOR_WEIGHT,
                    description: "cross-border payment optimization".to_string(),
                });
            }
        }

        if preferred == Some(chosen) {
            factors.push(Factor {
                weight: self.config.user_preference_boost - 1.0,
                description: "customer preference".to_string(),
            });
        }

        factors.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let listed = if factors.is_empty() {
            "balanced performance across multiple factors".to_string()
        } else {
            factors
                .into_iter()
                .map(|f| f.description)
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!("{} is recommended based on {}", chosen, listed)
    }

    async fn remember(&self, record: DecisionRecord) {
        let mut history = self.history.write().await;
        history.push_back(record);
        while history.len() > self.config.history_cap {
            history.pop_front();
        }
    }

    /// Attach the processing outcome to a past decision. The decision itself
    /// is never altered and an outcome is recorded at most once.
    pub async fn record_outcome(
        &self,
        transaction_id: &str,
        method: PaymentMethod,
        success: bool,
    ) -> bool {
        let mut history = self.history.write().await;
        let Some(record) = history
            .iter_mut()
            .rev()
            .find(|r| r.decision.transaction_id == transaction_id)
        else {
            debug!(transaction_id = %transaction_id, "No routing decision to attach outcome to");
            return false;
        };
        if record.outcome.is_some() {
            return false;
        }
        record.outcome = Some(DecisionOutcome {
            method,
            success,
            recorded_at: Utc::now(),
        });
        true
    }

    /// Most recent decisions first.
    pub async fn history(&self, limit: usize) -> Vec<DecisionRecord> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn decision(&self, transaction_id: &str) -> Option<DecisionRecord> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.decision.transaction_id == transaction_id)
            .cloned()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::knowledge::{
        Completion, KnowledgeAnswer, KnowledgeResult, KnowledgeSource,
    };
    use crate::compliance::optimizer::OptimizerConfig;
    use crate::compliance::provider::tests::ScriptedKnowledge;
    use crate::compliance::provider::{ComplianceConfig, ComplianceScoreProvider};
    use crate::payments::types::MethodSet;
    use crate::routing::model::ModelConfig;
    use async_trait::async_trait;

    fn kenya_request() -> TransactionRequest {
        TransactionRequest::new(
            50.0,
            Currency::Kes,
            "KE",
            MethodSet::new(vec![PaymentMethod::Card, PaymentMethod::MobileMoney]).unwrap(),
        )
    }

    fn arbiter_with(source: Arc<dyn KnowledgeSource>, config: ArbiterConfig) -> RoutingArbiter {
        let provider = ComplianceScoreProvider::new(source, ComplianceConfig::default());
        let optimizer = ComplianceOptimizer::new(Arc::new(provider), OptimizerConfig::default());
        RoutingArbiter::new(
            Arc::new(WeightedRoutingModel::new(ModelConfig::default())),
            config,
        )
        .with_optimizer(Arc::new(optimizer))
    }

    struct StalledKnowledge;

    #[async_trait]
    impl KnowledgeSource for StalledKnowledge {
        async fn answer_question(&self, _prompt: &str) -> KnowledgeResult<KnowledgeAnswer> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(KnowledgeAnswer {
                answer: String::new(),
                sources: Vec::new(),
            })
        }

        async fn generate_completion(&self, _prompt: &str) -> KnowledgeResult<Completion> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Completion {
                text: String::new(),
            })
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    /// Answers instantly with a long run of unclosed braces.
    struct BraceFloodKnowledge;

    #[async_trait]
    impl KnowledgeSource for BraceFloodKnowledge {
        async fn answer_question(&self, _prompt: &str) -> KnowledgeResult<KnowledgeAnswer> {
            Ok(KnowledgeAnswer {
                answer: "{".repeat(64 * 1024),
                sources: Vec::new(),
            })
        }

        async fn generate_completion(&self, _prompt: &str) -> KnowledgeResult<Completion> {
            Ok(Completion {
                text: "{".repeat(64 * 1024),
            })
        }

        fn name(&self) -> &str {
            "brace-flood"
        }
    }

    #[tokio::test]
    async fn baseline_only_picks_mobile_money_in_kenya() {
        let arbiter = RoutingArbiter::new(
            Arc::new(WeightedRoutingModel::new(ModelConfig::default())),
            ArbiterConfig {
                merge_strategy: MergeStrategy::BaselineOnly,
                ..ArbiterConfig::default()
            },
        );
        let decision = arbiter.decide("TXN-1", &kenya_request()).await;
        assert_eq!(decision.chosen_method, PaymentMethod::MobileMoney);
        assert!(!decision.compliance_evaluated);
        assert!(!decision.regulatory_override);
        assert!(decision.reasoning.starts_with("mobile_money is recommended based on high success probability"));
    }

    #[tokio::test]
    async fn failing_compliance_still_produces_a_decision() {
        let arbiter = arbiter_with(Arc::new(ScriptedKnowledge::failing()), ArbiterConfig::default());
        let request = kenya_request();
        let decision = arbiter.decide("TXN-2", &request).await;

        assert!(request.available_methods.contains(decision.chosen_method));
        assert!((0.0..=1.0).contains(&decision.confidence));
        assert_eq!(decision.chosen_method, PaymentMethod::MobileMoney);
        let score = decision.scores[&PaymentMethod::MobileMoney];
        assert_eq!(score.regulatory, Some(0.5));
        assert!((score.confidence - 0.3).abs() < 1e-12);
    }

    #[tokio::test]
    async fn stalled_compliance_is_cut_off_by_budget() {
        let arbiter = arbiter_with(
            Arc::new(StalledKnowledge),
            ArbiterConfig {
                decision_budget: Duration::from_millis(20),
                ..ArbiterConfig::default()
            },
        );
        let started = std::time::Instant::now();
        let decision = arbiter.decide("TXN-3", &kenya_request()).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!decision.compliance_evaluated);
        assert_eq!(decision.chosen_method, PaymentMethod::MobileMoney);
    }

    #[tokio::test]
    async fn malformed_answers_stay_within_decision_budget() {
        let arbiter = arbiter_with(
            Arc::new(BraceFloodKnowledge),
            ArbiterConfig {
                decision_budget: Duration::from_millis(100),
                ..ArbiterConfig::default()
            },
        );
        let started = std::time::Instant::now();
        let decision = arbiter.decide("TXN-6", &kenya_request()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(decision.chosen_method, PaymentMethod::MobileMoney);
    }

    #[tokio::test]
    async fn user_preference_is_boosted_and_reported() {
        let arbiter = RoutingArbiter::new(
            Arc::new(WeightedRoutingModel::new(ModelConfig::default())),
            ArbiterConfig::default(),
        );
        let request = kenya_request().with_preferred_method(PaymentMethod::Card);
        let decision = arbiter.decide("TXN-4", &request).await;

        // card: (0.3*0.65025 + 0.2*0.45) * 1.2 < mobile money: 0.3*0.96975 + 0.2*0.55
        assert_eq!(decision.chosen_method, PaymentMethod::MobileMoney);
        assert!(decision.user_preference_override);

        let preferred = kenya_request().with_preferred_method(PaymentMethod::MobileMoney);
        let decision = arbiter.decide("TXN-5", &preferred).await;
        assert!(!decision.user_preference_override);
        assert!(decision.reasoning.contains("customer preference"));
    }

    #[tokio::test]
    async fn history_is_bounded_and_outcomes_recorded_once() {
        let arbiter = RoutingArbiter::new(
            Arc::new(WeightedRoutingModel::new(ModelConfig::default())),
            ArbiterConfig {
                history_cap: 2,
                ..ArbiterConfig::default()
            },
        );
        for id in ["TXN-a", "TXN-b", "TXN-c"] {
            arbiter.decide(id, &kenya_request()).await;
        }
        assert_eq!(arbiter.history_len().await, 2);
        assert!(arbiter.decision("TXN-a").await.is_none());
        assert_eq!(arbiter.history(1).await[0].decision.transaction_id, "TXN-c");

        assert!(arbiter.record_outcome("TXN-b", PaymentMethod::MobileMoney, true).await);
        assert!(!arbiter.record_outcome("TXN-b", PaymentMethod::MobileMoney, false).await);
        let record = arbiter.decision("TXN-b").await.unwrap();
        assert!(record.outcome.unwrap().success);
    }

    #[test]
    fn weights_are_validated() {
        assert!(ArbiterConfig::default().validate().is_ok());
        let heavy = ArbiterConfig {
            weight_success: 0.9,
            ..ArbiterConfig::default()
        };
        assert!(heavy.validate().is_err());
        assert!("sideways".parse::<MergeStrategy>().is_err());
        assert_eq!(
            "baseline_only".parse::<MergeStrategy>().unwrap(),
            MergeStrategy::BaselineOnly
        );
    }
}
