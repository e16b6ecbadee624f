//! Online-learning routing model
//!
//! Scores each candidate method with a baseline success probability built
//! from learned weights, and adapts those weights from observed outcomes
//! with a decayed-average update. Every weight lives in its own cell so
//! concurrent `learn` calls only contend when they touch the same key.

use crate::config::{env_parse, ConfigError};
use crate::payments::types::{
    Currency, PaymentMethod, ProcessingPerformance, TransactionRequest,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::Hash;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, warn};

/// Amount at which the cost factor stops contributing to the score.
const COST_NORMALIZATION_AMOUNT: f64 = 10_000.0;
/// Processing time that maps to zero time-efficiency.
const TIME_EFFICIENCY_CEILING_MS: f64 = 5_000.0;
const COUNTRY_DECAY: f64 = 0.95;
const COST_DECAY: f64 = 0.9;
const TIME_DECAY: f64 = 0.95;
const METHOD_VOLUME_SATURATION: f64 = 100.0;
const CUSTOMER_VOLUME_SATURATION: f64 = 10.0;
const PREFERENCE_MULTIPLIER: f64 = 1.5;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub learning_rate: f64,
    /// Maximum number of outcomes retained for volume weighting and insights
    pub max_history: usize,
    /// Where the JSON snapshot store writes, if file persistence is used
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            max_history: 10_000,
            snapshot_path: None,
        }
    }
}

impl ModelConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            learning_rate: env_parse("ROUTING_LEARNING_RATE", defaults.learning_rate)?,
            max_history: env_parse("ROUTING_MAX_HISTORY", defaults.max_history)?,
            snapshot_path: std::env::var("ROUTING_MODEL_PATH").ok().map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "ROUTING_LEARNING_RATE must be in (0, 1]".to_string(),
            ));
        }
        if self.max_history == 0 {
            return Err(ConfigError::InvalidValue(
                "ROUTING_MAX_HISTORY must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Persistent state
// ============================================================================

/// Learned weights. Keys for the composite tables are `COUNTRY:method`
/// and `customer:method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub country_factors: HashMap<String, f64>,
    pub method_success_rates: HashMap<PaymentMethod, f64>,
    pub cost_factors: HashMap<PaymentMethod, f64>,
    pub time_factors: HashMap<PaymentMethod, f64>,
    pub user_preferences: HashMap<String, f64>,
}

impl Default for ModelWeights {
    fn default() -> Self {
        use PaymentMethod::*;

        let country_factors = [
            ("US", Card, 0.2),
            ("US", BankTransfer, 0.1),
            ("IN", Upi, 0.3),
            ("IN", Card, 0.1),
            ("KE", MobileMoney, 0.3),
            ("KE", Card, 0.05),
            ("GB", Card, 0.2),
            ("GB", BankTransfer, 0.15),
            ("CN", Alipay, 0.3),
            ("CN", Wechat, 0.25),
        ]
        .into_iter()
        .map(|(country, method, weight)| (country_key(country, method), weight))
        .collect();

        let method_success_rates = HashMap::from([
            (Card, 0.15),
            (BankTransfer, 0.1),
            (MobileMoney, 0.12),
            (Crypto, 0.05),
            (Upi, 0.15),
            (Alipay, 0.15),
            (Wechat, 0.15),
        ]);

        let cost_factors = HashMap::from([
            (Card, -0.05),
            (BankTransfer, 0.1),
            (MobileMoney, 0.05),
            (Crypto, -0.1),
            (Upi, 0.15),
            (Alipay, 0.05),
            (Wechat, 0.05),
        ]);

        let time_factors = HashMap::from([
            (Card, 0.1),
            (BankTransfer, -0.1),
            (MobileMoney, 0.05),
            (Crypto, -0.05),
            (Upi, 0.15),
            (Alipay, 0.1),
            (Wechat, 0.1),
        ]);

        Self {
            country_factors,
            method_success_rates,
            cost_factors,
            time_factors,
            user_preferences: HashMap::new(),
        }
    }
}

pub fn country_key(country: &str, method: PaymentMethod) -> String {
    format!("{}:{}", country.trim().to_uppercase(), method.as_str())
}

pub fn preference_key(customer_id: &str, method: PaymentMethod) -> String {
    format!("{}:{}", customer_id, method.as_str())
}

/// One observed outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub country: String,
    pub currency: Currency,
    pub amount: f64,
    pub method: PaymentMethod,
    pub success: bool,
    pub cost: Option<f64>,
    pub processing_time_ms: Option<u64>,
    pub customer_id: Option<String>,
}

/// Everything needed to rebuild a model after restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub saved_at: DateTime<Utc>,
    pub weights: ModelWeights,
    #[serde(default)]
    pub history: Vec<OutcomeRecord>,
}

// ============================================================================
// Prediction & insight types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_method: PaymentMethod,
    pub confidence: f64,
    pub scores: HashMap<PaymentMethod, f64>,
    /// Set when scoring failed and the first available method was returned
    pub fallback: bool,
}

impl Prediction {
    fn fallback(request: &TransactionRequest) -> Self {
        Self {
            predicted_method: request.available_methods.first(),
            confidence: 0.0,
            scores: HashMap::new(),
            fallback: true,
        }
    }

    pub fn score(&self, method: PaymentMethod) -> f64 {
        self.scores.get(&method).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsightFilters {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub country: Option<String>,
    pub currency: Option<Currency>,
    pub method: Option<PaymentMethod>,
}

impl InsightFilters {
    fn matches(&self, record: &OutcomeRecord) -> bool {
        if self.start.is_some_and(|start| record.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| record.timestamp > end) {
            return false;
        }
        if let Some(country) = &self.country {
            if !country.eq_ignore_ascii_case(&record.country) {
                return false;
            }
        }
        if self.currency.is_some_and(|c| c != record.currency) {
            return false;
        }
        if self.method.is_some_and(|m| m != record.method) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MethodInsight {
    pub total: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub total_amount: f64,
    pub average_amount: f64,
    pub average_processing_time_ms: Option<f64>,
    #[serde(skip)]
    timed_samples: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingInsights {
    pub methods: BTreeMap<PaymentMethod, MethodInsight>,
    pub country_preferences: BTreeMap<String, BTreeMap<PaymentMethod, f64>>,
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub overall_success_rate: f64,
}

// ============================================================================
// Concurrent storage
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map of independently locked weight cells.
struct WeightTable<K> {
    cells: RwLock<HashMap<K, Arc<Mutex<f64>>>>,
}

impl<K: Eq + Hash + Clone> WeightTable<K> {
    fn from_map(values: HashMap<K, f64>) -> Self {
        Self {
            cells: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k, Arc::new(Mutex::new(v))))
                    .collect(),
            ),
        }
    }

    fn get(&self, key: &K) -> f64 {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.get(key).map(|cell| *lock(cell)).unwrap_or(0.0)
    }

    /// Atomic read-modify-write of a single key; returns the new value.
    fn update(&self, key: K, apply: impl FnOnce(f64) -> f64) -> f64 {
        let existing = {
            let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
            cells.get(&key).cloned()
        };
        let cell = match existing {
            Some(cell) => cell,
            None => {
                let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
                cells
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(0.0)))
                    .clone()
            }
        };
        let mut value = lock(&cell);
        *value = apply(*value);
        *value
    }

    fn to_map(&self) -> HashMap<K, f64> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells
            .iter()
            .map(|(k, cell)| (k.clone(), *lock(cell)))
            .collect()
    }
}

/// Bounded outcome history with volume counters kept in step.
struct OutcomeHistory {
    records: VecDeque<OutcomeRecord>,
    method_volume: HashMap<PaymentMethod, u64>,
    customer_volume: HashMap<String, u64>,
    capacity: usize,
}

impl OutcomeHistory {
    fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            method_volume: HashMap::new(),
            customer_volume: HashMap::new(),
            capacity,
        }
    }

    /// Returns the method and customer volumes including `record`.
    fn push(&mut self, record: OutcomeRecord) -> (u64, u64) {
        while self.records.len() >= self.capacity {
            match self.records.pop_front() {
                Some(evicted) => self.forget(&evicted),
                None => break,
            }
        }

        let method_count = {
            let count = self.method_volume.entry(record.method).or_insert(0);
            *count += 1;
            *count
        };
        let customer_count = match &record.customer_id {
            Some(customer) => {
                let count = self.customer_volume.entry(customer.clone()).or_insert(0);
                *count += 1;
                *count
            }
            None => 0,
        };

        self.records.push_back(record);
        (method_count, customer_count)
    }

    fn forget(&mut self, record: &OutcomeRecord) {
        if let Some(count) = self.method_volume.get_mut(&record.method) {
            *count = count.saturating_sub(1);
        }
        if let Some(customer) = &record.customer_id {
            if let Some(count) = self.customer_volume.get_mut(customer) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.customer_volume.remove(customer);
                }
            }
        }
    }
}

// ============================================================================
// Model
// ============================================================================

pub struct WeightedRoutingModel {
    config: ModelConfig,
    country_factors: WeightTable<String>,
    method_success_rates: WeightTable<PaymentMethod>,
    cost_factors: WeightTable<PaymentMethod>,
    time_factors: WeightTable<PaymentMethod>,
    user_preferences: WeightTable<String>,
    history: Mutex<OutcomeHistory>,
}

impl WeightedRoutingModel {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_weights(config, ModelWeights::default())
    }

    pub fn with_weights(config: ModelConfig, weights: ModelWeights) -> Self {
        let history = OutcomeHistory::new(config.max_history.max(1));
        Self {
            country_factors: WeightTable::from_map(weights.country_factors),
            method_success_rates: WeightTable::from_map(weights.method_success_rates),
            cost_factors: WeightTable::from_map(weights.cost_factors),
            time_factors: WeightTable::from_map(weights.time_factors),
            user_preferences: WeightTable::from_map(weights.user_preferences),
            history: Mutex::new(history),
            config,
        }
    }

    /// Rebuild from a persisted snapshot, replaying history for volume counters.
    pub fn from_snapshot(config: ModelConfig, snapshot: ModelSnapshot) -> Self {
        let model = Self::with_weights(config, snapshot.weights);
        {
            let mut history = lock(&model.history);
            for record in snapshot.history {
                history.push(record);
            }
        }
        model
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    /// Baseline score per available method. Never fails: on a non-finite
    /// intermediate the first available method is returned with zero confidence.
    pub fn predict(&self, request: &TransactionRequest) -> Prediction {
        match self.try_predict(request) {
            Some(prediction) => prediction,
            None => {
                warn!(
                    amount = request.amount,
                    methods = request.available_methods.len(),
                    "Routing model produced a non-finite score, falling back to first method"
                );
                Prediction::fallback(request)
            }
        }
    }

    fn try_predict(&self, request: &TransactionRequest) -> Option<Prediction> {
        let country = request.country_code();
        let amount_factor = 1.0 - (request.amount / COST_NORMALIZATION_AMOUNT).min(1.0);
        let urgency = if request.urgent { 1.0 } else { 0.0 };

        let mut ordered = Vec::with_capacity(request.available_methods.len());
        for method in request.available_methods.iter() {
            let mut score = 0.5
                + self.country_factors.get(&country_key(&country, method))
                + self.method_success_rates.get(&method)
                + self.cost_factors.get(&method) * amount_factor
                + self.time_factors.get(&method) * urgency;
            if let Some(customer) = &request.customer_id {
                score += self.user_preferences.get(&preference_key(customer, method));
            }
            if !score.is_finite() {
                return None;
            }
            ordered.push((method, score.clamp(0.0, 1.0)));
        }

        let (mut best_index, mut best_score) = (0, ordered[0].1);
        for (index, (_, score)) in ordered.iter().enumerate().skip(1) {
            if *score > best_score {
                best_index = index;
                best_score = *score;
            }
        }

        let others: Vec<f64> = ordered
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != best_index)
            .map(|(_, (_, score))| *score)
            .collect();
        let average_other = if others.is_empty() {
            0.0
        } else {
            others.iter().sum::<f64>() / others.len() as f64
        };

        Some(Prediction {
            predicted_method: ordered[best_index].0,
            confidence: (best_score - average_other).clamp(0.0, 1.0),
            scores: ordered.into_iter().collect(),
            fallback: false,
        })
    }

    /// Cost score in [0, 1] derived from the learned cost factor.
    pub fn cost_efficiency(&self, method: PaymentMethod) -> f64 {
        (0.5 + self.cost_factors.get(&method)).clamp(0.0, 1.0)
    }

    // =========================================================================
    // Learning
    // =========================================================================

    /// Fold one observed outcome into the weights.
    pub fn learn(
        &self,
        request: &TransactionRequest,
        method: PaymentMethod,
        success: bool,
        performance: ProcessingPerformance,
    ) {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            warn!(amount = request.amount, "Skipping learning for invalid amount");
            return;
        }

        let lr = self.config.learning_rate;
        let signal = if success { 1.0 } else { -1.0 };
        let country = request.country_code();

        let (method_volume, customer_volume) = lock(&self.history).push(OutcomeRecord {
            timestamp: Utc::now(),
            country: country.clone(),
            currency: request.currency,
            amount: request.amount,
            method,
            success,
            cost: performance.cost,
            processing_time_ms: performance.processing_time_ms,
            customer_id: request.customer_id.clone(),
        });

        self.country_factors
            .update(country_key(&country, method), |old| {
                old * COUNTRY_DECAY + lr * signal
            });

        let volume_weight = (method_volume as f64 / METHOD_VOLUME_SATURATION).min(1.0);
        let success_rate = self.method_success_rates.update(method, |old| {
            old * (1.0 - lr * volume_weight) + signal * lr * volume_weight
        });

        if let Some(cost) = performance.cost.filter(|c| c.is_finite() && *c >= 0.0) {
            let cost_efficiency = 1.0 - (cost / request.amount).min(1.0);
            self.cost_factors
                .update(method, |old| old * COST_DECAY + lr * cost_efficiency);
        }

        if let Some(elapsed) = performance.processing_time_ms {
            let time_efficiency = (1.0 - elapsed as f64 / TIME_EFFICIENCY_CEILING_MS).max(0.0);
            self.time_factors
                .update(method, |old| old * TIME_DECAY + lr * time_efficiency);
        }

        if let Some(customer) = &request.customer_id {
            let customer_weight = (customer_volume as f64 / CUSTOMER_VOLUME_SATURATION).min(1.0);
            self.user_preferences
                .update(preference_key(customer, method), |old| {
                    old * (1.0 - lr * customer_weight)
                        + signal * lr * customer_weight * PREFERENCE_MULTIPLIER
                });
        }

        debug!(
            method = %method,
            country = %country,
            success,
            success_rate,
            "Routing model updated"
        );
    }

    // =========================================================================
    // Reporting & persistence
    // =========================================================================

    pub fn insights(&self, filters: &InsightFilters) -> RoutingInsights {
        let mut insights = RoutingInsights::default();

        {
            let history = lock(&self.history);
            for record in history.records.iter().filter(|r| filters.matches(r)) {
                let entry = insights.methods.entry(record.method).or_default();
                entry.total += 1;
                entry.total_amount += record.amount;
                if record.success {
                    entry.successes += 1;
                    insights.successful_transactions += 1;
                }
                if let Some(elapsed) = record.processing_time_ms {
                    entry.timed_samples += 1;
                    let previous = entry.average_processing_time_ms.unwrap_or(0.0);
                    entry.average_processing_time_ms = Some(
                        previous + (elapsed as f64 - previous) / entry.timed_samples as f64,
                    );
                }
                insights.total_transactions += 1;
            }
        }

        for stats in insights.methods.values_mut() {
            stats.success_rate = stats.successes as f64 / stats.total as f64;
            stats.average_amount = stats.total_amount / stats.total as f64;
        }

        for (key, factor) in self.country_factors.to_map() {
            let Some((country, method)) = key.split_once(':') else {
                continue;
            };
            let Ok(method) = PaymentMethod::from_str(method) else {
                continue;
            };
            if filters
                .country
                .as_deref()
                .is_some_and(|c| !c.eq_ignore_ascii_case(country))
            {
                continue;
            }
            insights
                .country_preferences
                .entry(country.to_string())
                .or_default()
                .insert(method, factor);
        }

        if insights.total_transactions > 0 {
            insights.overall_success_rate =
                insights.successful_transactions as f64 / insights.total_transactions as f64;
        }

        insights
    }

    pub fn weights(&self) -> ModelWeights {
        ModelWeights {
            country_factors: self.country_factors.to_map(),
            method_success_rates: self.method_success_rates.to_map(),
            cost_factors: self.cost_factors.to_map(),
            time_factors: self.time_factors.to_map(),
            user_preferences: self.user_preferences.to_map(),
        }
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let history = lock(&self.history).records.iter().cloned().collect();
        ModelSnapshot {
            saved_at: Utc::now(),
            weights: self.weights(),
            history,
        }
    }

    pub fn history_len(&self) -> usize {
        lock(&self.history).records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::MethodSet;

    fn request(country: &str, methods: Vec<PaymentMethod>, amount: f64) -> TransactionRequest {
        TransactionRequest::new(amount, Currency::Kes, country, MethodSet::new(methods).unwrap())
    }

    #[test]
    fn kenya_small_amount_prefers_mobile_money() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let prediction = model.predict(&request(
            "KE",
            vec![PaymentMethod::Card, PaymentMethod::MobileMoney],
            50.0,
        ));

        assert_eq!(prediction.predicted_method, PaymentMethod::MobileMoney);
        assert!(!prediction.fallback);
        // 0.5 + 0.3 + 0.12 + 0.05 * 0.995
        assert!((prediction.score(PaymentMethod::MobileMoney) - 0.96975).abs() < 1e-9);
        // 0.5 + 0.05 + 0.15 - 0.05 * 0.995
        assert!((prediction.score(PaymentMethod::Card) - 0.65025).abs() < 1e-9);
        assert!((prediction.confidence - 0.3195).abs() < 1e-9);
    }

    #[test]
    fn ties_resolve_to_list_order() {
        let model = WeightedRoutingModel::with_weights(
            ModelConfig::default(),
            ModelWeights {
                country_factors: HashMap::new(),
                method_success_rates: HashMap::new(),
                cost_factors: HashMap::new(),
                time_factors: HashMap::new(),
                user_preferences: HashMap::new(),
            },
        );
        let prediction = model.predict(&request(
            "ZZ",
            vec![PaymentMethod::Crypto, PaymentMethod::Card],
            10.0,
        ));
        assert_eq!(prediction.predicted_method, PaymentMethod::Crypto);
        assert_eq!(prediction.confidence, 0.0);
    }

    #[test]
    fn scores_are_clamped_to_unit_interval() {
        let mut weights = ModelWeights::default();
        weights
            .country_factors
            .insert(country_key("US", PaymentMethod::Card), 5.0);
        let model = WeightedRoutingModel::with_weights(ModelConfig::default(), weights);
        let prediction = model.predict(&request("US", vec![PaymentMethod::Card], 10.0));
        assert_eq!(prediction.score(PaymentMethod::Card), 1.0);
        assert!(prediction.confidence <= 1.0);
    }

    #[test]
    fn non_finite_amount_falls_back_to_first_method() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let prediction = model.predict(&request(
            "KE",
            vec![PaymentMethod::Card, PaymentMethod::MobileMoney],
            f64::NAN,
        ));
        assert!(prediction.fallback);
        assert_eq!(prediction.predicted_method, PaymentMethod::Card);
        assert_eq!(prediction.confidence, 0.0);
    }

    #[test]
    fn urgency_adds_time_factor() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let calm = request("IN", vec![PaymentMethod::Upi], 20_000.0);
        let urgent = calm.clone().urgent();
        let delta = model.predict(&urgent).score(PaymentMethod::Upi)
            - model.predict(&calm).score(PaymentMethod::Upi);
        // 0.5 + 0.3 + 0.15 + 0 = 0.95; urgent adds 0.15 then clamps
        assert!((delta - 0.05).abs() < 1e-9);
    }

    #[test]
    fn repeated_success_moves_rate_monotonically_towards_one() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let tx = request("KE", vec![PaymentMethod::MobileMoney], 100.0);
        let mut previous = model.weights().method_success_rates[&PaymentMethod::MobileMoney];
        for _ in 0..300 {
            model.learn(
                &tx,
                PaymentMethod::MobileMoney,
                true,
                ProcessingPerformance::default(),
            );
            let current = model.weights().method_success_rates[&PaymentMethod::MobileMoney];
            assert!(current > previous);
            assert!(current <= 1.0);
            previous = current;
        }
    }

    #[test]
    fn learn_applies_exact_decay_rules() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let tx = request("KE", vec![PaymentMethod::MobileMoney], 1000.0).with_customer("cust-1");
        model.learn(
            &tx,
            PaymentMethod::MobileMoney,
            true,
            ProcessingPerformance {
                cost: Some(10.0),
                processing_time_ms: Some(1000),
            },
        );

        let weights = model.weights();
        let lr = 0.01;
        let country = weights.country_factors[&country_key("KE", PaymentMethod::MobileMoney)];
        assert!((country - (0.3 * 0.95 + lr)).abs() < 1e-12);

        let vw = 1.0 / 100.0;
        let rate = weights.method_success_rates[&PaymentMethod::MobileMoney];
        assert!((rate - (0.12 * (1.0 - lr * vw) + lr * vw)).abs() < 1e-12);

        let cost = weights.cost_factors[&PaymentMethod::MobileMoney];
        assert!((cost - (0.05 * 0.9 + lr * 0.99)).abs() < 1e-12);

        let time = weights.time_factors[&PaymentMethod::MobileMoney];
        assert!((time - (0.05 * 0.95 + lr * 0.8)).abs() < 1e-12);

        let pref = weights.user_preferences[&preference_key("cust-1", PaymentMethod::MobileMoney)];
        assert!((pref - (lr * 0.1 * 1.5)).abs() < 1e-12);
    }

    #[test]
    fn failures_pull_country_factor_down() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let tx = request("US", vec![PaymentMethod::Card], 100.0);
        model.learn(&tx, PaymentMethod::Card, false, ProcessingPerformance::default());
        let country = model.weights().country_factors[&country_key("US", PaymentMethod::Card)];
        assert!((country - (0.2 * 0.95 - 0.01)).abs() < 1e-12);
    }

    #[test]
    fn history_is_bounded() {
        let model = WeightedRoutingModel::new(ModelConfig {
            max_history: 5,
            ..ModelConfig::default()
        });
        let tx = request("KE", vec![PaymentMethod::Card], 10.0);
        for _ in 0..12 {
            model.learn(&tx, PaymentMethod::Card, true, ProcessingPerformance::default());
        }
        assert_eq!(model.history_len(), 5);
    }

    #[test]
    fn insights_aggregate_filtered_history() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let ke = request("KE", vec![PaymentMethod::MobileMoney], 100.0);
        let us = request("US", vec![PaymentMethod::Card], 300.0);
        model.learn(
            &ke,
            PaymentMethod::MobileMoney,
            true,
            ProcessingPerformance {
                cost: None,
                processing_time_ms: Some(1000),
            },
        );
        model.learn(
            &ke,
            PaymentMethod::MobileMoney,
            false,
            ProcessingPerformance {
                cost: None,
                processing_time_ms: Some(3000),
            },
        );
        model.learn(&us, PaymentMethod::Card, true, ProcessingPerformance::default());

        let all = model.insights(&InsightFilters::default());
        assert_eq!(all.total_transactions, 3);
        assert_eq!(all.successful_transactions, 2);
        let momo = &all.methods[&PaymentMethod::MobileMoney];
        assert_eq!(momo.total, 2);
        assert!((momo.success_rate - 0.5).abs() < 1e-12);
        assert!((momo.average_amount - 100.0).abs() < 1e-12);
        assert_eq!(momo.average_processing_time_ms, Some(2000.0));

        let kenya_only = model.insights(&InsightFilters {
            country: Some("ke".to_string()),
            ..InsightFilters::default()
        });
        assert_eq!(kenya_only.total_transactions, 2);
        assert!(kenya_only.country_preferences.contains_key("KE"));
        assert!(!kenya_only.country_preferences.contains_key("US"));
    }

    #[test]
    fn snapshot_restores_weights_and_volume() {
        let model = WeightedRoutingModel::new(ModelConfig::default());
        let tx = request("GB", vec![PaymentMethod::Card], 100.0);
        model.learn(&tx, PaymentMethod::Card, true, ProcessingPerformance::default());

        let snapshot = model.snapshot();
        let restored = WeightedRoutingModel::from_snapshot(ModelConfig::default(), snapshot);
        assert_eq!(restored.weights(), model.weights());
        assert_eq!(restored.history_len(), 1);
    }

    #[test]
    fn concurrent_learning_keeps_every_update() {
        let model = Arc::new(WeightedRoutingModel::new(ModelConfig::default()));
        let tx = request("NG", vec![PaymentMethod::BankTransfer], 100.0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let model = Arc::clone(&model);
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        model.learn(
                            &tx,
                            PaymentMethod::BankTransfer,
                            true,
                            ProcessingPerformance::default(),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(model.history_len(), 200);
        // 200 positive updates from zero, each x*0.95 + 0.01
        let expected = 0.01 * (1.0 - 0.95f64.powi(200)) / 0.05;
        let actual = model.weights().country_factors[&country_key("NG", PaymentMethod::BankTransfer)];
        assert!((actual - expected).abs() < 1e-9);
    }
}
