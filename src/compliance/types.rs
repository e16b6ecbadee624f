use crate::payments::types::PaymentMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How people in a region prefer to pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPreferences {
    pub popular_methods: Vec<String>,
    pub mobile_money_adoption: f64,
    pub card_penetration: f64,
    pub banking_penetration: f64,
    pub crypto_usage: f64,
    pub cash_usage: f64,
}

impl Default for PaymentPreferences {
    fn default() -> Self {
        Self {
            popular_methods: vec!["card".to_string(), "bank_transfer".to_string()],
            mobile_money_adoption: 0.5,
            card_penetration: 0.5,
            banking_penetration: 0.5,
            crypto_usage: 0.1,
            cash_usage: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryEnvironment {
    pub regulatory_bodies: Vec<String>,
    pub licensing_required: bool,
    pub kyc_level: String,
    pub data_protection_laws: Vec<String>,
    pub foreign_exchange_controls: bool,
    pub cross_border_restrictions: Vec<String>,
    pub reporting_requirements: Vec<String>,
    /// 0 = negligible compliance overhead, 1 = very heavy
    pub compliance_cost_index: f64,
}

impl Default for RegulatoryEnvironment {
    fn default() -> Self {
        Self {
            regulatory_bodies: Vec::new(),
            licensing_required: true,
            kyc_level: "standard".to_string(),
            data_protection_laws: Vec::new(),
            foreign_exchange_controls: false,
            cross_border_restrictions: Vec::new(),
            reporting_requirements: Vec::new(),
            compliance_cost_index: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxImplications {
    pub vat_rate: f64,
    pub withholding_tax_rate: f64,
    pub digital_services_tax: f64,
    pub transaction_levy: f64,
    pub reporting_requirements: Vec<String>,
    pub exemptions: Vec<String>,
}

impl Default for TaxImplications {
    fn default() -> Self {
        Self {
            vat_rate: 0.0,
            withholding_tax_rate: 0.0,
            digital_services_tax: 0.0,
            transaction_levy: 0.0,
            reporting_requirements: Vec::new(),
            exemptions: Vec::new(),
        }
    }
}

/// Scores and requirements parsed out of a knowledge-source answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyFigures {
    pub efficiency_score: f64,
    pub tax_efficiency_score: f64,
    pub compliance_requirements: Vec<String>,
    pub documentation_requirements: Vec<String>,
    pub regulatory_costs: Option<String>,
}

/// Where an efficiency score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Fresh,
    Cache,
    StaleCache,
    Fallback,
}

impl ScoreSource {
    /// Trust placed in a score from this source.
    pub fn confidence(&self) -> f64 {
        match self {
            ScoreSource::Fresh | ScoreSource::Cache => 1.0,
            ScoreSource::StaleCache => 0.6,
            ScoreSource::Fallback => 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencyAssessment {
    pub region: String,
    pub destination: Option<String>,
    pub method: PaymentMethod,
    pub efficiency_score: f64,
    pub tax_efficiency_score: f64,
    pub compliance_requirements: Vec<String>,
    pub documentation_requirements: Vec<String>,
    pub regulatory_costs: Option<String>,
    pub source: ScoreSource,
    pub assessed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EfficiencyAssessment {
    pub fn fallback(
        region: &str,
        destination: Option<&str>,
        method: PaymentMethod,
        score: f64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            region: region.to_string(),
            destination: destination.map(str::to_string),
            method,
            efficiency_score: score,
            tax_efficiency_score: score,
            compliance_requirements: Vec::new(),
            documentation_requirements: Vec::new(),
            regulatory_costs: None,
            source: ScoreSource::Fallback,
            assessed_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// A cached value and when it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        (Utc::now() - self.fetched_at)
            .to_std()
            .map(|age| age < ttl)
            // fetched_at in the future: clock skew, treat as fresh
            .unwrap_or(true)
    }
}

/// Result of a profile lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub fetched_at: DateTime<Utc>,
    /// True when a refresh failed and an expired entry was served instead
    pub using_cached_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Clone> CachedData<T> {
    pub fn current(entry: &CacheEntry<T>) -> Self {
        Self {
            data: entry.data.clone(),
            fetched_at: entry.fetched_at,
            using_cached_data: false,
            error: None,
        }
    }

    pub fn stale(entry: &CacheEntry<T>, error: impl Into<String>) -> Self {
        Self {
            data: entry.data.clone(),
            fetched_at: entry.fetched_at,
            using_cached_data: true,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_freshness_respects_ttl() {
        let mut entry = CacheEntry::new(1u8);
        assert!(entry.is_fresh(Duration::from_secs(60)));
        entry.fetched_at = Utc::now() - chrono::Duration::seconds(120);
        assert!(!entry.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn stale_data_is_tagged() {
        let entry = CacheEntry::new(TaxImplications::default());
        let stale = CachedData::stale(&entry, "network down");
        assert!(stale.using_cached_data);
        assert_eq!(stale.error.as_deref(), Some("network down"));
        assert!(!CachedData::current(&entry).using_cached_data);
    }

    #[test]
    fn fallback_source_has_lowest_confidence() {
        assert!(ScoreSource::Fallback.confidence() < ScoreSource::StaleCache.confidence());
        assert_eq!(ScoreSource::Cache.confidence(), 1.0);
    }
}
