//! Regional compliance profiles and efficiency scores
//!
//! Profiles (payment preferences, regulatory environment, tax implications)
//! are read cache-first. A miss or an expired entry triggers one bounded
//! knowledge-source call; when that call fails an expired entry is served
//! instead, tagged `using_cached_data`. Efficiency scores go one step further
//! and never fail: with nothing cached they degrade to a fixed fallback score
//! so that compliance scoring can never block a routing decision.

use crate::compliance::knowledge::{KnowledgeError, KnowledgeSource, KnowledgeSourceConfig};
use crate::compliance::parser::{
    parse_efficiency, parse_preferences, parse_regulations, parse_tax, Parsed,
};
use crate::compliance::types::{
    CacheEntry, CachedData, EfficiencyAssessment, EfficiencyFigures, PaymentPreferences,
    RegulatoryEnvironment, ScoreSource, TaxImplications,
};
use crate::config::{env_parse, ConfigError};
use crate::payments::types::PaymentMethod;
use chrono::Utc;
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[cfg(feature = "cache")]
use crate::cache::{keys::compliance as keys, Cache, RedisCache};

/// Regions warmed at startup.
pub const PRIORITY_REGIONS: [&str; 10] = [
    "NG", "KE", "GH", "ZA", "EG", "ET", "TZ", "UG", "RW", "SN",
];

pub type ComplianceResult<T> = Result<T, ComplianceError>;

#[derive(Debug, Clone, Error)]
pub enum ComplianceError {
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    #[error("Compliance lookup for {region} timed out after {timeout_ms}ms")]
    Timeout { region: String, timeout_ms: u64 },

    #[error("Cross-region optimization is disabled")]
    CrossRegionDisabled,
}

impl ComplianceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ComplianceError::Knowledge(e) => e.is_retryable(),
            ComplianceError::Timeout { .. } => true,
            ComplianceError::CrossRegionDisabled => false,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub cache_ttl: Duration,
    /// Bound on every individual knowledge-source call
    pub lookup_timeout: Duration,
    pub fallback_score: f64,
    pub cross_region_enabled: bool,
    pub priority_regions: Vec<String>,
    pub knowledge: KnowledgeSourceConfig,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            lookup_timeout: Duration::from_millis(800),
            fallback_score: 0.5,
            cross_region_enabled: true,
            priority_regions: PRIORITY_REGIONS.iter().map(|r| r.to_string()).collect(),
            knowledge: KnowledgeSourceConfig::default(),
        }
    }
}

impl ComplianceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let priority_regions = std::env::var("COMPLIANCE_PRIORITY_REGIONS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|r| r.trim().to_uppercase())
                    .filter(|r| !r.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|regions| !regions.is_empty())
            .unwrap_or(defaults.priority_regions);

        Ok(Self {
            cache_ttl: Duration::from_secs(env_parse(
                "COMPLIANCE_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            lookup_timeout: Duration::from_millis(env_parse(
                "COMPLIANCE_LOOKUP_TIMEOUT_MS",
                defaults.lookup_timeout.as_millis() as u64,
            )?),
            fallback_score: env_parse("COMPLIANCE_FALLBACK_SCORE", defaults.fallback_score)?,
            cross_region_enabled: env_parse(
                "COMPLIANCE_CROSS_REGION_ENABLED",
                defaults.cross_region_enabled,
            )?,
            priority_regions,
            knowledge: KnowledgeSourceConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.fallback_score) {
            return Err(ConfigError::InvalidValue(
                "COMPLIANCE_FALLBACK_SCORE must be in [0, 1]".to_string(),
            ));
        }
        if self.lookup_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "COMPLIANCE_LOOKUP_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "COMPLIANCE_CACHE_TTL_SECS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Provider
// ============================================================================

type EntryMap<T> = RwLock<HashMap<String, CacheEntry<T>>>;

#[derive(Debug, Clone, Copy)]
enum ProfileKind {
    Preferences,
    Regulations,
    Tax,
}

impl ProfileKind {
    fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Preferences => "preferences",
            ProfileKind::Regulations => "regulations",
            ProfileKind::Tax => "tax",
        }
    }
}

pub struct ComplianceScoreProvider {
    knowledge: Arc<dyn KnowledgeSource>,
    config: ComplianceConfig,
    preferences: EntryMap<PaymentPreferences>,
    regulations: EntryMap<RegulatoryEnvironment>,
    tax: EntryMap<TaxImplications>,
    efficiency: EntryMap<EfficiencyAssessment>,
    #[cfg(feature = "cache")]
    shared: Option<RedisCache>,
}

fn region_key(region: &str) -> String {
    region.trim().to_uppercase()
}

fn efficiency_key(source: &str, destination: Option<&str>, method: PaymentMethod) -> String {
    match destination {
        Some(dest) => format!("{}_to_{}:{}", region_key(source), region_key(dest), method),
        None => format!("{}:{}", region_key(source), method),
    }
}

impl ComplianceScoreProvider {
    pub fn new(knowledge: Arc<dyn KnowledgeSource>, config: ComplianceConfig) -> Self {
        Self {
            knowledge,
            config,
            preferences: RwLock::new(HashMap::new()),
            regulations: RwLock::new(HashMap::new()),
            tax: RwLock::new(HashMap::new()),
            efficiency: RwLock::new(HashMap::new()),
            #[cfg(feature = "cache")]
            shared: None,
        }
    }

    /// Mirror profiles and efficiency scores into a shared Redis tier.
    #[cfg(feature = "cache")]
    pub fn with_shared_cache(mut self, cache: RedisCache) -> Self {
        self.shared = Some(cache);
        self
    }

    pub fn config(&self) -> &ComplianceConfig {
        &self.config
    }

    pub fn knowledge_source(&self) -> &dyn KnowledgeSource {
        self.knowledge.as_ref()
    }

    // ------------------------------------------------------------------------
    // Regional profiles
    // ------------------------------------------------------------------------

    pub async fn get_preferences(
        &self,
        region: &str,
    ) -> ComplianceResult<CachedData<PaymentPreferences>> {
        let prompt = format!(
            "What are the current payment preferences and trends in {region}? \
             Return JSON with popularMethods (list), mobileMoneyAdoption, cardPenetration, \
             bankingPenetration, cryptoUsage and cashUsage (each between 0 and 1)."
        );
        self.lookup_profile(ProfileKind::Preferences, &self.preferences, region, || async {
            let answer = self.knowledge.answer_question(&prompt).await?;
            parse_detached(answer.answer, parse_preferences).await
        })
        .await
    }

    pub async fn get_regulations(
        &self,
        region: &str,
    ) -> ComplianceResult<CachedData<RegulatoryEnvironment>> {
        let prompt = format!(
            "Describe the payment regulatory environment in {region}. Return JSON with \
             regulatoryBodies, licensingRequired, kycLevel, dataProtectionLaws, \
             foreignExchangeControls, crossBorderRestrictions, reportingRequirements and \
             complianceCostIndex (0 to 1, higher is heavier)."
        );
        self.lookup_profile(ProfileKind::Regulations, &self.regulations, region, || async {
            let completion = self.knowledge.generate_completion(&prompt).await?;
            parse_detached(completion.text, parse_regulations).await
        })
        .await
    }

    pub async fn get_tax_implications(
        &self,
        region: &str,
    ) -> ComplianceResult<CachedData<TaxImplications>> {
        let prompt = format!(
            "Summarize the tax implications of digital payments in {region}. Return JSON with \
             vatRate, withholdingTaxRate, digitalServicesTax, transactionLevy (fractions), \
             reportingRequirements and exemptions."
        );
        self.lookup_profile(ProfileKind::Tax, &self.tax, region, || async {
            let completion = self.knowledge.generate_completion(&prompt).await?;
            parse_detached(completion.text, parse_tax).await
        })
        .await
    }

    async fn lookup_profile<T, F, Fut>(
        &self,
        kind: ProfileKind,
        entries: &EntryMap<T>,
        region: &str,
        fetch: F,
    ) -> ComplianceResult<CachedData<T>>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ComplianceResult<Parsed<T>>>,
    {
        let key = region_key(region);
        let local = entries.read().await.get(&key).cloned();
        if let Some(entry) = &local {
            if entry.is_fresh(self.config.cache_ttl) {
                return Ok(CachedData::current(entry));
            }
        }

        #[cfg(feature = "cache")]
        if let Some(entry) = self
            .shared_get::<CacheEntry<T>>(&keys::ProfileKey::new(kind.as_str(), &key).to_string())
            .await
        {
            if entry.is_fresh(self.config.cache_ttl) {
                entries.write().await.insert(key, entry.clone());
                return Ok(CachedData::current(&entry));
            }
        }

        debug!(kind = kind.as_str(), region = %key, "Compliance profile cache miss");
        match self.bounded(&key, fetch()).await {
            Ok(parsed) => {
                let entry = CacheEntry::new(parsed.value);
                if parsed.structured {
                    entries.write().await.insert(key.clone(), entry.clone());
                    #[cfg(feature = "cache")]
                    self.shared_set(
                        &keys::ProfileKey::new(kind.as_str(), &key).to_string(),
                        &entry,
                    )
                    .await;
                } else {
                    warn!(
                        kind = kind.as_str(),
                        region = %key,
                        "Knowledge source answer had no structured data, using defaults"
                    );
                }
                Ok(CachedData::current(&entry))
            }
            Err(e) => match local {
                Some(entry) => {
                    warn!(
                        kind = kind.as_str(),
                        region = %key,
                        error = %e,
                        "Compliance profile refresh failed, serving stale entry"
                    );
                    Ok(CachedData::stale(&entry, e.to_string()))
                }
                None => Err(e),
            },
        }
    }

    async fn bounded<T>(
        &self,
        region: &str,
        call: impl Future<Output = ComplianceResult<T>>,
    ) -> ComplianceResult<T> {
        match tokio::time::timeout(self.config.lookup_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ComplianceError::Timeout {
                region: region.to_string(),
                timeout_ms: self.config.lookup_timeout.as_millis() as u64,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Efficiency scores
    // ------------------------------------------------------------------------

    /// Regulatory and tax efficiency of `method` within `region`. Never fails.
    pub async fn calculate_regulatory_efficiency(
        &self,
        region: &str,
        method: PaymentMethod,
    ) -> EfficiencyAssessment {
        let key = efficiency_key(region, None, method);
        self.assess(&key, region, None, method, self.analyze_domestic(region, method))
            .await
    }

    /// Efficiency of `method` for payments from `source` to `destination`.
    /// Never fails; disabled cross-region analysis yields the fallback score.
    pub async fn calculate_cross_border_efficiency(
        &self,
        source: &str,
        destination: &str,
        method: PaymentMethod,
    ) -> EfficiencyAssessment {
        if !self.config.cross_region_enabled {
            return EfficiencyAssessment::fallback(
                source,
                Some(destination),
                method,
                self.config.fallback_score,
                ComplianceError::CrossRegionDisabled.to_string(),
            );
        }
        let key = efficiency_key(source, Some(destination), method);
        self.assess(
            &key,
            source,
            Some(destination),
            method,
            self.analyze_cross_border(source, destination, method),
        )
        .await
    }

    async fn assess(
        &self,
        key: &str,
        region: &str,
        destination: Option<&str>,
        method: PaymentMethod,
        analysis: impl Future<Output = ComplianceResult<Parsed<EfficiencyFigures>>>,
    ) -> EfficiencyAssessment {
        let local = self.efficiency.read().await.get(key).cloned();
        if let Some(entry) = &local {
            if entry.is_fresh(self.config.cache_ttl) {
                let mut hit = entry.data.clone();
                hit.source = ScoreSource::Cache;
                return hit;
            }
        }

        #[cfg(feature = "cache")]
        {
            let shared_key = self.shared_efficiency_key(region, destination, method);
            if let Some(entry) = self
                .shared_get::<CacheEntry<EfficiencyAssessment>>(&shared_key)
                .await
            {
                if entry.is_fresh(self.config.cache_ttl) {
                    self.efficiency
                        .write()
                        .await
                        .insert(key.to_string(), entry.clone());
                    let mut hit = entry.data;
                    hit.source = ScoreSource::Cache;
                    return hit;
                }
            }
        }

        match analysis.await {
            Ok(parsed) if parsed.structured => {
                let figures = parsed.value;
                let assessment = EfficiencyAssessment {
                    region: region_key(region),
                    destination: destination.map(region_key),
                    method,
                    efficiency_score: figures.efficiency_score,
                    tax_efficiency_score: figures.tax_efficiency_score,
                    compliance_requirements: figures.compliance_requirements,
                    documentation_requirements: figures.documentation_requirements,
                    regulatory_costs: figures.regulatory_costs,
                    source: ScoreSource::Fresh,
                    assessed_at: Utc::now(),
                    error: None,
                };
                let entry = CacheEntry::new(assessment.clone());
                self.efficiency
                    .write()
                    .await
                    .insert(key.to_string(), entry.clone());
                #[cfg(feature = "cache")]
                self.shared_set(
                    &self.shared_efficiency_key(region, destination, method),
                    &entry,
                )
                .await;
                assessment
            }
            Ok(_) => {
                warn!(key = %key, "Efficiency analysis had no structured data, using fallback score");
                EfficiencyAssessment::fallback(
                    &region_key(region),
                    destination.map(region_key).as_deref(),
                    method,
                    self.config.fallback_score,
                    "knowledge source answer contained no structured data",
                )
            }
            Err(e) => match local {
                Some(entry) => {
                    warn!(key = %key, error = %e, "Efficiency refresh failed, serving stale score");
                    let mut stale = entry.data;
                    stale.source = ScoreSource::StaleCache;
                    stale.error = Some(e.to_string());
                    stale
                }
                None => {
                    warn!(key = %key, error = %e, "Efficiency unavailable, using fallback score");
                    EfficiencyAssessment::fallback(
                        &region_key(region),
                        destination.map(region_key).as_deref(),
                        method,
                        self.config.fallback_score,
                        e.to_string(),
                    )
                }
            },
        }
    }

    async fn analyze_domestic(
        &self,
        region: &str,
        method: PaymentMethod,
    ) -> ComplianceResult<Parsed<EfficiencyFigures>> {
        let regulations = self.get_regulations(region).await?;
        let tax = self.get_tax_implications(region).await?;

        let prompt = format!(
            "Analyze the regulatory efficiency of using {method} in {region}.\n\
             Regulatory data:\n{}\nTax data:\n{}\n\
             Return JSON with efficiencyScore and taxEfficiencyScore (0 to 1, higher is \
             less overhead), complianceRequirements, documentationRequirements and \
             regulatoryCosts.",
            to_json(&regulations.data),
            to_json(&tax.data),
        );
        self.bounded(region, async {
            let completion = self.knowledge.generate_completion(&prompt).await?;
            parse_detached(completion.text, parse_efficiency).await
        })
        .await
    }

    async fn analyze_cross_border(
        &self,
        source: &str,
        destination: &str,
        method: PaymentMethod,
    ) -> ComplianceResult<Parsed<EfficiencyFigures>> {
        let source_regulations = self.get_regulations(source).await?;
        let destination_regulations = self.get_regulations(destination).await?;
        let source_tax = self.get_tax_implications(source).await?;
        let destination_tax = self.get_tax_implications(destination).await?;

        let prompt = format!(
            "Analyze the cross-border regulatory efficiency of using {method} for payments \
             from {source} to {destination}.\n\
             Source regulations:\n{}\nDestination regulations:\n{}\n\
             Source tax:\n{}\nDestination tax:\n{}\n\
             Return JSON with efficiencyScore and taxEfficiencyScore (0 to 1), \
             complianceRequirements, documentationRequirements and regulatoryCosts.",
            to_json(&source_regulations.data),
            to_json(&destination_regulations.data),
            to_json(&source_tax.data),
            to_json(&destination_tax.data),
        );
        self.bounded(source, async {
            let completion = self.knowledge.generate_completion(&prompt).await?;
            parse_detached(completion.text, parse_efficiency).await
        })
        .await
    }

    /// Pre-fetch every profile for `regions`. Returns how many regions
    /// loaded completely.
    pub async fn warm_up(&self, regions: &[String]) -> usize {
        let loads = regions.iter().map(|region| async move {
            let (preferences, regulations, tax) = futures::join!(
                self.get_preferences(region),
                self.get_regulations(region),
                self.get_tax_implications(region),
            );
            let failures: Vec<String> = [
                preferences.err(),
                regulations.err(),
                tax.err(),
            ]
            .into_iter()
            .flatten()
            .map(|e| e.to_string())
            .collect();
            if !failures.is_empty() {
                warn!(region = %region, errors = ?failures, "Compliance warm-up incomplete");
            }
            failures.is_empty()
        });

        let loaded = join_all(loads).await.into_iter().filter(|ok| *ok).count();
        info!(loaded, requested = regions.len(), "Compliance profiles warmed");
        loaded
    }

    // ------------------------------------------------------------------------
    // Shared tier
    // ------------------------------------------------------------------------

    #[cfg(feature = "cache")]
    fn shared_efficiency_key(
        &self,
        region: &str,
        destination: Option<&str>,
        method: PaymentMethod,
    ) -> String {
        match destination {
            Some(dest) => keys::EfficiencyKey::cross_border(region, dest, method).to_string(),
            None => keys::EfficiencyKey::domestic(region, method).to_string(),
        }
    }

    #[cfg(feature = "cache")]
    async fn shared_get<T>(&self, key: &str) -> Option<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let cache = self.shared.as_ref()?;
        match Cache::<T>::get(cache, key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Shared compliance cache read failed");
                None
            }
        }
    }

    #[cfg(feature = "cache")]
    async fn shared_set<T>(&self, key: &str, value: &T)
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let Some(cache) = &self.shared else { return };
        if let Err(e) = Cache::<T>::set(cache, key, value, Some(self.config.cache_ttl)).await {
            warn!(key = %key, error = %e, "Shared compliance cache write failed");
        }
    }
}

/// Parse a knowledge-source answer on the blocking pool so the caller's
/// timeout stays able to fire.
async fn parse_detached<T>(
    text: String,
    parse: fn(&str) -> Parsed<T>,
) -> ComplianceResult<Parsed<T>>
where
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || parse(&text))
        .await
        .map_err(|e| {
            ComplianceError::Knowledge(KnowledgeError::InvalidResponse {
                message: format!("answer parsing aborted: {e}"),
            })
        })
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compliance::knowledge::{Completion, KnowledgeAnswer, KnowledgeResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted knowledge source: answers every prompt with `reply`, or fails
    /// while `failing` is set.
    pub(crate) struct ScriptedKnowledge {
        pub reply: String,
        pub failing: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl ScriptedKnowledge {
        pub(crate) fn answering(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing() -> Self {
            let source = Self::answering("");
            source.failing.store(true, Ordering::SeqCst);
            source
        }

        fn respond(&self) -> KnowledgeResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(KnowledgeError::Network {
                    message: "connection refused".to_string(),
                })
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    #[async_trait]
    impl KnowledgeSource for ScriptedKnowledge {
        async fn answer_question(&self, _prompt: &str) -> KnowledgeResult<KnowledgeAnswer> {
            Ok(KnowledgeAnswer {
                answer: self.respond()?,
                sources: Vec::new(),
            })
        }

        async fn generate_completion(&self, _prompt: &str) -> KnowledgeResult<Completion> {
            Ok(Completion {
                text: self.respond()?,
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    const ANSWER: &str = r#"{"efficiencyScore": 0.8, "taxEfficiencyScore": 0.6,
        "complianceCostIndex": 0.3, "vatRate": 0.16,
        "documentationRequirements": ["KYC"]}"#;

    fn provider(source: Arc<ScriptedKnowledge>) -> ComplianceScoreProvider {
        ComplianceScoreProvider::new(source, ComplianceConfig::default())
    }

    #[tokio::test]
    async fn network_failure_without_cache_yields_fallback_score() {
        let provider = provider(Arc::new(ScriptedKnowledge::failing()));
        let assessment = provider
            .calculate_regulatory_efficiency("KE", PaymentMethod::MobileMoney)
            .await;
        assert_eq!(assessment.source, ScoreSource::Fallback);
        assert_eq!(assessment.efficiency_score, 0.5);
        assert!(assessment.error.is_some());
    }

    #[tokio::test]
    async fn profile_lookup_without_cache_propagates_error() {
        let provider = provider(Arc::new(ScriptedKnowledge::failing()));
        assert!(provider.get_regulations("KE").await.is_err());
    }

    #[tokio::test]
    async fn fresh_efficiency_is_cached() {
        let source = Arc::new(ScriptedKnowledge::answering(ANSWER));
        let provider = provider(source.clone());

        let first = provider
            .calculate_regulatory_efficiency("ke", PaymentMethod::MobileMoney)
            .await;
        assert_eq!(first.source, ScoreSource::Fresh);
        assert_eq!(first.efficiency_score, 0.8);
        assert_eq!(first.documentation_requirements, vec!["KYC".to_string()]);

        let calls = source.calls.load(Ordering::SeqCst);
        let second = provider
            .calculate_regulatory_efficiency("KE", PaymentMethod::MobileMoney)
            .await;
        assert_eq!(second.source, ScoreSource::Cache);
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn expired_profile_is_served_stale_when_refresh_fails() {
        let source = Arc::new(ScriptedKnowledge::answering(ANSWER));
        let provider = provider(source.clone());
        provider.get_tax_implications("GH").await.unwrap();

        provider
            .tax
            .write()
            .await
            .get_mut("GH")
            .unwrap()
            .fetched_at = Utc::now() - chrono::Duration::days(30);
        source.failing.store(true, Ordering::SeqCst);

        let stale = provider.get_tax_implications("GH").await.unwrap();
        assert!(stale.using_cached_data);
        assert!((stale.data.vat_rate - 0.16).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unstructured_answers_are_not_cached() {
        let source = Arc::new(ScriptedKnowledge::answering("I am not sure."));
        let provider = provider(source.clone());
        let assessment = provider
            .calculate_regulatory_efficiency("NG", PaymentMethod::Card)
            .await;
        assert_eq!(assessment.source, ScoreSource::Fallback);
        assert!(provider.regulations.read().await.is_empty());
        assert!(provider.efficiency.read().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_cross_region_returns_fallback() {
        let source = Arc::new(ScriptedKnowledge::answering(ANSWER));
        let provider = ComplianceScoreProvider::new(
            source.clone(),
            ComplianceConfig {
                cross_region_enabled: false,
                ..ComplianceConfig::default()
            },
        );
        let assessment = provider
            .calculate_cross_border_efficiency("KE", "NG", PaymentMethod::Card)
            .await;
        assert_eq!(assessment.source, ScoreSource::Fallback);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn warm_up_counts_complete_regions() {
        let provider = provider(Arc::new(ScriptedKnowledge::answering(ANSWER)));
        let regions = vec!["KE".to_string(), "NG".to_string()];
        assert_eq!(provider.warm_up(&regions).await, 2);

        let failing = provider_failing();
        assert_eq!(failing.warm_up(&regions).await, 0);
    }

    fn provider_failing() -> ComplianceScoreProvider {
        provider(Arc::new(ScriptedKnowledge::failing()))
    }

    #[test]
    fn fallback_score_is_validated() {
        let config = ComplianceConfig {
            fallback_score: 1.5,
            ..ComplianceConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ComplianceConfig::default().validate().is_ok());
    }
}
