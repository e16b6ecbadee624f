//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::compliance::knowledge::KnowledgeSource;
use crate::offline::OfflineStore;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Whether a failing component takes the service down or only degrades it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Criticality {
    Critical,
    Optional,
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    offline_store: Arc<dyn OfflineStore>,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    cache_pool: Option<crate::cache::RedisPool>,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(offline_store: Arc<dyn OfflineStore>) -> Self {
        Self {
            offline_store,
            knowledge: None,
            #[cfg(feature = "database")]
            db_pool: None,
            #[cfg(feature = "cache")]
            cache_pool: None,
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_knowledge_source(mut self, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, pool: crate::cache::RedisPool) -> Self {
        self.cache_pool = Some(pool);
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Perform comprehensive health check. The offline store and database
    /// are critical; cache and knowledge source only degrade routing.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut results = Vec::new();

        let store = self.offline_store.clone();
        results.push((
            format!("offline_store:{}", store.name()),
            Criticality::Critical,
            self.probe(async move { store.processed_count().await.map(|_| ()).map_err(|e| e.to_string()) })
                .await,
        ));

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            results.push((
                "database".to_string(),
                Criticality::Critical,
                self.probe(async {
                    crate::database::health_check(pool)
                        .await
                        .map_err(|e| e.to_string())
                })
                .await,
            ));
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = &self.cache_pool {
            results.push((
                "cache".to_string(),
                Criticality::Optional,
                self.probe(async {
                    crate::cache::health_check(pool)
                        .await
                        .map_err(|e| e.to_string())
                })
                .await,
            ));
        }

        if let Some(knowledge) = &self.knowledge {
            results.push((
                format!("knowledge_source:{}", knowledge.name()),
                Criticality::Optional,
                self.probe(async {
                    knowledge
                        .generate_completion("Reply with OK.")
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .await,
            ));
        }

        let mut state = HealthState::Healthy;
        for (name, criticality, result) in results {
            let health = match result {
                Ok(elapsed) => {
                    info!(component = %name, response_time_ms = elapsed as u64, "Health check OK");
                    ComponentHealth::up(Some(elapsed))
                }
                Err(details) if criticality == Criticality::Critical => {
                    error!(component = %name, details = %details, "Health check failed");
                    state = HealthState::Unhealthy;
                    ComponentHealth::down(Some(details))
                }
                Err(details) => {
                    warn!(component = %name, details = %details, "Optional component unhealthy");
                    if state == HealthState::Healthy {
                        state = HealthState::Degraded;
                    }
                    ComponentHealth::warning(None, Some(details))
                }
            };
            health_status.checks.insert(name, health);
        }

        health_status.status = state;
        health_status
    }

    async fn probe<F>(&self, check: F) -> Result<u128, String>
    where
        F: Future<Output = Result<(), String>>,
    {
        let start = Instant::now();
        match timeout(self.probe_timeout, check).await {
            Ok(Ok(())) => Ok(start.elapsed().as_millis()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err("Timeout".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::provider::tests::ScriptedKnowledge;
    use crate::offline::InMemoryOfflineStore;

    #[tokio::test]
    async fn healthy_with_in_memory_store() {
        let checker = HealthChecker::new(Arc::new(InMemoryOfflineStore::new()));
        let status = checker.check_health().await;
        assert!(status.is_healthy());
        assert_eq!(
            status.checks["offline_store:memory"].status,
            ComponentState::Up
        );
    }

    #[tokio::test]
    async fn failing_knowledge_source_only_degrades() {
        let checker = HealthChecker::new(Arc::new(InMemoryOfflineStore::new()))
            .with_knowledge_source(Arc::new(ScriptedKnowledge::failing()));
        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
    }
}
