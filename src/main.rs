use paygrid_backend::api::{self, AppState};
use paygrid_backend::compliance::knowledge::KnowledgeSource;
use paygrid_backend::compliance::{ComplianceOptimizer, ComplianceScoreProvider, OllamaKnowledgeSource};
use paygrid_backend::config::AppConfig;
use paygrid_backend::health::HealthChecker;
use paygrid_backend::logging::init_tracing;
use paygrid_backend::offline::{
    AesGcmEnvelope, HmacSigner, InMemoryOfflineStore, JournalOfflineStore, OfflineCaptureService,
    OfflineStore, OfflineSyncService,
};
use paygrid_backend::payments::factory::{ProcessorRegistry, ProcessorRegistryConfig};
use paygrid_backend::routing::{
    load_model, JsonFileModelStore, ModelStore, RoutingArbiter, WeightedRoutingModel,
};
use paygrid_backend::services::{PaymentOrchestrator, RuleBasedFraudScreen};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[cfg(feature = "cache")]
use paygrid_backend::cache::{init_cache_pool, CachePoolConfig, RedisCache};
#[cfg(feature = "database")]
use paygrid_backend::database::{self, PgModelStore, PgOfflineStore};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting Paygrid backend service"
    );

    // ========================================================================
    // Storage
    // ========================================================================

    #[cfg(feature = "database")]
    let db_pool = match &config.database {
        Some(db_config) => {
            let pool = database::connect(db_config).await?;
            database::run_migrations(&pool).await?;
            Some(pool)
        }
        None => {
            info!("DATABASE_URL not set, running without Postgres");
            None
        }
    };

    #[cfg(feature = "cache")]
    let cache_pool = match &config.cache {
        Some(cache_config) => {
            info!("Initializing Redis cache connection pool...");
            Some(init_cache_pool(CachePoolConfig::from(cache_config)).await?)
        }
        None => None,
    };

    let offline_store: Arc<dyn OfflineStore> = {
        #[cfg(feature = "database")]
        let pg: Option<Arc<dyn OfflineStore>> = db_pool
            .clone()
            .map(|pool| Arc::new(PgOfflineStore::new(pool)) as Arc<dyn OfflineStore>);
        #[cfg(not(feature = "database"))]
        let pg: Option<Arc<dyn OfflineStore>> = None;

        match (pg, &config.offline.journal_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JournalOfflineStore::open(path.clone()).await?),
            (None, None) => {
                warn!("No durable offline store configured, offline transactions live in memory only");
                Arc::new(InMemoryOfflineStore::new())
            }
        }
    };
    info!(store = offline_store.name(), "Offline store ready");

    let model_store: Option<Arc<dyn ModelStore>> = {
        #[cfg(feature = "database")]
        let pg: Option<Arc<dyn ModelStore>> = db_pool
            .clone()
            .map(|pool| Arc::new(PgModelStore::new(pool)) as Arc<dyn ModelStore>);
        #[cfg(not(feature = "database"))]
        let pg: Option<Arc<dyn ModelStore>> = None;

        pg.or_else(|| {
            config
                .model
                .snapshot_path
                .clone()
                .map(|path| Arc::new(JsonFileModelStore::new(path)) as Arc<dyn ModelStore>)
        })
    };

    // ========================================================================
    // Routing
    // ========================================================================

    let model = match &model_store {
        Some(store) => load_model(config.model.clone(), store.as_ref()).await,
        None => WeightedRoutingModel::new(config.model.clone()),
    };
    let model = Arc::new(model);

    let knowledge: Arc<dyn KnowledgeSource> =
        Arc::new(OllamaKnowledgeSource::new(config.compliance.knowledge.clone())?);

    let provider = ComplianceScoreProvider::new(knowledge.clone(), config.compliance.clone());
    #[cfg(feature = "cache")]
    let provider = match &cache_pool {
        Some(pool) => provider.with_shared_cache(RedisCache::new(pool.clone())),
        None => provider,
    };
    let provider = Arc::new(provider);

    let optimizer = Arc::new(ComplianceOptimizer::new(
        provider.clone(),
        config.optimizer.clone(),
    ));
    let arbiter = Arc::new(
        RoutingArbiter::new(model, config.arbiter.clone()).with_optimizer(optimizer),
    );

    {
        let provider = provider.clone();
        let regions = config.compliance.priority_regions.clone();
        tokio::spawn(async move {
            let loaded = provider.warm_up(&regions).await;
            info!(loaded, total = regions.len(), "Compliance warm-up finished");
        });
    }

    // ========================================================================
    // Payments
    // ========================================================================

    let registry_config = ProcessorRegistryConfig::from_env()?;
    let processors = ProcessorRegistry::simulated(&registry_config);
    info!(methods = ?processors.methods(), "Payment processors registered");

    let fraud = Arc::new(RuleBasedFraudScreen::new(
        config.orchestrator.fraud_max_amount,
    ));
    let mut orchestrator =
        PaymentOrchestrator::new(arbiter, processors, fraud, config.orchestrator.clone());
    if let Some(store) = model_store {
        orchestrator = orchestrator.with_model_store(store);
    }

    // ========================================================================
    // Offline
    // ========================================================================

    let signer = Arc::new(HmacSigner::new(config.offline.signing_key.as_bytes())?);
    let cipher = Arc::new(AesGcmEnvelope::from_hex(&config.offline.qr_key)?);
    let capture = OfflineCaptureService::new(
        offline_store.clone(),
        signer.clone(),
        cipher,
        config.offline.clone(),
    );
    let sync = OfflineSyncService::new(offline_store.clone(), signer);

    let health = HealthChecker::new(offline_store).with_knowledge_source(knowledge);
    #[cfg(feature = "database")]
    let health = match db_pool {
        Some(pool) => health.with_database(pool),
        None => health,
    };
    #[cfg(feature = "cache")]
    let health = match cache_pool {
        Some(pool) => health.with_cache(pool),
        None => health,
    };

    let app = api::router(AppState {
        orchestrator: Arc::new(orchestrator),
        capture: Arc::new(capture),
        sync: Arc::new(sync),
        health,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind");
        e
    })?;
    info!(address = %addr, "Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
