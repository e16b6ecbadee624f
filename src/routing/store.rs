//! Persistence contract for learned routing weights

use crate::routing::model::{ModelConfig, ModelSnapshot, WeightedRoutingModel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type StoreResult<T> = Result<T, ModelStoreError>;

#[derive(Debug, Error)]
pub enum ModelStoreError {
    #[error("Model store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model store database error: {0}")]
    Database(String),
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn save(&self, snapshot: &ModelSnapshot) -> StoreResult<()>;

    /// `None` when nothing has been saved yet.
    async fn load(&self) -> StoreResult<Option<ModelSnapshot>>;
}

/// Load the persisted model, or start from seeded weights. Load errors are
/// logged and never prevent startup.
pub async fn load_model(config: ModelConfig, store: &dyn ModelStore) -> WeightedRoutingModel {
    match store.load().await {
        Ok(Some(snapshot)) => {
            info!(
                saved_at = %snapshot.saved_at,
                history = snapshot.history.len(),
                "Restored routing model from snapshot"
            );
            WeightedRoutingModel::from_snapshot(config, snapshot)
        }
        Ok(None) => {
            info!("No routing model snapshot found, using default weights");
            WeightedRoutingModel::new(config)
        }
        Err(e) => {
            warn!(error = %e, "Failed to load routing model snapshot, using default weights");
            WeightedRoutingModel::new(config)
        }
    }
}

/// Snapshot kept as a JSON document on local disk.
///
/// Saves are serialized and a snapshot older than the last one written is
/// dropped, so concurrent callers can never roll the file back.
pub struct JsonFileModelStore {
    path: PathBuf,
    last_saved: Mutex<Option<DateTime<Utc>>>,
}

impl JsonFileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_saved: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "routing-model.json".into());
        name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }

    async fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        let temp = self.temp_path();
        let written = async {
            tokio::fs::write(&temp, bytes).await?;
            tokio::fs::File::open(&temp).await?.sync_all().await?;
            tokio::fs::rename(&temp, &self.path).await
        }
        .await;
        if written.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        written
    }
}

#[async_trait]
impl ModelStore for JsonFileModelStore {
    async fn save(&self, snapshot: &ModelSnapshot) -> StoreResult<()> {
        let bytes = serde_json::to_vec(snapshot)?;

        let mut last_saved = self.last_saved.lock().await;
        if last_saved.is_some_and(|at| snapshot.saved_at < at) {
            debug!(
                saved_at = %snapshot.saved_at,
                "Skipping routing model snapshot older than the one on disk"
            );
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // write-then-rename so a crash never leaves a half-written snapshot
        self.write_atomically(&bytes).await?;
        *last_saved = Some(snapshot.saved_at);
        Ok(())
    }

    async fn load(&self) -> StoreResult<Option<ModelSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{
        Currency, MethodSet, PaymentMethod, ProcessingPerformance, TransactionRequest,
    };
    use std::sync::Arc;

    async fn leftover_files(path: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(path.parent().unwrap()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("paygrid-model-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let store = JsonFileModelStore::new(temp_file("absent.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_snapshot_round_trips_into_a_model() {
        let path = temp_file("model.json");
        let store = JsonFileModelStore::new(&path);

        let model = WeightedRoutingModel::new(ModelConfig::default());
        let tx = TransactionRequest::new(
            250.0,
            Currency::Ngn,
            "NG",
            MethodSet::single(PaymentMethod::BankTransfer),
        );
        model.learn(&tx, PaymentMethod::BankTransfer, true, ProcessingPerformance::default());
        store.save(&model.snapshot()).await.unwrap();

        let restored = load_model(ModelConfig::default(), &store).await;
        assert_eq!(restored.weights(), model.weights());
        assert_eq!(restored.history_len(), 1);
        assert_eq!(leftover_files(&path).await, vec!["model.json".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_all_succeed_and_keep_the_newest() {
        let path = temp_file("model.json");
        let store = Arc::new(JsonFileModelStore::new(&path));
        let model = WeightedRoutingModel::new(ModelConfig::default());

        let snapshots: Vec<ModelSnapshot> = (0..16).map(|_| model.snapshot()).collect();
        let newest = snapshots.iter().map(|s| s.saved_at).max().unwrap();

        let saves = snapshots.into_iter().rev().map(|snapshot| {
            let store = store.clone();
            tokio::spawn(async move { store.save(&snapshot).await })
        });
        for result in futures::future::join_all(saves).await {
            assert!(result.unwrap().is_ok());
        }

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.saved_at, newest);
        assert_eq!(leftover_files(&path).await, vec!["model.json".to_string()]);
    }

    #[tokio::test]
    async fn older_snapshot_does_not_overwrite_newer() {
        let path = temp_file("model.json");
        let store = JsonFileModelStore::new(&path);
        let model = WeightedRoutingModel::new(ModelConfig::default());

        let mut older = model.snapshot();
        older.saved_at = older.saved_at - chrono::Duration::seconds(60);
        older.history.clear();
        let newer = model.snapshot();

        store.save(&newer).await.unwrap();
        store.save(&older).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().saved_at, newer.saved_at);
    }

    #[tokio::test]
    async fn corrupt_snapshot_falls_back_to_defaults() {
        let path = temp_file("corrupt.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = JsonFileModelStore::new(&path);
        assert!(store.load().await.is_err());
        let model = load_model(ModelConfig::default(), &store).await;
        assert_eq!(model.weights(), crate::routing::model::ModelWeights::default());
    }
}
