use crate::database::error::DatabaseError;
use crate::routing::model::ModelSnapshot;
use crate::routing::store::{ModelStore, ModelStoreError, StoreResult};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

const DEFAULT_SNAPSHOT: &str = "default";

/// Routing model snapshots as one JSONB row per named model.
pub struct PgModelStore {
    pool: PgPool,
    name: String,
}

impl PgModelStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            name: DEFAULT_SNAPSHOT.to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn db(err: sqlx::Error) -> ModelStoreError {
        ModelStoreError::Database(DatabaseError::from_sqlx(err).message())
    }
}

#[async_trait]
impl ModelStore for PgModelStore {
    async fn save(&self, snapshot: &ModelSnapshot) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO routing_model_snapshots (name, snapshot, saved_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE
             SET snapshot = EXCLUDED.snapshot, saved_at = EXCLUDED.saved_at",
        )
        .bind(&self.name)
        .bind(Json(snapshot))
        .bind(snapshot.saved_at)
        .execute(&self.pool)
        .await
        .map_err(Self::db)?;
        Ok(())
    }

    async fn load(&self) -> StoreResult<Option<ModelSnapshot>> {
        let row = sqlx::query_scalar::<_, Json<ModelSnapshot>>(
            "SELECT snapshot FROM routing_model_snapshots WHERE name = $1",
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::db)?;
        Ok(row.map(|Json(snapshot)| snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::model::{ModelConfig, WeightedRoutingModel};

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrations applied
    async fn snapshot_upsert_replaces_previous() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgModelStore::new(pool).with_name(format!("test-{}", uuid::Uuid::new_v4()));

        assert!(store.load().await.unwrap().is_none());
        let model = WeightedRoutingModel::new(ModelConfig::default());
        store.save(&model.snapshot()).await.unwrap();
        store.save(&model.snapshot()).await.unwrap();
        assert!(store.load().await.unwrap().is_some());
    }
}
