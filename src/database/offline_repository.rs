use crate::database::error::DatabaseError;
use crate::offline::{
    OfflineError, OfflineResult, OfflineStore, OfflineTransaction, ProcessedTransaction,
};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

/// Offline pending/processed store backed by Postgres. Transactions are kept
/// as JSONB documents keyed by id; the primary key on the processed table
/// makes `commit` insert-if-absent across every node sharing the database.
pub struct PgOfflineStore {
    pool: PgPool,
}

impl PgOfflineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn db(err: sqlx::Error) -> OfflineError {
        OfflineError::store(DatabaseError::from_sqlx(err))
    }
}

#[async_trait]
impl OfflineStore for PgOfflineStore {
    async fn insert_pending(&self, transaction: &OfflineTransaction) -> OfflineResult<()> {
        sqlx::query(
            "INSERT INTO offline_pending_transactions (id, channel, payload, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE
             SET payload = EXCLUDED.payload, expires_at = EXCLUDED.expires_at",
        )
        .bind(&transaction.id)
        .bind(transaction.channel.as_str())
        .bind(Json(transaction))
        .bind(transaction.created_at)
        .bind(transaction.expires_at)
        .execute(&self.pool)
        .await
        .map_err(Self::db)?;
        Ok(())
    }

    async fn pending(&self, id: &str) -> OfflineResult<Option<OfflineTransaction>> {
        let row = sqlx::query_scalar::<_, Json<OfflineTransaction>>(
            "SELECT payload FROM offline_pending_transactions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::db)?;
        Ok(row.map(|Json(tx)| tx))
    }

    async fn processed(&self, id: &str) -> OfflineResult<Option<ProcessedTransaction>> {
        let row = sqlx::query_scalar::<_, Json<ProcessedTransaction>>(
            "SELECT payload FROM offline_processed_transactions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::db)?;
        Ok(row.map(|Json(record)| record))
    }

    async fn commit(&self, record: &ProcessedTransaction) -> OfflineResult<bool> {
        let result = sqlx::query(
            "INSERT INTO offline_processed_transactions (id, payload, synced_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(Json(record))
        .bind(record.synced_at)
        .execute(&self.pool)
        .await
        .map_err(Self::db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn processed_count(&self) -> OfflineResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_processed_transactions")
            .fetch_one(&self.pool)
            .await
            .map_err(Self::db)?;
        Ok(count.max(0) as usize)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::OfflineChannel;
    use crate::payments::types::Currency;
    use chrono::Utc;

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrations applied
    async fn commit_is_insert_if_absent() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgOfflineStore::new(pool);

        let record = ProcessedTransaction {
            id: format!("test-{}", uuid::Uuid::new_v4()),
            amount: 100.0,
            currency: Currency::Kes,
            merchant: "UNKNOWN".to_string(),
            timestamp: Utc::now().timestamp_millis(),
            signature: "sig".to_string(),
            channel: Some(OfflineChannel::Ussd),
            synced_at: Utc::now(),
        };
        assert!(store.commit(&record).await.unwrap());
        assert!(!store.commit(&record).await.unwrap());
        assert!(store.processed(&record.id).await.unwrap().is_some());
    }
}
