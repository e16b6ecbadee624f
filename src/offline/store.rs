//! Pending and processed offline transaction stores
//!
//! `commit` is insert-if-absent and atomic with respect to concurrent
//! callers: of any number of commits for one id exactly one returns `true`.

use super::{OfflineError, OfflineResult, OfflineTransaction, ProcessedTransaction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

#[async_trait]
pub trait OfflineStore: Send + Sync {
    async fn insert_pending(&self, transaction: &OfflineTransaction) -> OfflineResult<()>;

    async fn pending(&self, id: &str) -> OfflineResult<Option<OfflineTransaction>>;

    async fn processed(&self, id: &str) -> OfflineResult<Option<ProcessedTransaction>>;

    /// Returns `true` when this call committed the record, `false` when the
    /// id was already processed.
    async fn commit(&self, record: &ProcessedTransaction) -> OfflineResult<bool>;

    async fn processed_count(&self) -> OfflineResult<usize>;

    fn name(&self) -> &'static str;
}

#[derive(Default)]
struct OfflineState {
    pending: HashMap<String, OfflineTransaction>,
    processed: HashMap<String, ProcessedTransaction>,
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store for tests and single-process development.
#[derive(Default)]
pub struct InMemoryOfflineStore {
    state: RwLock<OfflineState>,
}

impl InMemoryOfflineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfflineStore for InMemoryOfflineStore {
    async fn insert_pending(&self, transaction: &OfflineTransaction) -> OfflineResult<()> {
        self.state
            .write()
            .await
            .pending
            .insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn pending(&self, id: &str) -> OfflineResult<Option<OfflineTransaction>> {
        Ok(self.state.read().await.pending.get(id).cloned())
    }

    async fn processed(&self, id: &str) -> OfflineResult<Option<ProcessedTransaction>> {
        Ok(self.state.read().await.processed.get(id).cloned())
    }

    async fn commit(&self, record: &ProcessedTransaction) -> OfflineResult<bool> {
        let mut state = self.state.write().await;
        if state.processed.contains_key(&record.id) {
            return Ok(false);
        }
        state.processed.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn processed_count(&self) -> OfflineResult<usize> {
        Ok(self.state.read().await.processed.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Journal store
// ============================================================================

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalEntry {
    Pending(OfflineTransaction),
    Processed(ProcessedTransaction),
}

/// Append-only JSON-lines journal, synced to disk on every write and
/// replayed into memory on open. Survives process restarts.
pub struct JournalOfflineStore {
    path: PathBuf,
    state: RwLock<OfflineState>,
    writer: Mutex<JournalWriter>,
}

struct JournalWriter {
    file: File,
    /// Journal length up to the last complete entry
    committed: u64,
    poisoned: bool,
}

impl JournalWriter {
    async fn append_line(&mut self, line: &[u8]) -> OfflineResult<()> {
        if self.poisoned {
            return Err(OfflineError::store(
                "journal is read-only after a failed rollback",
            ));
        }

        let written = async {
            self.file.write_all(line).await?;
            self.file.sync_data().await
        }
        .await;
        match written {
            Ok(()) => {
                self.committed += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.roll_back().await;
                Err(OfflineError::store(e))
            }
        }
    }

    /// Drop any partial entry past the last complete one. If that fails the
    /// writer refuses further appends.
    async fn roll_back(&mut self) {
        let truncated = async {
            self.file.set_len(self.committed).await?;
            self.file.sync_data().await
        }
        .await;
        if let Err(e) = truncated {
            error!(
                committed = self.committed,
                error = %e,
                "Failed to roll back torn journal write, refusing further appends"
            );
            self.poisoned = true;
        }
    }
}

impl JournalOfflineStore {
    pub async fn open(path: impl Into<PathBuf>) -> OfflineResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(OfflineError::store)?;
            }
        }

        let (state, torn) = Self::replay(&path).await?;
        info!(
            path = %path.display(),
            pending = state.pending.len(),
            processed = state.processed.len(),
            "Offline journal replayed"
        );

        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(OfflineError::store)?;
        if torn {
            writer.write_all(b"\n").await.map_err(OfflineError::store)?;
            writer.sync_data().await.map_err(OfflineError::store)?;
        }
        let committed = writer
            .metadata()
            .await
            .map_err(OfflineError::store)?
            .len();

        Ok(Self {
            path,
            state: RwLock::new(state),
            writer: Mutex::new(JournalWriter {
                file: writer,
                committed,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild state from the journal. The flag is set when the file ends
    /// in a torn line that must be terminated before appending.
    async fn replay(path: &Path) -> OfflineResult<(OfflineState, bool)> {
        let mut state = OfflineState::default();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((state, false)),
            Err(e) => return Err(OfflineError::store(e)),
        };

        for (index, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<JournalEntry>(line) {
                Ok(JournalEntry::Pending(tx)) => {
                    state.pending.insert(tx.id.clone(), tx);
                }
                Ok(JournalEntry::Processed(record)) => {
                    // first commit wins, matching commit semantics
                    state.processed.entry(record.id.clone()).or_insert(record);
                }
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping unreadable journal entry");
                }
            }
        }

        let torn = !bytes.is_empty() && !bytes.ends_with(b"\n");
        Ok((state, torn))
    }

    async fn append(&self, entry: &JournalEntry) -> OfflineResult<()> {
        let mut line = serde_json::to_vec(entry).map_err(OfflineError::store)?;
        line.push(b'\n');

        self.writer.lock().await.append_line(&line).await
    }
}

#[async_trait]
impl OfflineStore for JournalOfflineStore {
    async fn insert_pending(&self, transaction: &OfflineTransaction) -> OfflineResult<()> {
        self.append(&JournalEntry::Pending(transaction.clone()))
            .await?;
        self.state
            .write()
            .await
            .pending
            .insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn pending(&self, id: &str) -> OfflineResult<Option<OfflineTransaction>> {
        Ok(self.state.read().await.pending.get(id).cloned())
    }

    async fn processed(&self, id: &str) -> OfflineResult<Option<ProcessedTransaction>> {
        Ok(self.state.read().await.processed.get(id).cloned())
    }

    async fn commit(&self, record: &ProcessedTransaction) -> OfflineResult<bool> {
        // held across the append so concurrent commits for one id serialize
        let mut state = self.state.write().await;
        if state.processed.contains_key(&record.id) {
            return Ok(false);
        }
        self.append(&JournalEntry::Processed(record.clone())).await?;
        state.processed.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn processed_count(&self) -> OfflineResult<usize> {
        Ok(self.state.read().await.processed.len())
    }

    fn name(&self) -> &'static str {
        "journal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::OfflineChannel;
    use crate::payments::types::Currency;
    use chrono::Utc;
    use std::sync::Arc;

    fn journal_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("paygrid-offline-{}", uuid::Uuid::new_v4()))
            .join("journal.jsonl")
    }

    fn pending(id: &str) -> OfflineTransaction {
        let now = Utc::now();
        OfflineTransaction {
            id: id.to_string(),
            amount: 100.0,
            currency: Currency::Kes,
            customer_ref: None,
            merchant: "UNKNOWN".to_string(),
            channel: OfflineChannel::Ussd,
            code: "*123*100*abcdef12#".to_string(),
            timestamp: now.timestamp_millis(),
            signature: "sig".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(15),
            metadata: HashMap::new(),
        }
    }

    fn processed(id: &str) -> ProcessedTransaction {
        ProcessedTransaction {
            id: id.to_string(),
            amount: 100.0,
            currency: Currency::Kes,
            merchant: "UNKNOWN".to_string(),
            timestamp: 1,
            signature: "sig".to_string(),
            channel: Some(OfflineChannel::Ussd),
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_commits_for_one_id_succeed_once() {
        let store = Arc::new(InMemoryOfflineStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.commit(&processed("tx-1")).await.unwrap() })
            })
            .collect();

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                committed += 1;
            }
        }
        assert_eq!(committed, 1);
        assert_eq!(store.processed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn journal_survives_reopen() {
        let path = journal_path();
        {
            let store = JournalOfflineStore::open(&path).await.unwrap();
            store.insert_pending(&pending("tx-a")).await.unwrap();
            store.insert_pending(&pending("tx-b")).await.unwrap();
            assert!(store.commit(&processed("tx-a")).await.unwrap());
        }

        let reopened = JournalOfflineStore::open(&path).await.unwrap();
        assert!(reopened.pending("tx-b").await.unwrap().is_some());
        assert!(reopened.processed("tx-a").await.unwrap().is_some());
        assert!(!reopened.commit(&processed("tx-a")).await.unwrap());
        assert_eq!(reopened.processed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn torn_trailing_line_is_skipped() {
        let path = journal_path();
        {
            let store = JournalOfflineStore::open(&path).await.unwrap();
            store.insert_pending(&pending("tx-a")).await.unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"{\"kind\":\"processed\",\"id\":").await.unwrap();
        file.sync_all().await.unwrap();

        let reopened = JournalOfflineStore::open(&path).await.unwrap();
        assert!(reopened.pending("tx-a").await.unwrap().is_some());
        assert_eq!(reopened.processed_count().await.unwrap(), 0);

        // appends after the torn line stay readable
        assert!(reopened.commit(&processed("tx-a")).await.unwrap());
        drop(reopened);
        let again = JournalOfflineStore::open(&path).await.unwrap();
        assert!(again.processed("tx-a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_append_is_rolled_back_before_the_next_entry() {
        let path = journal_path();
        let store = JournalOfflineStore::open(&path).await.unwrap();
        store.insert_pending(&pending("tx-a")).await.unwrap();

        {
            // a write that died halfway through an entry
            let mut writer = store.writer.lock().await;
            writer.file.write_all(b"{\"kind\":\"processed\",\"id\":\"tx").await.unwrap();
            writer.file.flush().await.unwrap();
            writer.roll_back().await;
            assert!(!writer.poisoned);
        }

        assert!(store.commit(&processed("tx-a")).await.unwrap());
        drop(store);

        let reopened = JournalOfflineStore::open(&path).await.unwrap();
        assert!(reopened.pending("tx-a").await.unwrap().is_some());
        assert!(reopened.processed("tx-a").await.unwrap().is_some());
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn poisoned_journal_refuses_appends() {
        let store = JournalOfflineStore::open(journal_path()).await.unwrap();
        store.writer.lock().await.poisoned = true;

        assert!(store.insert_pending(&pending("tx-a")).await.is_err());
        assert!(store.pending("tx-a").await.unwrap().is_none());
    }
}
