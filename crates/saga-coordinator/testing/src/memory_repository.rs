//! In-memory implementation of TransactionRepository for testing.
//!
//! Besides storage it can inject failures, add latency and hold every write
//! behind a gate, which is how tests fill the coordinator log on demand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use saga_coordinator_core::config::CoordinatorConfig;
use saga_coordinator_core::model::{TransId, TransactionRecord, TransactionStatus};
use saga_coordinator_core::port::TransactionRepository;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Errors produced by [`InMemoryTransactionRepository`].
#[derive(Debug, thiserror::Error)]
pub enum InMemoryRepositoryError {
    #[error("Injected failure on {op} for {trans_id}")]
    Injected { op: &'static str, trans_id: TransId },
}

/// One write as seen by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub trans_id: TransId,
    pub op: &'static str,
}

/// In-memory transaction repository.
#[derive(Debug, Clone)]
pub struct InMemoryTransactionRepository {
    inner: Arc<InnerStore>,
}

#[derive(Debug)]
struct InnerStore {
    records: RwLock<HashMap<TransId, TransactionRecord>>,
    journal: RwLock<Vec<JournalEntry>>,
    namespace: RwLock<Option<String>>,
    failing: AtomicBool,
    failing_ids: RwLock<HashSet<TransId>>,
    latency_ms: AtomicU64,
    gate: watch::Sender<bool>,
}

impl Default for InMemoryTransactionRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransactionRepository {
    /// Create a new in-memory repository.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(InnerStore {
                records: RwLock::new(HashMap::new()),
                journal: RwLock::new(Vec::new()),
                namespace: RwLock::new(None),
                failing: AtomicBool::new(false),
                failing_ids: RwLock::new(HashSet::new()),
                latency_ms: AtomicU64::new(0),
                gate,
            }),
        }
    }

    /// Delay every write by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Fail every write while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail every write for one transaction id.
    pub fn fail_for(&self, trans_id: &TransId) {
        self.inner.failing_ids.write().insert(trans_id.clone());
    }

    /// Block writes until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.inner.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Store a record directly, bypassing the coordinator.
    pub fn insert(&self, record: TransactionRecord) {
        self.inner
            .records
            .write()
            .insert(record.trans_id.clone(), record);
    }

    pub fn get(&self, trans_id: &TransId) -> Option<TransactionRecord> {
        self.inner.records.read().get(trans_id).cloned()
    }

    /// Get the number of records stored.
    pub fn record_count(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Writes applied so far, in order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.journal.read().clone()
    }

    /// Operations applied for one transaction id, in order.
    pub fn ops_for(&self, trans_id: &TransId) -> Vec<&'static str> {
        self.inner
            .journal
            .read()
            .iter()
            .filter(|entry| &entry.trans_id == trans_id)
            .map(|entry| entry.op)
            .collect()
    }

    /// Namespace passed to `init`.
    pub fn namespace(&self) -> Option<String> {
        self.inner.namespace.read().clone()
    }

    /// Clear all data.
    pub fn clear(&self) {
        self.inner.records.write().clear();
        self.inner.journal.write().clear();
    }

    async fn before_write(
        &self,
        op: &'static str,
        trans_id: &TransId,
    ) -> Result<(), InMemoryRepositoryError> {
        let mut gate = self.inner.gate.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = gate.wait_for(|open| *open).await;

        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.inner.failing.load(Ordering::SeqCst)
            || self.inner.failing_ids.read().contains(trans_id)
        {
            return Err(InMemoryRepositoryError::Injected {
                op,
                trans_id: trans_id.clone(),
            });
        }

        self.inner.journal.write().push(JournalEntry {
            trans_id: trans_id.clone(),
            op,
        });
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    type Error = InMemoryRepositoryError;

    async fn init(&self, namespace: &str, _config: &CoordinatorConfig) -> Result<(), Self::Error> {
        *self.inner.namespace.write() = Some(namespace.to_string());
        Ok(())
    }

    async fn create(&self, record: &TransactionRecord) -> Result<usize, Self::Error> {
        self.before_write("create", &record.trans_id).await?;
        let mut records = self.inner.records.write();
        if records.contains_key(&record.trans_id) {
            return Ok(0);
        }
        records.insert(record.trans_id.clone(), record.clone());
        Ok(1)
    }

    async fn find_by_trans_id(
        &self,
        trans_id: &TransId,
    ) -> Result<Option<TransactionRecord>, Self::Error> {
        Ok(self.inner.records.read().get(trans_id).cloned())
    }

    async fn remove(&self, trans_id: &TransId) -> Result<usize, Self::Error> {
        self.before_write("remove", trans_id).await?;
        Ok(self
            .inner
            .records
            .write()
            .remove(trans_id)
            .map_or(0, |_| 1))
    }

    async fn update(&self, record: &TransactionRecord) -> Result<usize, Self::Error> {
        self.before_write("update", &record.trans_id).await?;
        let mut records = self.inner.records.write();
        match records.get_mut(&record.trans_id) {
            Some(stored) => {
                *stored = record.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_participants(&self, record: &TransactionRecord) -> Result<usize, Self::Error> {
        self.before_write("update_participants", &record.trans_id)
            .await?;
        let mut records = self.inner.records.write();
        match records.get_mut(&record.trans_id) {
            Some(stored) => {
                stored.merge_participants(record.participants());
                stored.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_status(
        &self,
        trans_id: &TransId,
        status: TransactionStatus,
    ) -> Result<usize, Self::Error> {
        self.before_write("update_status", trans_id).await?;
        let mut records = self.inner.records.write();
        match records.get_mut(trans_id) {
            Some(stored) => {
                stored.status = status;
                stored.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_stale_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, Self::Error> {
        let mut stale: Vec<TransactionRecord> = self
            .inner
            .records
            .read()
            .values()
            .filter(|r| r.status == TransactionStatus::Begin && r.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_coordinator_core::model::{
        CompensationInvocation, Participant, TargetDescriptor,
    };

    fn record() -> TransactionRecord {
        TransactionRecord::start(TargetDescriptor::new("orders", "place"))
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = InMemoryTransactionRepository::new();
        let record = record();

        assert_eq!(repo.create(&record).await.unwrap(), 1);
        assert_eq!(repo.create(&record).await.unwrap(), 0);
        assert_eq!(
            repo.find_by_trans_id(&record.trans_id).await.unwrap(),
            Some(record.clone())
        );
        assert_eq!(repo.ops_for(&record.trans_id), vec!["create", "create"]);
    }

    #[tokio::test]
    async fn test_update_missing_record_affects_nothing() {
        let repo = InMemoryTransactionRepository::new();
        assert_eq!(repo.update(&record()).await.unwrap(), 0);
        assert_eq!(
            repo.update_status(&TransId::from("absent"), TransactionStatus::Commit)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_update_participants_keeps_status() {
        let repo = InMemoryTransactionRepository::new();
        let mut stored = record();
        repo.insert(stored.clone());
        repo.update_status(&stored.trans_id, TransactionStatus::Commit)
            .await
            .unwrap();

        let id = stored.trans_id.clone();
        stored.register_participant(Participant::new(
            id.clone(),
            "inventory",
            "release",
            CompensationInvocation::new("inventory.release"),
        ));
        assert_eq!(repo.update_participants(&stored).await.unwrap(), 1);

        let found = repo.get(&id).unwrap();
        assert_eq!(found.status, TransactionStatus::Commit);
        assert_eq!(found.participants().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_listing_filters_status_and_age() {
        let repo = InMemoryTransactionRepository::new();
        let old = Utc::now() - chrono::Duration::minutes(10);

        let stale = record().with_created_at(old);
        let mut committed = record().with_created_at(old);
        committed.transition_to(TransactionStatus::Commit).unwrap();
        let fresh = record();

        repo.insert(stale.clone());
        repo.insert(committed);
        repo.insert(fresh);

        let found = repo
            .list_stale_before(Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].trans_id, stale.trans_id);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let repo = InMemoryTransactionRepository::new();
        let record = record();
        repo.fail_for(&record.trans_id);
        assert!(repo.create(&record).await.is_err());
        assert_eq!(repo.record_count(), 0);

        repo.set_failing(true);
        assert!(repo.remove(&TransId::from("other")).await.is_err());
    }

    #[tokio::test]
    async fn test_pause_holds_writes() {
        let repo = InMemoryTransactionRepository::new();
        repo.pause();

        let writer = {
            let repo = repo.clone();
            let record = record();
            tokio::spawn(async move { repo.create(&record).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());
        assert_eq!(repo.record_count(), 0);

        repo.resume();
        assert_eq!(writer.await.unwrap().unwrap(), 1);
        assert_eq!(repo.record_count(), 1);
    }
}
