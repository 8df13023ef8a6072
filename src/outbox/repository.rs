//! Outbox persistence

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::record::{EventRecord, PublishStatus};
use super::OutboxError;
use crate::commands::GraphCommandResult;
use crate::infrastructure::{
    keys, Condition, Item, ItemKey, KeyValueStore, Query, StoreError, TransactionalRepository,
    WriteOp,
};

/// Reads and status transitions of outbox records.
///
/// New records only enter the store through a unit of work, alongside the
/// entity writes that produced them.
#[derive(Clone)]
pub struct OutboxRepository {
    store: Arc<dyn KeyValueStore>,
}

impl OutboxRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Insert of a new record; fails the transaction if the same
    /// `(aggregate, version, type)` is already present
    pub fn insert_operation(record: &EventRecord) -> Result<WriteOp, OutboxError> {
        Ok(WriteOp::put_if(Self::to_item(record)?, Condition::NotExists))
    }

    pub async fn get(&self, key: &ItemKey) -> Result<Option<EventRecord>, OutboxError> {
        match self.store.get(key).await? {
            Some(item) => Ok(Some(item.decode()?)),
            None => Ok(None),
        }
    }

    /// Oldest pending records first
    pub async fn fetch_pending(&self, limit: usize) -> Result<Vec<EventRecord>, OutboxError> {
        self.fetch_by_status(PublishStatus::Pending, limit).await
    }

    /// Records parked after the attempt ceiling
    pub async fn fetch_failed(&self, limit: usize) -> Result<Vec<EventRecord>, OutboxError> {
        self.fetch_by_status(PublishStatus::Failed, limit).await
    }

    pub async fn count_by_status(&self, status: PublishStatus) -> Result<usize, OutboxError> {
        let query = Query::secondary(keys::outbox_partition(status.as_str()));
        Ok(self.store.query(query).await?.len())
    }

    /// Mark a record delivered. Records that are already published, or gone,
    /// are left alone.
    pub async fn mark_published(&self, record: &EventRecord) -> Result<(), OutboxError> {
        let Some(mut current) = self.get(&record.key()).await? else {
            debug!(event_id = %record.event_id, "Outbox record missing, nothing to mark");
            return Ok(());
        };
        if current.status == PublishStatus::Published {
            return Ok(());
        }

        current.status = PublishStatus::Published;
        current.updated_at = Utc::now();
        self.replace(&current).await
    }

    /// Count a failed delivery attempt.
    ///
    /// Returns the record's new status: `Pending` while attempts remain below
    /// `max_attempts`, `Failed` once the ceiling is reached.
    pub async fn record_failure(
        &self,
        record: &EventRecord,
        error: &str,
        max_attempts: u32,
    ) -> Result<PublishStatus, OutboxError> {
        let Some(mut current) = self.get(&record.key()).await? else {
            return Err(OutboxError::RecordNotFound(record.event_id));
        };
        if current.status != PublishStatus::Pending {
            return Ok(current.status);
        }

        current.publish_attempts += 1;
        current.last_error = Some(error.to_string());
        current.updated_at = Utc::now();
        if current.publish_attempts >= max_attempts {
            current.status = PublishStatus::Failed;
        }
        self.replace(&current).await?;
        Ok(current.status)
    }

    /// Put a failed record back in the pending queue with a fresh attempt count.
    /// Returns whether anything was requeued.
    pub async fn requeue_failed(&self, record: &EventRecord) -> Result<bool, OutboxError> {
        let Some(mut current) = self.get(&record.key()).await? else {
            return Ok(false);
        };
        if current.status != PublishStatus::Failed {
            return Ok(false);
        }

        current.status = PublishStatus::Pending;
        current.publish_attempts = 0;
        current.updated_at = Utc::now();
        self.replace(&current).await?;
        Ok(true)
    }

    /// Find a record by event id within a status
    pub async fn find(
        &self,
        status: PublishStatus,
        event_id: Uuid,
    ) -> Result<Option<EventRecord>, OutboxError> {
        let records = self.fetch_by_status(status, usize::MAX).await?;
        Ok(records.into_iter().find(|r| r.event_id == event_id))
    }

    async fn fetch_by_status(
        &self,
        status: PublishStatus,
        limit: usize,
    ) -> Result<Vec<EventRecord>, OutboxError> {
        let query = Query::secondary(keys::outbox_partition(status.as_str())).with_limit(limit);
        let items = self.store.query(query).await?;
        items
            .iter()
            .map(|item| item.decode().map_err(OutboxError::from))
            .collect()
    }

    async fn replace(&self, record: &EventRecord) -> Result<(), OutboxError> {
        match self
            .store
            .put(Self::to_item(record)?, Some(Condition::Exists))
            .await
        {
            Ok(()) => Ok(()),
            // Removed underneath us; nothing left to update
            Err(StoreError::ConditionFailed(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn to_item(record: &EventRecord) -> Result<Item, OutboxError> {
        Ok(Item::encode(record.key(), record)?.with_secondary_key(record.status_key()))
    }
}

impl TransactionalRepository<EventRecord> for OutboxRepository {
    fn save_operations(&self, record: &EventRecord) -> GraphCommandResult<Vec<WriteOp>> {
        Ok(vec![Self::insert_operation(record)?])
    }

    fn delete_operations(&self, record: &EventRecord) -> GraphCommandResult<Vec<WriteOp>> {
        Ok(vec![WriteOp::delete(record.key())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_events::{EventEnvelope, GraphDomainEvent};
    use crate::events::NodeAddedToGraph;
    use crate::infrastructure::{InMemoryStore, UnitOfWork};
    use crate::value_objects::{GraphId, NodeId};

    async fn seeded(count: u64) -> (Arc<InMemoryStore>, OutboxRepository) {
        let store = Arc::new(InMemoryStore::new());
        let graph_id = GraphId::new();
        let mut uow = UnitOfWork::begin(store.clone());
        for version in 1..=count {
            uow.register_event(EventEnvelope::new(
                GraphDomainEvent::NodeAddedToGraph(NodeAddedToGraph {
                    graph_id,
                    node_id: NodeId::new(),
                }),
                version,
            ))
            .unwrap();
        }
        uow.commit().await.unwrap();
        (store.clone(), OutboxRepository::new(store))
    }

    #[tokio::test]
    async fn test_fetch_pending_is_bounded() {
        let (_, repo) = seeded(5).await;
        assert_eq!(repo.fetch_pending(3).await.unwrap().len(), 3);
        assert_eq!(repo.fetch_pending(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_mark_published_is_idempotent() {
        let (store, repo) = seeded(1).await;
        let record = repo.fetch_pending(1).await.unwrap().remove(0);

        repo.mark_published(&record).await.unwrap();
        repo.mark_published(&record).await.unwrap();
        assert!(repo.fetch_pending(10).await.unwrap().is_empty());
        assert_eq!(repo.count_by_status(PublishStatus::Published).await.unwrap(), 1);

        // Missing record is not an error either
        store.delete(&record.key(), None).await.unwrap();
        repo.mark_published(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_reach_ceiling_and_requeue() {
        let (_, repo) = seeded(1).await;
        let record = repo.fetch_pending(1).await.unwrap().remove(0);

        assert_eq!(
            repo.record_failure(&record, "bus down", 3).await.unwrap(),
            PublishStatus::Pending
        );
        assert_eq!(
            repo.record_failure(&record, "bus down", 3).await.unwrap(),
            PublishStatus::Pending
        );
        assert_eq!(
            repo.record_failure(&record, "bus down", 3).await.unwrap(),
            PublishStatus::Failed
        );

        assert!(repo.fetch_pending(10).await.unwrap().is_empty());
        let failed = repo.fetch_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].publish_attempts, 3);
        assert_eq!(failed[0].last_error.as_deref(), Some("bus down"));

        assert!(repo.requeue_failed(&failed[0]).await.unwrap());
        let pending = repo.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].publish_attempts, 0);
        assert!(!repo.requeue_failed(&pending[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_event_key_is_rejected() {
        let (store, repo) = seeded(1).await;
        let record = repo.fetch_pending(1).await.unwrap().remove(0);

        let mut uow = UnitOfWork::begin(store.clone());
        uow.register_event(record.envelope().unwrap()).unwrap();
        assert!(uow.commit().await.is_err());
    }
}
