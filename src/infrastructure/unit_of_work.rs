//! Unit of work
//!
//! Collects entity writes and outbox records for one logical request and
//! applies them with a single `transact_write`. Nothing is visible in the store
//! until [`UnitOfWork::commit`] succeeds.

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{ItemKey, KeyValueStore, WriteOp};
use crate::commands::{GraphCommandError, GraphCommandResult};
use crate::domain_events::EventEnvelope;
use crate::outbox::{EventRecord, OutboxRepository};

/// Persistence adapter that can stage its writes into a [`UnitOfWork`].
///
/// Every repository implements this; there is no separate immediate-write path.
pub trait TransactionalRepository<E>: Send + Sync {
    /// Writes that persist `entity`
    fn save_operations(&self, entity: &E) -> GraphCommandResult<Vec<WriteOp>>;

    /// Writes that remove `entity`
    fn delete_operations(&self, entity: &E) -> GraphCommandResult<Vec<WriteOp>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Committed,
    RolledBack,
}

/// Outcome of a successful commit
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub transaction_id: Uuid,
    /// Store operations applied, outbox records included
    pub items_written: usize,
    /// Events now durably pending in the outbox
    pub events: Vec<EventEnvelope>,
}

/// One transaction against the store.
///
/// Dropping an uncommitted unit of work discards everything staged.
pub struct UnitOfWork {
    id: Uuid,
    store: Arc<dyn KeyValueStore>,
    operations: IndexMap<ItemKey, WriteOp>,
    events: Vec<EventEnvelope>,
    state: State,
}

impl UnitOfWork {
    /// Start a new transaction
    pub fn begin(store: Arc<dyn KeyValueStore>) -> Self {
        let id = Uuid::new_v4();
        debug!(transaction_id = %id, "Unit of work started");
        Self {
            id,
            store,
            operations: IndexMap::new(),
            events: Vec::new(),
            state: State::Active,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Number of store operations staged so far
    pub fn staged_items(&self) -> usize {
        self.operations.len()
    }

    /// Events staged so far
    pub fn staged_events(&self) -> &[EventEnvelope] {
        &self.events
    }

    /// Stage the writes that save `entity`.
    ///
    /// A later write to the same key replaces the earlier one.
    pub fn register_save<E, R>(&mut self, repository: &R, entity: &E) -> GraphCommandResult<()>
    where
        R: TransactionalRepository<E> + ?Sized,
    {
        self.ensure_active()?;
        let operations = repository.save_operations(entity)?;
        self.stage(operations);
        Ok(())
    }

    /// Stage the writes that delete `entity`
    pub fn register_delete<E, R>(&mut self, repository: &R, entity: &E) -> GraphCommandResult<()>
    where
        R: TransactionalRepository<E> + ?Sized,
    {
        self.ensure_active()?;
        let operations = repository.delete_operations(entity)?;
        self.stage(operations);
        Ok(())
    }

    /// Stage an event as a pending outbox record
    pub fn register_event(&mut self, event: EventEnvelope) -> GraphCommandResult<()> {
        self.ensure_active()?;
        let record = EventRecord::pending(&event)?;
        let operation = OutboxRepository::insert_operation(&record)?;
        self.stage([operation]);
        self.events.push(event);
        Ok(())
    }

    /// Stage several events, typically the drained buffer of an aggregate
    pub fn register_events(
        &mut self,
        events: impl IntoIterator<Item = EventEnvelope>,
    ) -> GraphCommandResult<()> {
        for event in events {
            self.register_event(event)?;
        }
        Ok(())
    }

    /// Apply everything staged in one atomic write.
    ///
    /// Fails without touching the store when the staged operations exceed the
    /// store's transaction limit. On any failure the unit of work is rolled back.
    pub async fn commit(&mut self) -> GraphCommandResult<CommitReceipt> {
        self.ensure_active()?;

        let items = self.operations.len();
        let limit = self.store.max_transaction_items();
        if items > limit {
            warn!(transaction_id = %self.id, items, limit, "Transaction exceeds store limit");
            self.rollback();
            return Err(GraphCommandError::TransactionTooLarge { items, limit });
        }

        if items > 0 {
            let operations: Vec<WriteOp> = self.operations.drain(..).map(|(_, op)| op).collect();
            if let Err(e) = self.store.transact_write(operations).await {
                warn!(transaction_id = %self.id, error = %e, "Commit failed");
                self.rollback();
                return Err(e.into());
            }
        }

        self.state = State::Committed;
        let events = std::mem::take(&mut self.events);
        info!(
            transaction_id = %self.id,
            items_written = items,
            event_count = events.len(),
            "Unit of work committed"
        );

        Ok(CommitReceipt {
            transaction_id: self.id,
            items_written: items,
            events,
        })
    }

    /// Discard everything staged. A no-op once committed or rolled back.
    pub fn rollback(&mut self) {
        if self.state != State::Active {
            return;
        }
        if !self.operations.is_empty() {
            debug!(
                transaction_id = %self.id,
                discarded = self.operations.len(),
                "Unit of work rolled back"
            );
        }
        self.operations.clear();
        self.events.clear();
        self.state = State::RolledBack;
    }

    fn stage(&mut self, operations: impl IntoIterator<Item = WriteOp>) {
        for operation in operations {
            self.operations.insert(operation.key().clone(), operation);
        }
    }

    fn ensure_active(&self) -> GraphCommandResult<()> {
        match self.state {
            State::Active => Ok(()),
            State::Committed => Err(GraphCommandError::BusinessRuleViolation(
                "unit of work already committed".to_string(),
            )),
            State::RolledBack => Err(GraphCommandError::BusinessRuleViolation(
                "unit of work already rolled back".to_string(),
            )),
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_events::GraphDomainEvent;
    use crate::events::NodeAddedToGraph;
    use crate::infrastructure::store::{Condition, Item};
    use crate::infrastructure::InMemoryStore;
    use crate::value_objects::{GraphId, NodeId};
    use serde_json::json;

    struct PlainRepository;

    impl TransactionalRepository<(String, i64)> for PlainRepository {
        fn save_operations(&self, entity: &(String, i64)) -> GraphCommandResult<Vec<WriteOp>> {
            let key = ItemKey::new("T", entity.0.clone());
            let item = Item::encode(key, &json!({ "v": entity.1 }))?;
            Ok(vec![WriteOp::put(item)])
        }

        fn delete_operations(&self, entity: &(String, i64)) -> GraphCommandResult<Vec<WriteOp>> {
            Ok(vec![WriteOp::delete(ItemKey::new("T", entity.0.clone()))])
        }
    }

    fn event() -> EventEnvelope {
        EventEnvelope::new(
            GraphDomainEvent::NodeAddedToGraph(NodeAddedToGraph {
                graph_id: GraphId::new(),
                node_id: NodeId::new(),
            }),
            2,
        )
    }

    #[tokio::test]
    async fn test_commit_writes_entities_and_events_together() {
        let store = Arc::new(InMemoryStore::new());
        let mut uow = UnitOfWork::begin(store.clone());
        uow.register_save(&PlainRepository, &("a".to_string(), 1)).unwrap();
        uow.register_event(event()).unwrap();
        assert_eq!(uow.staged_items(), 2);

        let receipt = uow.commit().await.unwrap();
        assert_eq!(receipt.items_written, 2);
        assert_eq!(receipt.events.len(), 1);
        assert_eq!(store.len(), 2);

        // Rollback after commit is a no-op
        uow.rollback();
        assert_eq!(store.len(), 2);
        assert!(uow.register_event(event()).is_err());
    }

    #[tokio::test]
    async fn test_later_save_replaces_earlier_one() {
        let store = Arc::new(InMemoryStore::new());
        let mut uow = UnitOfWork::begin(store.clone());
        uow.register_save(&PlainRepository, &("a".to_string(), 1)).unwrap();
        uow.register_save(&PlainRepository, &("a".to_string(), 2)).unwrap();
        assert_eq!(uow.staged_items(), 1);
        uow.commit().await.unwrap();

        let item = store.get(&ItemKey::new("T", "a")).await.unwrap().unwrap();
        assert_eq!(item.attributes["v"], 2);
    }

    #[tokio::test]
    async fn test_oversized_commit_fails_fast() {
        let store = Arc::new(InMemoryStore::with_transaction_limit(3));
        let mut uow = UnitOfWork::begin(store.clone());
        for i in 0..4 {
            uow.register_save(&PlainRepository, &(i.to_string(), i)).unwrap();
        }

        assert!(matches!(
            uow.commit().await,
            Err(GraphCommandError::TransactionTooLarge { items: 4, limit: 3 })
        ));
        assert!(store.is_empty());
        assert!(!uow.is_active());
    }

    #[tokio::test]
    async fn test_failed_condition_leaves_nothing_behind() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(Item::encode(ItemKey::new("T", "taken"), &json!({})).unwrap(), None)
            .await
            .unwrap();

        struct GuardedRepository;
        impl TransactionalRepository<String> for GuardedRepository {
            fn save_operations(&self, entity: &String) -> GraphCommandResult<Vec<WriteOp>> {
                let item = Item::encode(ItemKey::new("T", entity.clone()), &json!({}))?;
                Ok(vec![WriteOp::put_if(item, Condition::NotExists)])
            }
            fn delete_operations(&self, _: &String) -> GraphCommandResult<Vec<WriteOp>> {
                Ok(vec![])
            }
        }

        let mut uow = UnitOfWork::begin(store.clone());
        uow.register_save(&GuardedRepository, &"fresh".to_string()).unwrap();
        uow.register_save(&GuardedRepository, &"taken".to_string()).unwrap();
        uow.register_event(event()).unwrap();

        let result = uow.commit().await;
        assert!(matches!(result, Err(GraphCommandError::ConcurrentModification(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_discards_staged_work() {
        let store = Arc::new(InMemoryStore::new());
        {
            let mut uow = UnitOfWork::begin(store.clone());
            uow.register_save(&PlainRepository, &("a".to_string(), 1)).unwrap();
            uow.register_delete(&PlainRepository, &("b".to_string(), 1)).unwrap();
        }
        assert!(store.is_empty());
    }
}
