//! In-memory key-value store

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::store::{
    Condition, Index, Item, ItemKey, KeyValueStore, Query, StoreError, StoreResult, WriteOp,
};

/// Default per-transaction item limit
pub const DEFAULT_MAX_TRANSACTION_ITEMS: usize = 100;

/// Thread-safe in-memory [`KeyValueStore`].
///
/// Transactions are evaluated and applied under one write lock, so they are
/// atomic with respect to every other operation.
#[derive(Debug)]
pub struct InMemoryStore {
    items: RwLock<BTreeMap<ItemKey, Item>>,
    max_transaction_items: usize,
    unavailable: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_transaction_limit(DEFAULT_MAX_TRANSACTION_ITEMS)
    }

    pub fn with_transaction_limit(max_transaction_items: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            max_transaction_items,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Reap items whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, item| !item.is_expired(now));
        let removed = before - items.len();
        if removed > 0 {
            debug!(removed, "Purged expired items");
        }
        removed
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }

    fn check(
        condition: Option<&Condition>,
        key: &ItemKey,
        current: Option<&Item>,
    ) -> StoreResult<()> {
        match condition {
            Some(condition) if !condition.holds(current) => Err(StoreError::ConditionFailed(
                format!("{condition:?} does not hold for {key}"),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &ItemKey) -> StoreResult<Option<Item>> {
        self.check_available()?;
        Ok(self.items.read().get(key).cloned())
    }

    async fn put(&self, item: Item, condition: Option<Condition>) -> StoreResult<()> {
        self.check_available()?;
        let mut items = self.items.write();
        Self::check(condition.as_ref(), &item.key, items.get(&item.key))?;
        items.insert(item.key.clone(), item);
        Ok(())
    }

    async fn delete(&self, key: &ItemKey, condition: Option<Condition>) -> StoreResult<()> {
        self.check_available()?;
        let mut items = self.items.write();
        Self::check(condition.as_ref(), key, items.get(key))?;
        items.remove(key);
        Ok(())
    }

    async fn transact_write(&self, operations: Vec<WriteOp>) -> StoreResult<()> {
        self.check_available()?;
        if operations.len() > self.max_transaction_items {
            return Err(StoreError::TransactionTooLarge {
                items: operations.len(),
                limit: self.max_transaction_items,
            });
        }

        let mut seen = HashSet::with_capacity(operations.len());
        for op in &operations {
            if !seen.insert(op.key()) {
                return Err(StoreError::DuplicateKey(op.key().clone()));
            }
        }

        let mut items = self.items.write();
        for op in &operations {
            Self::check(op.condition(), op.key(), items.get(op.key()))?;
        }

        for op in operations {
            match op {
                WriteOp::Put { item, .. } => {
                    items.insert(item.key.clone(), item);
                }
                WriteOp::Delete { key, .. } => {
                    items.remove(&key);
                }
                WriteOp::Check { .. } => {}
            }
        }
        Ok(())
    }

    async fn query(&self, query: Query) -> StoreResult<Vec<Item>> {
        self.check_available()?;
        let items = self.items.read();
        let prefix = query.sort_prefix.as_deref().unwrap_or("");
        let limit = query.limit.unwrap_or(usize::MAX);

        let results = match query.index {
            Index::Primary => {
                let start = ItemKey::new(query.partition.clone(), prefix);
                items
                    .range(start..)
                    .take_while(|(key, _)| {
                        key.partition == query.partition && key.sort.starts_with(prefix)
                    })
                    .map(|(_, item)| item.clone())
                    .take(limit)
                    .collect()
            }
            Index::Secondary => {
                let mut matched: Vec<&Item> = items
                    .values()
                    .filter(|item| {
                        item.secondary_key.as_ref().is_some_and(|key| {
                            key.partition == query.partition && key.sort.starts_with(prefix)
                        })
                    })
                    .collect();
                matched.sort_by(|a, b| a.secondary_key.cmp(&b.secondary_key));
                matched.into_iter().take(limit).cloned().collect()
            }
        };
        Ok(results)
    }

    fn max_transaction_items(&self) -> usize {
        self.max_transaction_items
    }
}
