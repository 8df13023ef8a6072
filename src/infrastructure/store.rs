//! Key-value store port
//!
//! The persistence layer talks to a partitioned key-value store that offers
//! conditional single-item writes, all-or-nothing multi-item transactions and
//! one secondary index. Adapters implement [`KeyValueStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A write condition did not hold
    #[error("Condition failed: {0}")]
    ConditionFailed(String),

    /// Too many items for one transaction
    #[error("Transaction has {items} items, limit is {limit}")]
    TransactionTooLarge { items: usize, limit: usize },

    /// The same key appears twice in one transaction
    #[error("Key {0} appears more than once in a transaction")]
    DuplicateKey(ItemKey),

    /// The store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// An item could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

/// Partition + sort key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

/// A stored item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Primary key
    pub key: ItemKey,
    /// Key in the secondary index, if the item is indexed
    pub secondary_key: Option<ItemKey>,
    /// Item body, a JSON object
    pub attributes: serde_json::Value,
    /// When the store may reap the item
    pub expires_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Encode a value as the item body
    pub fn encode<T: Serialize>(key: ItemKey, value: &T) -> StoreResult<Self> {
        Ok(Self {
            key,
            secondary_key: None,
            attributes: serde_json::to_value(value)?,
            expires_at: None,
        })
    }

    /// Decode the item body
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.attributes.clone())?)
    }

    pub fn with_secondary_key(mut self, key: ItemKey) -> Self {
        self.secondary_key = Some(key);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Top-level attribute by name
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Whether the item's expiry has passed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Write precondition evaluated against the current item
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// No item exists under the key
    NotExists,
    /// An item exists under the key
    Exists,
    /// No item exists, or the existing one expired before the given instant
    NotExistsOrExpired(DateTime<Utc>),
    /// The item exists and each named attribute equals the given value
    AttributesEqual(Vec<(String, serde_json::Value)>),
}

impl Condition {
    /// Shorthand for a single attribute match
    pub fn attribute_equals(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Condition::AttributesEqual(vec![(name.into(), value.into())])
    }

    /// Evaluate against the current item
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match (self, current) {
            (Condition::NotExists, current) => current.is_none(),
            (Condition::Exists, current) => current.is_some(),
            (Condition::NotExistsOrExpired(_), None) => true,
            (Condition::NotExistsOrExpired(now), Some(item)) => item.is_expired(*now),
            (Condition::AttributesEqual(_), None) => false,
            (Condition::AttributesEqual(expected), Some(item)) => expected
                .iter()
                .all(|(name, value)| item.attribute(name) == Some(value)),
        }
    }
}

/// One write inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        item: Item,
        condition: Option<Condition>,
    },
    Delete {
        key: ItemKey,
        condition: Option<Condition>,
    },
    /// Assert a condition without writing
    Check { key: ItemKey, condition: Condition },
}

impl WriteOp {
    pub fn put(item: Item) -> Self {
        WriteOp::Put {
            item,
            condition: None,
        }
    }

    pub fn put_if(item: Item, condition: Condition) -> Self {
        WriteOp::Put {
            item,
            condition: Some(condition),
        }
    }

    pub fn delete(key: ItemKey) -> Self {
        WriteOp::Delete {
            key,
            condition: None,
        }
    }

    /// Key the operation targets
    pub fn key(&self) -> &ItemKey {
        match self {
            WriteOp::Put { item, .. } => &item.key,
            WriteOp::Delete { key, .. } | WriteOp::Check { key, .. } => key,
        }
    }

    /// Precondition, if any
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            WriteOp::Put { condition, .. } | WriteOp::Delete { condition, .. } => {
                condition.as_ref()
            }
            WriteOp::Check { condition, .. } => Some(condition),
        }
    }
}

/// Which key a query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    Primary,
    Secondary,
}

/// Query within one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub index: Index,
    pub partition: String,
    pub sort_prefix: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    /// All items of a primary partition
    pub fn primary(partition: impl Into<String>) -> Self {
        Self {
            index: Index::Primary,
            partition: partition.into(),
            sort_prefix: None,
            limit: None,
        }
    }

    /// All items of a secondary-index partition
    pub fn secondary(partition: impl Into<String>) -> Self {
        Self {
            index: Index::Secondary,
            ..Self::primary(partition)
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Backing store used by repositories, locks and the outbox
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read one item
    async fn get(&self, key: &ItemKey) -> StoreResult<Option<Item>>;

    /// Write one item, optionally guarded
    async fn put(&self, item: Item, condition: Option<Condition>) -> StoreResult<()>;

    /// Delete one item, optionally guarded. Deleting a missing item is not an error
    /// unless a condition says otherwise.
    async fn delete(&self, key: &ItemKey, condition: Option<Condition>) -> StoreResult<()>;

    /// Apply every operation or none of them
    async fn transact_write(&self, operations: Vec<WriteOp>) -> StoreResult<()>;

    /// Items of one partition ordered by sort key
    async fn query(&self, query: Query) -> StoreResult<Vec<Item>>;

    /// Largest number of operations `transact_write` accepts
    fn max_transaction_items(&self) -> usize;
}
