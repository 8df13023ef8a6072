//! Infrastructure layer implementations
//!
//! The store port and its in-memory adapter, the key layout, the distributed
//! lock, the unit of work and the repositories that stage into it.

pub mod keys;
mod lock;
mod memory_store;
mod repository;
mod store;
mod unit_of_work;

pub use lock::{DistributedLock, LockConfig, LockError, LockRecord, LockResult};
pub use memory_store::{InMemoryStore, DEFAULT_MAX_TRANSACTION_ITEMS};
pub use repository::{EdgeRepository, GraphRepository, NodeRepository};
pub use store::{
    Condition, Index, Item, ItemKey, KeyValueStore, Query, StoreError, StoreResult, WriteOp,
};
pub use unit_of_work::{CommitReceipt, TransactionalRepository, UnitOfWork};
