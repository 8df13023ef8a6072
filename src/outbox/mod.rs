//! Transactional outbox
//!
//! Domain events are written as pending [`EventRecord`]s in the same store
//! transaction as the state change that produced them. The
//! [`OutboxProcessor`] later delivers them to a [`MessageBus`], retrying up to
//! a ceiling before parking a record as failed.

mod bus;
mod processor;
mod record;
mod repository;

pub use bus::{InMemoryMessageBus, MessageBus};
pub use processor::{BatchReport, OutboxConfig, OutboxProcessor};
pub use record::{EventRecord, PublishStatus};
pub use repository::OutboxRepository;

use thiserror::Error;
use uuid::Uuid;

use crate::infrastructure::StoreError;

/// Outbox failures
#[derive(Debug, Clone, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record payload could not be encoded or decoded
    #[error("Outbox serialization error: {0}")]
    Serialization(String),

    /// A status change targeted a record that does not exist
    #[error("Outbox record {0} not found")]
    RecordNotFound(Uuid),

    #[error("Outbox processor is already running")]
    AlreadyRunning,
}

impl From<serde_json::Error> for OutboxError {
    fn from(error: serde_json::Error) -> Self {
        OutboxError::Serialization(error.to_string())
    }
}
