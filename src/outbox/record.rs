//! Outbox record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::OutboxError;
use crate::domain_events::{DomainEvent, EventEnvelope};
use crate::infrastructure::{keys, ItemKey};

/// Delivery state of an outbox record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    /// Waiting for (another) delivery attempt
    Pending,
    /// Accepted by the bus
    Published,
    /// Gave up after the attempt ceiling; needs an operator
    Failed,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Pending => "pending",
            PublishStatus::Published => "published",
            PublishStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event waiting in, or delivered from, the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub version: u64,
    /// The serialized [`EventEnvelope`]
    pub payload: serde_json::Value,
    pub status: PublishStatus,
    pub publish_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// New pending record for an event
    pub fn pending(envelope: &EventEnvelope) -> Result<Self, OutboxError> {
        let now = Utc::now();
        Ok(Self {
            event_id: envelope.event_id,
            aggregate_id: envelope.event.aggregate_id(),
            aggregate_type: envelope.event.aggregate_type().to_string(),
            event_type: envelope.event.event_type().to_string(),
            version: envelope.aggregate_version,
            payload: serde_json::to_value(envelope)?,
            status: PublishStatus::Pending,
            publish_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Decode the carried event
    pub fn envelope(&self) -> Result<EventEnvelope, OutboxError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Primary key; unique per `(aggregate_id, version, event_type)`
    pub fn key(&self) -> ItemKey {
        keys::event(self.aggregate_id, self.version, &self.event_type)
    }

    /// Key in the status index
    pub fn status_key(&self) -> ItemKey {
        keys::outbox_status(self.status.as_str(), self.created_at, self.event_id)
    }

    /// Key consumers deduplicate on
    pub fn dedup_key(&self) -> (Uuid, &str, u64) {
        (self.aggregate_id, self.event_type.as_str(), self.version)
    }
}
