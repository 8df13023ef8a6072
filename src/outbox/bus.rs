//! Message bus port

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

use crate::domain_events::{DomainEvent, EventEnvelope};

/// Where outbox records are delivered
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver one event
    async fn publish(&self, event: &EventEnvelope) -> anyhow::Result<()>;

    /// Deliver several events, stopping at the first failure
    async fn publish_batch(&self, events: &[EventEnvelope]) -> anyhow::Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Bus that keeps delivered events in memory, with failure injection for tests
#[derive(Debug, Default)]
pub struct InMemoryMessageBus {
    published: Mutex<Vec<EventEnvelope>>,
    fail_next: AtomicUsize,
    offline: AtomicBool,
    attempts: AtomicUsize,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every publish until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Events accepted so far, in delivery order
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    /// Publish calls made, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("message bus is offline");
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            anyhow::bail!("injected publish failure for {}", event.event.subject());
        }

        debug!(event_id = %event.event_id, subject = %event.event.subject(), "Event published");
        self.published.lock().push(event.clone());
        Ok(())
    }
}
