//! Background outbox processor
//!
//! Polls pending records on a fixed interval and hands them to the message
//! bus. Delivery is at-least-once: a crash after the bus accepts an event but
//! before the record is marked published delivers it again on the next run.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::bus::MessageBus;
use super::record::{EventRecord, PublishStatus};
use super::repository::OutboxRepository;
use super::OutboxError;

/// Outbox polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Pause between batches
    pub interval_ms: u64,
    /// Records fetched per batch
    pub batch_size: usize,
    /// Attempts before a record is parked as failed
    pub max_attempts: u32,
    /// Upper bound on a single publish call
    pub publish_timeout_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            batch_size: 50,
            max_attempts: 3,
            publish_timeout_ms: 10_000,
        }
    }
}

impl OutboxConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// What one batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub published: usize,
    /// Failed but left pending for another attempt
    pub retried: usize,
    /// Parked as failed during this batch
    pub failed: Vec<Uuid>,
    /// Whether the batch stopped early on cancellation
    pub cancelled: bool,
}

struct Worker {
    repository: OutboxRepository,
    bus: Arc<dyn MessageBus>,
    config: OutboxConfig,
}

impl Worker {
    async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.process_batch(&token).await {
                        Ok(report) if report.fetched > 0 => debug!(
                            fetched = report.fetched,
                            published = report.published,
                            retried = report.retried,
                            failed = report.failed.len(),
                            "Outbox batch processed"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Outbox batch failed"),
                    }
                }
            }
        }
        info!("Outbox processor stopped");
    }

    async fn process_batch(&self, token: &CancellationToken) -> Result<BatchReport, OutboxError> {
        let records = self.repository.fetch_pending(self.config.batch_size).await?;
        let mut report = BatchReport {
            fetched: records.len(),
            ..BatchReport::default()
        };

        for record in records {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.deliver(&record).await {
                Ok(()) => {
                    self.repository.mark_published(&record).await?;
                    report.published += 1;
                }
                Err(reason) => {
                    let status = match self
                        .repository
                        .record_failure(&record, &reason, self.config.max_attempts)
                        .await
                    {
                        Ok(status) => status,
                        Err(OutboxError::RecordNotFound(event_id)) => {
                            debug!(event_id = %event_id, "Outbox record vanished, skipping");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    if status == PublishStatus::Failed {
                        error!(
                            event_id = %record.event_id,
                            aggregate_id = %record.aggregate_id,
                            event_type = %record.event_type,
                            version = record.version,
                            attempts = self.config.max_attempts,
                            error = %reason,
                            "Outbox record parked after repeated publish failures"
                        );
                        report.failed.push(record.event_id);
                    } else {
                        warn!(
                            event_id = %record.event_id,
                            event_type = %record.event_type,
                            error = %reason,
                            "Publish failed, will retry"
                        );
                        report.retried += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn deliver(&self, record: &EventRecord) -> Result<(), String> {
        let envelope = record.envelope().map_err(|e| e.to_string())?;
        let publish = self.bus.publish(&envelope);
        match tokio::time::timeout(self.config.publish_timeout(), publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!(
                "publish timed out after {}ms",
                self.config.publish_timeout_ms
            )),
        }
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cancellable background loop draining the outbox
pub struct OutboxProcessor {
    worker: Arc<Worker>,
    running: Mutex<Option<Running>>,
}

impl OutboxProcessor {
    pub fn new(
        repository: OutboxRepository,
        bus: Arc<dyn MessageBus>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                repository,
                bus,
                config,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.worker.config
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawn the polling loop on the current runtime
    pub fn start(&self) -> Result<(), OutboxError> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(OutboxError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        let worker = Arc::clone(&self.worker);
        let child = token.clone();
        let handle = tokio::spawn(async move { worker.run(child).await });
        *running = Some(Running { token, handle });

        info!(
            interval_ms = self.worker.config.interval_ms,
            batch_size = self.worker.config.batch_size,
            "Outbox processor started"
        );
        Ok(())
    }

    /// Signal the loop to stop and wait until it has exited.
    ///
    /// A record being published finishes; no further record or batch starts.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(Running { token, handle }) = running else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Outbox processor task ended abnormally");
        }
    }

    /// Run one batch immediately, outside the polling loop
    pub async fn process_batch(&self) -> Result<BatchReport, OutboxError> {
        self.worker.process_batch(&CancellationToken::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_events::{EventEnvelope, GraphDomainEvent};
    use crate::events::NodeAddedToGraph;
    use crate::infrastructure::{InMemoryStore, KeyValueStore, UnitOfWork};
    use crate::outbox::InMemoryMessageBus;
    use crate::value_objects::{GraphId, NodeId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn seed(store: Arc<InMemoryStore>, events: u64) {
        let graph_id = GraphId::new();
        let envelopes: Vec<EventEnvelope> = (1..=events)
            .map(|version| {
                EventEnvelope::new(
                    GraphDomainEvent::NodeAddedToGraph(NodeAddedToGraph {
                        graph_id,
                        node_id: NodeId::new(),
                    }),
                    version,
                )
            })
            .collect();
        let mut uow = UnitOfWork::begin(store);
        uow.register_events(envelopes).unwrap();
        uow.commit().await.unwrap();
    }

    async fn setup(
        events: u64,
        config: OutboxConfig,
    ) -> (Arc<InMemoryMessageBus>, OutboxProcessor, OutboxRepository) {
        let store = Arc::new(InMemoryStore::new());
        seed(store.clone(), events).await;

        let repository = OutboxRepository::new(store);
        let bus = Arc::new(InMemoryMessageBus::new());
        let processor = OutboxProcessor::new(repository.clone(), bus.clone(), config);
        (bus, processor, repository)
    }

    #[tokio::test]
    async fn test_batch_publishes_pending_records() {
        let (bus, processor, repository) = setup(3, OutboxConfig::default()).await;

        let report = processor.process_batch().await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.published, 3);
        assert_eq!(bus.published_count(), 3);
        assert!(repository.fetch_pending(10).await.unwrap().is_empty());

        let again = processor.process_batch().await.unwrap();
        assert_eq!(again.fetched, 0);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_work() {
        let config = OutboxConfig {
            batch_size: 2,
            ..OutboxConfig::default()
        };
        let (bus, processor, _) = setup(5, config).await;

        assert_eq!(processor.process_batch().await.unwrap().published, 2);
        assert_eq!(bus.published_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (bus, processor, repository) = setup(1, OutboxConfig::default()).await;
        bus.fail_next(1);

        let first = processor.process_batch().await.unwrap();
        assert_eq!(first.retried, 1);
        let pending = repository.fetch_pending(10).await.unwrap();
        assert_eq!(pending[0].publish_attempts, 1);

        let second = processor.process_batch().await.unwrap();
        assert_eq!(second.published, 1);
        assert!(repository.fetch_pending(10).await.unwrap().is_empty());
        assert_eq!(repository.count_by_status(PublishStatus::Published).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_parked_after_ceiling() {
        let (bus, processor, repository) = setup(1, OutboxConfig::default()).await;
        bus.set_offline(true);

        for _ in 0..2 {
            assert_eq!(processor.process_batch().await.unwrap().retried, 1);
        }
        let third = processor.process_batch().await.unwrap();
        assert_eq!(third.failed.len(), 1);

        // Parked records are not fetched again
        assert_eq!(processor.process_batch().await.unwrap().fetched, 0);
        assert_eq!(repository.fetch_failed(10).await.unwrap().len(), 1);
        assert_eq!(bus.attempts(), 3);
    }

    /// Deletes the record behind the first event it sees, then fails that publish
    struct VanishingBus {
        store: Arc<InMemoryStore>,
        inner: InMemoryMessageBus,
        vanished: AtomicBool,
    }

    #[async_trait]
    impl MessageBus for VanishingBus {
        async fn publish(&self, event: &EventEnvelope) -> anyhow::Result<()> {
            if !self.vanished.swap(true, Ordering::SeqCst) {
                let record = EventRecord::pending(event)?;
                self.store.delete(&record.key(), None).await?;
                anyhow::bail!("connection reset");
            }
            self.inner.publish(event).await
        }
    }

    #[tokio::test]
    async fn test_vanished_record_does_not_stall_batch() {
        let store = Arc::new(InMemoryStore::new());
        seed(store.clone(), 3).await;
        let repository = OutboxRepository::new(store.clone());
        let bus = Arc::new(VanishingBus {
            store,
            inner: InMemoryMessageBus::new(),
            vanished: AtomicBool::new(false),
        });
        let processor =
            OutboxProcessor::new(repository.clone(), bus.clone(), OutboxConfig::default());

        let report = processor.process_batch().await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.published, 2);
        assert_eq!(report.retried, 0);
        assert!(report.failed.is_empty());
        assert_eq!(bus.inner.published_count(), 2);
        assert_eq!(repository.count_by_status(PublishStatus::Published).await.unwrap(), 2);
        assert_eq!(repository.count_by_status(PublishStatus::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let config = OutboxConfig {
            interval_ms: 10,
            ..OutboxConfig::default()
        };
        let (bus, processor, _) = setup(2, config).await;

        processor.start().unwrap();
        assert!(matches!(processor.start(), Err(OutboxError::AlreadyRunning)));

        for _ in 0..100 {
            if bus.published_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.published_count(), 2);

        processor.stop().await;
        assert!(!processor.is_running());
        // Stopping twice is harmless
        processor.stop().await;
    }
}
