//! Distributed lock built on conditional writes
//!
//! A lock is a single store item per resource. Acquisition is a conditional
//! put that succeeds when no record exists or the existing record has expired,
//! so a crashed holder blocks others for at most one lock duration. Release is
//! a conditional delete that only matches the caller's own `lock_id` and
//! `owner`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::keys;
use super::store::{Condition, Item, KeyValueStore, StoreError};

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Lock failures
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// Someone else holds an unexpired lock
    #[error("Resource {resource} is locked by {holder}")]
    Contention { resource: String, holder: String },

    /// Retrying acquisition ran out of time
    #[error("Timed out after {waited_ms}ms waiting for lock on {resource}")]
    Timeout { resource: String, waited_ms: u64 },

    /// Invalid lock request
    #[error("Invalid lock request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lock timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long an acquired lock stays valid
    pub lock_duration_ms: u64,
    /// How long `try_acquire_lock` keeps retrying
    pub wait_timeout_ms: u64,
    /// First retry delay
    pub initial_backoff_ms: u64,
    /// Growth factor applied after every retry
    pub backoff_multiplier: f64,
    /// Largest retry delay
    pub max_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_duration_ms: 10_000,
            wait_timeout_ms: 5_000,
            initial_backoff_ms: 100,
            backoff_multiplier: 1.5,
            max_backoff_ms: 1_000,
        }
    }
}

impl LockConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Delay to use after `current`
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(Duration::from_millis(self.max_backoff_ms))
    }
}

/// A held lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: String,
    pub lock_id: Uuid,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Mutual exclusion across processes sharing one store
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Take the lock if it is free or expired; fail with `Contention` otherwise
    pub async fn acquire_lock(
        &self,
        resource: &str,
        owner: &str,
        duration: Duration,
    ) -> LockResult<LockRecord> {
        if resource.trim().is_empty() || owner.trim().is_empty() {
            return Err(LockError::Invalid(
                "resource and owner must not be empty".to_string(),
            ));
        }
        let lease = chrono::Duration::from_std(duration)
            .map_err(|e| LockError::Invalid(format!("lock duration out of range: {e}")))?;

        let now = Utc::now();
        let record = LockRecord {
            resource: resource.to_string(),
            lock_id: Uuid::new_v4(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + lease,
        };
        let item = Item::encode(keys::lock(resource), &record)?.with_expiry(record.expires_at);

        match self
            .store
            .put(item, Some(Condition::NotExistsOrExpired(now)))
            .await
        {
            Ok(()) => {
                debug!(resource, owner, lock_id = %record.lock_id, "Lock acquired");
                Ok(record)
            }
            Err(StoreError::ConditionFailed(_)) => {
                let holder = self
                    .current_holder(resource)
                    .await
                    .unwrap_or_else(|| "unknown".to_string());
                debug!(resource, owner, holder = %holder, "Lock contended");
                Err(LockError::Contention {
                    resource: resource.to_string(),
                    holder,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Retry [`acquire_lock`](Self::acquire_lock) with exponential backoff until `timeout`
    pub async fn try_acquire_lock(
        &self,
        resource: &str,
        owner: &str,
        duration: Duration,
        timeout: Duration,
    ) -> LockResult<LockRecord> {
        let start = Instant::now();
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);

        loop {
            match self.acquire_lock(resource, owner, duration).await {
                Ok(record) => {
                    info!(
                        resource,
                        owner,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Lock acquired after waiting"
                    );
                    return Ok(record);
                }
                Err(LockError::Contention { .. }) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        warn!(
                            resource,
                            owner,
                            waited_ms = elapsed.as_millis() as u64,
                            "Lock wait timed out"
                        );
                        return Err(LockError::Timeout {
                            resource: resource.to_string(),
                            waited_ms: elapsed.as_millis() as u64,
                        });
                    }
                    sleep(backoff.min(timeout - elapsed)).await;
                    backoff = self.config.next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// [`try_acquire_lock`](Self::try_acquire_lock) with the configured duration and timeout
    pub async fn acquire_with_defaults(
        &self,
        resource: &str,
        owner: &str,
    ) -> LockResult<LockRecord> {
        self.try_acquire_lock(
            resource,
            owner,
            self.config.lock_duration(),
            self.config.wait_timeout(),
        )
        .await
    }

    /// Delete the lock if it is still ours. Returns whether a record was removed;
    /// releasing a lock that was lost, taken over or already released is a no-op.
    pub async fn release(&self, lock: &LockRecord) -> LockResult<bool> {
        let condition = Condition::AttributesEqual(vec![
            ("lock_id".to_string(), serde_json::json!(lock.lock_id)),
            ("owner".to_string(), serde_json::json!(lock.owner)),
        ]);

        match self
            .store
            .delete(&keys::lock(&lock.resource), Some(condition))
            .await
        {
            Ok(()) => {
                debug!(resource = %lock.resource, lock_id = %lock.lock_id, "Lock released");
                Ok(true)
            }
            Err(StoreError::ConditionFailed(_)) => {
                debug!(
                    resource = %lock.resource,
                    lock_id = %lock.lock_id,
                    "Lock no longer held, nothing to release"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current record for a resource, expired or not
    pub async fn inspect(&self, resource: &str) -> LockResult<Option<LockRecord>> {
        match self.store.get(&keys::lock(resource)).await? {
            Some(item) => Ok(Some(item.decode()?)),
            None => Ok(None),
        }
    }

    async fn current_holder(&self, resource: &str) -> Option<String> {
        match self.inspect(resource).await {
            Ok(Some(record)) => Some(record.owner),
            _ => None,
        }
    }
}
