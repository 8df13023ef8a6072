//! Service configuration
//!
//! Every section has defaults, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::infrastructure::LockConfig;
use crate::outbox::OutboxConfig;
use crate::similarity::SimilarityConfig;
use crate::value_objects::{GraphLimits, NodeLimits};

pub const ENV_OUTBOX_INTERVAL_MS: &str = "KG_OUTBOX_INTERVAL_MS";
pub const ENV_OUTBOX_BATCH_SIZE: &str = "KG_OUTBOX_BATCH_SIZE";
pub const ENV_OUTBOX_MAX_ATTEMPTS: &str = "KG_OUTBOX_MAX_ATTEMPTS";
pub const ENV_SIMILARITY_THRESHOLD: &str = "KG_SIMILARITY_THRESHOLD";
pub const ENV_LOCK_TIMEOUT_MS: &str = "KG_LOCK_TIMEOUT_MS";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration of a [`GraphService`](crate::handlers::GraphService)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub limits: GraphLimits,
    pub node_limits: NodeLimits,
    pub lock: LockConfig,
    pub outbox: OutboxConfig,
    pub similarity: SimilarityConfig,
}

impl ServiceConfig {
    /// Parse a TOML document; missing sections and keys take their defaults
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Override selected values from `KG_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Override selected values from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, ENV_OUTBOX_INTERVAL_MS)? {
            self.outbox.interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_OUTBOX_BATCH_SIZE)? {
            self.outbox.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_OUTBOX_MAX_ATTEMPTS)? {
            self.outbox.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_SIMILARITY_THRESHOLD)? {
            self.similarity.threshold = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            self.lock.wait_timeout_ms = v;
        }
        self.validate()
    }

    /// Reject values that would make the service misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_nodes == 0 || self.limits.max_edges == 0 {
            return Err(ConfigError::Invalid("graph limits must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity.threshold) {
            return Err(ConfigError::Invalid(
                "similarity threshold must be within [0, 1]".into(),
            ));
        }
        if self.outbox.batch_size == 0 || self.outbox.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "outbox batch size and attempt ceiling must be positive".into(),
            ));
        }
        if self.outbox.interval_ms == 0 {
            return Err(ConfigError::Invalid("outbox interval must be positive".into()));
        }
        if self.lock.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("lock backoff multiplier must be >= 1".into()));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let value = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: raw.clone(),
    })?;
    debug!(name, value = %raw, "Configuration override applied");
    Ok(Some(value))
}
