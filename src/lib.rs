//! Knowledge graph domain
//!
//! Users' notes live as nodes in a per-user graph. Related nodes are linked by
//! typed, weighted edges, some of them discovered automatically from shared
//! keywords and tags. State changes are committed atomically together with
//! their domain events, which a background outbox processor then delivers to
//! a message bus.

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod domain_events;
pub mod events;
pub mod handlers;
pub mod infrastructure;
pub mod outbox;
pub mod queries;
pub mod similarity;
pub mod value_objects;

// Re-export main types
pub use aggregate::*;
pub use domain_events::*;
pub use events::*;

// Re-export commands and their types
pub use commands::{ErrorKind, GraphCommand, GraphCommandError, GraphCommandResult};

// Re-export configuration
pub use config::{ConfigError, ServiceConfig};

// Re-export query types
pub use queries::{GraphData, GraphInfo, GraphQueryHandler, GraphStats};

// Re-export command handlers
pub use handlers::{
    BulkFailure, BulkOutcome, CommandOutcome, GraphCommandHandler, GraphService, NewNode,
};

// Re-export persistence and messaging
pub use infrastructure::{
    DistributedLock, GraphRepository, InMemoryStore, KeyValueStore, LockConfig, UnitOfWork,
};
pub use outbox::{
    EventRecord, InMemoryMessageBus, MessageBus, OutboxConfig, OutboxProcessor, OutboxRepository,
    PublishStatus,
};

// Re-export similarity discovery
pub use similarity::{SimilarityConfig, SimilarityEngine, WeightFormula};

// Re-export value objects
pub use value_objects::{
    ContentFormat, EdgeId, EdgeKey, EdgeType, GraphId, GraphLimits, NodeContent, NodeId,
    NodeLimits, NodeStatus, Position3D, UserId,
};
