//! Graph commands
//!
//! Commands represent intent to modify graph state. They are processed by the
//! [`GraphService`](crate::handlers::GraphService), which validates business rules,
//! mutates the aggregate and commits state plus events in one transaction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::{LockError, StoreError};
use crate::outbox::OutboxError;
use crate::value_objects::{
    EdgeKey, EdgeType, GraphId, NodeContent, NodeId, Position3D, UserId,
};

/// Commands accepted by the graph service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphCommand {
    /// Create a node in the user's default graph
    CreateNode {
        /// Owner of the node
        user_id: UserId,
        /// Title and body
        content: NodeContent,
        /// Layout position
        position: Position3D,
        /// Free-form tags
        tags: Vec<String>,
    },

    /// Connect two nodes that already belong to a graph
    ConnectNodes {
        /// The graph containing both nodes
        graph_id: GraphId,
        /// The source node of the edge
        source_id: NodeId,
        /// The target node of the edge
        target_id: NodeId,
        /// Relation type
        edge_type: EdgeType,
        /// Weight in [0, 1]
        weight: f64,
    },

    /// Archive a node and drop every edge touching it
    RemoveNode {
        /// The graph to remove the node from
        graph_id: GraphId,
        /// The ID of the node to remove
        node_id: NodeId,
    },

    /// Publish a draft node
    PublishNode {
        /// The graph containing the node
        graph_id: GraphId,
        /// The node to publish
        node_id: NodeId,
    },

    /// Make sure the user has a default graph
    EnsureDefaultGraph {
        /// Owner of the graph
        user_id: UserId,
    },
}

/// Result type for graph operations
pub type GraphCommandResult<T> = Result<T, GraphCommandError>;

/// Broad classes of failure, used by callers to decide whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, rejected before any mutation
    Validation,
    /// Domain rule broken by the requested change
    Consistency,
    /// Lost a race; retry the whole operation
    Contention,
    /// Store or bus failure
    Infrastructure,
}

/// Errors that can occur during graph command processing
#[derive(Debug, Clone, Error)]
pub enum GraphCommandError {
    /// Invalid command parameters
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A count bound would be exceeded
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Graph has more nodes than can be loaded at once
    #[error("Graph {graph_id} has {node_count} nodes, more than the {limit} that can be loaded")]
    GraphTooLarge {
        graph_id: GraphId,
        node_count: usize,
        limit: usize,
    },

    /// Operation needs every node loaded but the aggregate holds a partial set
    #[error("Graph {0} is only partially loaded")]
    IncompleteGraph(GraphId),

    /// Staged writes exceed the store's per-transaction limit
    #[error("Transaction has {items} items, store limit is {limit}")]
    TransactionTooLarge { items: usize, limit: usize },

    /// Graph not found
    #[error("Graph not found: {0}")]
    GraphNotFound(GraphId),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Edge not found
    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeKey),

    /// Node is already part of the graph
    #[error("Node {0} already exists in graph")]
    NodeAlreadyExists(NodeId),

    /// Edge would connect a node to itself
    #[error("Self-referencing edge on node {0}")]
    SelfReference(NodeId),

    /// An edge already exists for this ordered pair
    #[error("Edge {0} already exists")]
    DuplicateEdge(EdgeKey),

    /// Archived nodes cannot change
    #[error("Node {0} is archived")]
    NodeArchived(NodeId),

    /// No route between two nodes
    #[error("No path from {start} to {end}")]
    NoPath { start: NodeId, end: NodeId },

    /// Business rule violation
    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    /// Derived state disagrees with the live maps
    #[error("Integrity violation: {}", .0.join("; "))]
    IntegrityViolation(Vec<String>),

    /// Concurrent modification detected
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Could not obtain a lock in time
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// Backing store or message bus failure
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl GraphCommandError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCommand(_)
            | Self::CapacityExceeded(_)
            | Self::GraphTooLarge { .. }
            | Self::TransactionTooLarge { .. } => ErrorKind::Validation,
            Self::IncompleteGraph(_)
            | Self::GraphNotFound(_)
            | Self::NodeNotFound(_)
            | Self::EdgeNotFound(_)
            | Self::NodeAlreadyExists(_)
            | Self::SelfReference(_)
            | Self::DuplicateEdge(_)
            | Self::NodeArchived(_)
            | Self::NoPath { .. }
            | Self::BusinessRuleViolation(_)
            | Self::IntegrityViolation(_) => ErrorKind::Consistency,
            Self::ConcurrentModification(_) | Self::LockUnavailable(_) => ErrorKind::Contention,
            Self::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Contention | ErrorKind::Infrastructure
        )
    }
}

impl From<StoreError> for GraphCommandError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ConditionFailed(msg) => Self::ConcurrentModification(msg),
            StoreError::TransactionTooLarge { items, limit } => {
                Self::TransactionTooLarge { items, limit }
            }
            other => Self::Infrastructure(other.to_string()),
        }
    }
}

impl From<LockError> for GraphCommandError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Store(store) => store.into(),
            other => Self::LockUnavailable(other.to_string()),
        }
    }
}

impl From<OutboxError> for GraphCommandError {
    fn from(error: OutboxError) -> Self {
        match error {
            OutboxError::Store(store) => store.into(),
            other => Self::Infrastructure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for GraphCommandError {
    fn from(error: serde_json::Error) -> Self {
        Self::Infrastructure(format!("serialization failed: {error}"))
    }
}
