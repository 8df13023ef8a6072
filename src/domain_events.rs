//! Domain events enum for the knowledge graph domain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{
    GraphCreated, NodeAddedToGraph, NodeArchived, NodeCreated, NodePublished,
    NodeRemovedFromGraph, NodeUpdated, NodesConnected, NodesDisconnected,
};

/// Common behaviour of everything the domain emits
pub trait DomainEvent {
    /// Message-bus subject, e.g. `graph.NodesConnected`
    fn subject(&self) -> String;

    /// The aggregate the event belongs to
    fn aggregate_id(&self) -> Uuid;

    /// Stable event type name
    fn event_type(&self) -> &'static str;
}

/// Enum wrapper for graph domain events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GraphDomainEvent {
    /// A new graph was created
    GraphCreated(GraphCreated),
    /// A node was created
    NodeCreated(NodeCreated),
    /// A node's content, tags or position changed
    NodeUpdated(NodeUpdated),
    /// A node was published
    NodePublished(NodePublished),
    /// A node was archived
    NodeArchived(NodeArchived),
    /// A node was added to a graph
    NodeAddedToGraph(NodeAddedToGraph),
    /// An edge was added between nodes
    NodesConnected(NodesConnected),
    /// An edge was removed
    NodesDisconnected(NodesDisconnected),
    /// A node was removed from a graph
    NodeRemovedFromGraph(NodeRemovedFromGraph),
}

impl GraphDomainEvent {
    /// Aggregate family the event belongs to
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            Self::NodeCreated(_)
            | Self::NodeUpdated(_)
            | Self::NodePublished(_)
            | Self::NodeArchived(_) => "node",
            _ => "graph",
        }
    }
}

impl DomainEvent for GraphDomainEvent {
    fn subject(&self) -> String {
        format!("{}.{}", self.aggregate_type(), self.event_type())
    }

    fn aggregate_id(&self) -> Uuid {
        match self {
            Self::GraphCreated(e) => *e.graph_id.as_uuid(),
            Self::NodeCreated(e) => *e.node_id.as_uuid(),
            Self::NodeUpdated(e) => *e.node_id.as_uuid(),
            Self::NodePublished(e) => *e.node_id.as_uuid(),
            Self::NodeArchived(e) => *e.node_id.as_uuid(),
            Self::NodeAddedToGraph(e) => *e.graph_id.as_uuid(),
            Self::NodesConnected(e) => *e.graph_id.as_uuid(),
            Self::NodesDisconnected(e) => *e.graph_id.as_uuid(),
            Self::NodeRemovedFromGraph(e) => *e.graph_id.as_uuid(),
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            Self::GraphCreated(_) => "GraphCreated",
            Self::NodeCreated(_) => "NodeCreated",
            Self::NodeUpdated(_) => "NodeUpdated",
            Self::NodePublished(_) => "NodePublished",
            Self::NodeArchived(_) => "NodeArchived",
            Self::NodeAddedToGraph(_) => "NodeAddedToGraph",
            Self::NodesConnected(_) => "NodesConnected",
            Self::NodesDisconnected(_) => "NodesDisconnected",
            Self::NodeRemovedFromGraph(_) => "NodeRemovedFromGraph",
        }
    }
}

/// An event stamped with the aggregate version that produced it.
///
/// `(aggregate_id, event_type, aggregate_version)` identifies the event for
/// downstream deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub aggregate_version: u64,
    pub occurred_at: DateTime<Utc>,
    pub event: GraphDomainEvent,
}

impl EventEnvelope {
    /// Wrap an event produced at `aggregate_version`
    pub fn new(event: GraphDomainEvent, aggregate_version: u64) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_version,
            occurred_at: Utc::now(),
            event,
        }
    }

    /// Dedup key consumers should use
    pub fn dedup_key(&self) -> (Uuid, &'static str, u64) {
        (
            self.event.aggregate_id(),
            self.event.event_type(),
            self.aggregate_version,
        )
    }
}
