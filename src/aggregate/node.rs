//! Node entity
//!
//! A node is a unit of text owned by exactly one graph. Its `graph_id` is a
//! back-reference only; traversal always goes through the owning [`Graph`](super::Graph).
//! Edges are not stored on the node: the graph is the single owner of edge state
//! and exposes [`Graph::edges_of`](super::Graph::edges_of) as the node-level view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commands::{GraphCommandError, GraphCommandResult};
use crate::domain_events::{EventEnvelope, GraphDomainEvent};
use crate::events::{NodeArchived, NodeCreated, NodePublished, NodeUpdated};
use crate::value_objects::{
    normalize_tags, GraphId, NodeContent, NodeId, NodeLimits, NodeStatus, Position3D, UserId,
};

/// Partial update of a node's mutable attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub content: Option<NodeContent>,
    pub position: Option<Position3D>,
    pub tags: Option<Vec<String>>,
}

impl NodeUpdate {
    /// Whether the update carries no changes
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.position.is_none() && self.tags.is_none()
    }
}

/// Knowledge node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    user_id: UserId,
    graph_id: GraphId,
    content: NodeContent,
    position: Position3D,
    tags: Vec<String>,
    status: NodeStatus,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    pending_events: Vec<EventEnvelope>,
}

impl Node {
    /// Create a draft node, validating every attribute
    pub fn new(
        user_id: UserId,
        graph_id: GraphId,
        content: NodeContent,
        position: Position3D,
        tags: Vec<String>,
        limits: &NodeLimits,
    ) -> GraphCommandResult<Self> {
        content.validate(limits)?;
        position.validate(limits)?;
        let tags = normalize_tags(tags, limits)?;

        let now = Utc::now();
        let mut node = Self {
            id: NodeId::new(),
            user_id,
            graph_id,
            content,
            position,
            tags,
            status: NodeStatus::Draft,
            version: 1,
            created_at: now,
            updated_at: now,
            pending_events: Vec::new(),
        };

        node.record(GraphDomainEvent::NodeCreated(NodeCreated {
            node_id: node.id,
            graph_id: node.graph_id,
            user_id: node.user_id.clone(),
            title: node.content.title.clone(),
            tags: node.tags.clone(),
            created_at: now,
        }));

        Ok(node)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Owning graph (back-reference only)
    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    pub fn position(&self) -> Position3D {
        self.position
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_archived(&self) -> bool {
        self.status == NodeStatus::Archived
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Events buffered since the last drain
    pub fn pending_events(&self) -> &[EventEnvelope] {
        &self.pending_events
    }

    /// Move the buffered events out of the node
    pub fn take_pending_events(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.pending_events)
    }

    /// Publish a draft node.
    ///
    /// Returns `Ok(false)` when the node is already published.
    pub fn publish(&mut self) -> GraphCommandResult<bool> {
        match self.status {
            NodeStatus::Archived => Err(GraphCommandError::NodeArchived(self.id)),
            NodeStatus::Published => Ok(false),
            NodeStatus::Draft => {
                self.status = NodeStatus::Published;
                self.touch();
                self.record(GraphDomainEvent::NodePublished(NodePublished {
                    node_id: self.id,
                    graph_id: self.graph_id,
                }));
                Ok(true)
            }
        }
    }

    /// Archive the node. Idempotent: a second call changes nothing.
    ///
    /// Edge cleanup is done by the owning graph, which holds the edges.
    pub fn archive(&mut self) -> bool {
        if self.is_archived() {
            return false;
        }
        self.status = NodeStatus::Archived;
        self.touch();
        self.record(GraphDomainEvent::NodeArchived(NodeArchived {
            node_id: self.id,
            graph_id: self.graph_id,
        }));
        true
    }

    /// Apply a partial update. Returns whether anything changed.
    pub fn update(&mut self, update: NodeUpdate, limits: &NodeLimits) -> GraphCommandResult<bool> {
        if self.is_archived() {
            return Err(GraphCommandError::NodeArchived(self.id));
        }

        // Validate everything before touching state
        if let Some(content) = &update.content {
            content.validate(limits)?;
        }
        if let Some(position) = &update.position {
            position.validate(limits)?;
        }
        let tags = update
            .tags
            .map(|tags| normalize_tags(tags, limits))
            .transpose()?;

        let mut changed_fields = Vec::new();
        if let Some(content) = update.content {
            if content != self.content {
                self.content = content;
                changed_fields.push("content".to_string());
            }
        }
        if let Some(position) = update.position {
            if position != self.position {
                self.position = position;
                changed_fields.push("position".to_string());
            }
        }
        if let Some(tags) = tags {
            if tags != self.tags {
                self.tags = tags;
                changed_fields.push("tags".to_string());
            }
        }

        if changed_fields.is_empty() {
            return Ok(false);
        }

        self.touch();
        self.record(GraphDomainEvent::NodeUpdated(NodeUpdated {
            node_id: self.id,
            graph_id: self.graph_id,
            changed_fields,
        }));
        Ok(true)
    }

    /// Re-check attribute invariants
    pub fn validate(&self, limits: &NodeLimits) -> GraphCommandResult<()> {
        self.content.validate(limits)?;
        self.position.validate(limits)?;
        normalize_tags(&self.tags, limits)?;
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    fn record(&mut self, event: GraphDomainEvent) {
        self.pending_events
            .push(EventEnvelope::new(event, self.version));
    }
}
