//! Graph domain events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{EdgeId, EdgeType, GraphId, NodeId, UserId};

/// Graph created event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphCreated {
    /// The unique identifier of the graph
    pub graph_id: GraphId,
    /// Owner of the graph
    pub user_id: UserId,
    /// The name of the graph
    pub name: String,
    /// Whether this is the user's default graph
    pub is_default: bool,
    /// When the graph was created
    pub created_at: DateTime<Utc>,
}

/// Node created event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCreated {
    pub node_id: NodeId,
    pub graph_id: GraphId,
    pub user_id: UserId,
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Node content, tags or position changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdated {
    pub node_id: NodeId,
    pub graph_id: GraphId,
    /// Names of the changed fields
    pub changed_fields: Vec<String>,
}

/// Node moved from draft to published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePublished {
    pub node_id: NodeId,
    pub graph_id: GraphId,
}

/// Node reached the terminal archived state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeArchived {
    pub node_id: NodeId,
    pub graph_id: GraphId,
}

/// Node added to a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAddedToGraph {
    /// The graph to which the node was added
    pub graph_id: GraphId,
    /// The unique identifier of the node
    pub node_id: NodeId,
}

/// Two nodes were connected by an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesConnected {
    /// The graph to which the edge was added
    pub graph_id: GraphId,
    /// The unique identifier of the edge
    pub edge_id: EdgeId,
    /// The source node of the edge
    pub source_id: NodeId,
    /// The target node of the edge
    pub target_id: NodeId,
    /// The type of edge
    pub edge_type: EdgeType,
    /// Edge weight
    pub weight: f64,
}

/// An edge was removed without removing either endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesDisconnected {
    pub graph_id: GraphId,
    pub edge_id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
}

/// Node removed from a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRemovedFromGraph {
    /// The graph from which the node was removed
    pub graph_id: GraphId,
    /// The ID of the node that was removed
    pub node_id: NodeId,
    /// Edges dropped along with the node
    pub removed_edges: Vec<EdgeId>,
}
