//! Edge entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::commands::{GraphCommandError, GraphCommandResult};
use crate::value_objects::{EdgeId, EdgeKey, EdgeType, GraphId, NodeId};

/// Optional edge attributes supplied at connection time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeOptions {
    /// Weight in [0, 1]
    pub weight: f64,
    /// Whether traversal may follow the edge target → source
    pub bidirectional: bool,
    /// Free-form metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for EdgeOptions {
    fn default() -> Self {
        Self {
            weight: 1.0,
            bidirectional: false,
            metadata: HashMap::new(),
        }
    }
}

impl EdgeOptions {
    /// Options with the given weight
    pub fn weighted(weight: f64) -> Self {
        Self {
            weight,
            ..Self::default()
        }
    }
}

/// Typed, weighted relation between two nodes of the same graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier for the edge
    pub id: EdgeId,
    /// Owning graph (back-reference only)
    pub graph_id: GraphId,
    /// Source node of the edge
    pub source_id: NodeId,
    /// Target node of the edge
    pub target_id: NodeId,
    /// Relation type
    pub edge_type: EdgeType,
    /// Weight in [0, 1]
    pub weight: f64,
    /// Traversable in both directions
    pub bidirectional: bool,
    /// Additional metadata about the edge
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Create a new edge, rejecting self-loops and out-of-range weights
    pub fn new(
        graph_id: GraphId,
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
        options: EdgeOptions,
    ) -> GraphCommandResult<Self> {
        let edge = Self {
            id: EdgeId::new(),
            graph_id,
            source_id,
            target_id,
            edge_type,
            weight: options.weight,
            bidirectional: options.bidirectional,
            metadata: options.metadata,
            created_at: Utc::now(),
        };
        edge.validate()?;
        Ok(edge)
    }

    /// Deduplication key
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source_id, self.target_id)
    }

    /// Whether the node is either endpoint
    pub fn touches(&self, node_id: NodeId) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }

    /// Check edge invariants
    pub fn validate(&self) -> GraphCommandResult<()> {
        if self.source_id == self.target_id {
            return Err(GraphCommandError::SelfReference(self.source_id));
        }
        validate_weight(self.weight)
    }
}

/// Weights must be finite and within [0, 1]
pub fn validate_weight(weight: f64) -> GraphCommandResult<()> {
    if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
        return Err(GraphCommandError::InvalidCommand(format!(
            "Edge weight {weight} must be within [0, 1]"
        )));
    }
    Ok(())
}
