//! Graph queries
//!
//! Read-only views over stored graphs. Every query loads the aggregate fresh;
//! nothing here writes to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Edge, Graph, GraphSnapshot, Node};
use crate::commands::{GraphCommandError, GraphCommandResult};
use crate::infrastructure::GraphRepository;
use crate::value_objects::{GraphId, NodeId, UserId};

/// Graph information for query results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphInfo {
    pub graph_id: GraphId,
    pub user_id: UserId,
    pub name: String,
    pub is_default: bool,
    pub version: u64,
    pub node_count: usize,
    pub edge_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl From<GraphSnapshot> for GraphInfo {
    fn from(snapshot: GraphSnapshot) -> Self {
        Self {
            graph_id: snapshot.id,
            user_id: snapshot.user_id,
            name: snapshot.name,
            is_default: snapshot.is_default,
            version: snapshot.version,
            node_count: snapshot.metadata.node_count,
            edge_count: snapshot.metadata.edge_count,
            created_at: snapshot.metadata.created_at,
            last_modified: snapshot.metadata.updated_at,
        }
    }
}

/// Structural statistics of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub cluster_count: usize,
    pub density: f64,
}

impl GraphStats {
    pub fn of(graph: &Graph) -> Self {
        Self {
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            cluster_count: graph.get_clusters().len(),
            density: graph.density(),
        }
    }
}

/// Everything needed to render a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphData {
    pub graph: GraphInfo,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub stats: GraphStats,
}

impl GraphData {
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            graph: graph.snapshot().into(),
            nodes: graph.nodes().cloned().collect(),
            edges: graph.edges().cloned().collect(),
            stats: GraphStats::of(graph),
        }
    }
}

/// Answers read queries against the repository
#[derive(Clone)]
pub struct GraphQueryHandler {
    graphs: GraphRepository,
}

impl GraphQueryHandler {
    pub fn new(graphs: GraphRepository) -> Self {
        Self { graphs }
    }

    /// Nodes, edges and statistics of one graph
    pub async fn get_graph_data(&self, graph_id: GraphId) -> GraphCommandResult<GraphData> {
        let graph = self.graphs.load(graph_id).await?;
        Ok(GraphData::from_graph(&graph))
    }

    /// Graphs the user owns
    pub async fn list_graphs(&self, user_id: &UserId) -> GraphCommandResult<Vec<GraphInfo>> {
        let snapshots = self.graphs.list_by_user(user_id).await?;
        Ok(snapshots.into_iter().map(GraphInfo::from).collect())
    }

    /// Fewest-hop path between two nodes
    pub async fn find_path(
        &self,
        graph_id: GraphId,
        start: NodeId,
        end: NodeId,
    ) -> GraphCommandResult<Vec<NodeId>> {
        self.graphs.load(graph_id).await?.find_path(start, end)
    }

    /// Connected components of a graph
    pub async fn get_clusters(&self, graph_id: GraphId) -> GraphCommandResult<Vec<Vec<NodeId>>> {
        Ok(self.graphs.load(graph_id).await?.get_clusters())
    }

    /// Every edge touching a node
    pub async fn node_edges(
        &self,
        graph_id: GraphId,
        node_id: NodeId,
    ) -> GraphCommandResult<Vec<Edge>> {
        let graph = self.graphs.load(graph_id).await?;
        if !graph.contains_node(node_id) {
            return Err(GraphCommandError::NodeNotFound(node_id));
        }
        Ok(graph.edges_of(node_id).into_iter().cloned().collect())
    }
}
