//! Graph, node and edge repositories over a [`KeyValueStore`]

use std::sync::Arc;
use tracing::{debug, warn};

use super::keys;
use super::store::{Condition, Item, KeyValueStore, Query, WriteOp};
use super::unit_of_work::TransactionalRepository;
use crate::aggregate::{Edge, Graph, GraphSnapshot, Node};
use crate::commands::{GraphCommandError, GraphCommandResult};
use crate::value_objects::{GraphId, GraphLimits, NodeId, UserId};

/// Node persistence
#[derive(Clone)]
pub struct NodeRepository {
    store: Arc<dyn KeyValueStore>,
}

impl NodeRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn get(
        &self,
        graph_id: GraphId,
        node_id: NodeId,
    ) -> GraphCommandResult<Option<Node>> {
        match self.store.get(&keys::node(graph_id, node_id)).await? {
            Some(item) => Ok(Some(item.decode()?)),
            None => Ok(None),
        }
    }

    /// Every node stored under the graph, archived ones included
    pub async fn list_by_graph(&self, graph_id: GraphId) -> GraphCommandResult<Vec<Node>> {
        let query = Query::primary(keys::graph_partition(graph_id)).with_prefix(keys::NODE_PREFIX);
        let items = self.store.query(query).await?;
        items
            .iter()
            .map(|item| item.decode().map_err(Into::into))
            .collect()
    }

    /// Node ids owned by a user, across graphs
    pub async fn count_by_user(&self, user_id: &UserId) -> GraphCommandResult<usize> {
        let query = Query::secondary(keys::user_partition(user_id)).with_prefix(keys::NODE_PREFIX);
        Ok(self.store.query(query).await?.len())
    }
}

impl TransactionalRepository<Node> for NodeRepository {
    fn save_operations(&self, node: &Node) -> GraphCommandResult<Vec<WriteOp>> {
        let item = Item::encode(keys::node(node.graph_id(), node.id()), node)?
            .with_secondary_key(keys::node_owner(node.user_id(), node.id()));
        Ok(vec![WriteOp::put(item)])
    }

    fn delete_operations(&self, node: &Node) -> GraphCommandResult<Vec<WriteOp>> {
        Ok(vec![WriteOp::delete(keys::node(node.graph_id(), node.id()))])
    }
}

/// Edge persistence
#[derive(Clone)]
pub struct EdgeRepository {
    store: Arc<dyn KeyValueStore>,
}

impl EdgeRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn list_by_graph(&self, graph_id: GraphId) -> GraphCommandResult<Vec<Edge>> {
        let query = Query::primary(keys::graph_partition(graph_id)).with_prefix(keys::EDGE_PREFIX);
        let items = self.store.query(query).await?;
        items
            .iter()
            .map(|item| item.decode().map_err(Into::into))
            .collect()
    }
}

impl TransactionalRepository<Edge> for EdgeRepository {
    fn save_operations(&self, edge: &Edge) -> GraphCommandResult<Vec<WriteOp>> {
        let item = Item::encode(keys::edge(edge.graph_id, edge.id), edge)?;
        Ok(vec![WriteOp::put(item)])
    }

    fn delete_operations(&self, edge: &Edge) -> GraphCommandResult<Vec<WriteOp>> {
        Ok(vec![WriteOp::delete(keys::edge(edge.graph_id, edge.id))])
    }
}

/// Graph persistence.
///
/// Saving a graph writes only its header; nodes and edges are staged through
/// their own repositories. The header write is version-guarded so two units of
/// work that loaded the same version cannot both commit.
#[derive(Clone)]
pub struct GraphRepository {
    store: Arc<dyn KeyValueStore>,
    nodes: NodeRepository,
    edges: EdgeRepository,
    limits: GraphLimits,
}

impl GraphRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, limits: GraphLimits) -> Self {
        Self {
            nodes: NodeRepository::new(store.clone()),
            edges: EdgeRepository::new(store.clone()),
            store,
            limits,
        }
    }

    pub fn nodes(&self) -> &NodeRepository {
        &self.nodes
    }

    pub fn edges(&self) -> &EdgeRepository {
        &self.edges
    }

    /// Stored header of a graph
    pub async fn snapshot(&self, graph_id: GraphId) -> GraphCommandResult<Option<GraphSnapshot>> {
        match self.store.get(&keys::graph_metadata(graph_id)).await? {
            Some(item) => Ok(Some(item.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, graph_id: GraphId) -> GraphCommandResult<bool> {
        Ok(self.store.get(&keys::graph_metadata(graph_id)).await?.is_some())
    }

    /// Load a graph with all of its live nodes and edges.
    ///
    /// Node and edge reads run concurrently. Graphs recorded as holding more
    /// nodes than the configured limit are refused.
    pub async fn load(&self, graph_id: GraphId) -> GraphCommandResult<Graph> {
        let snapshot = self
            .snapshot(graph_id)
            .await?
            .ok_or(GraphCommandError::GraphNotFound(graph_id))?;

        if snapshot.metadata.node_count > self.limits.max_nodes {
            return Err(GraphCommandError::GraphTooLarge {
                graph_id,
                node_count: snapshot.metadata.node_count,
                limit: self.limits.max_nodes,
            });
        }

        let (nodes, edges) = tokio::try_join!(
            self.nodes.list_by_graph(graph_id),
            self.edges.list_by_graph(graph_id)
        )?;
        let live: Vec<Node> = nodes.into_iter().filter(|n| !n.is_archived()).collect();

        if live.len() != snapshot.metadata.node_count {
            warn!(
                graph_id = %graph_id,
                recorded = snapshot.metadata.node_count,
                loaded = live.len(),
                "Graph node count does not match stored nodes"
            );
        }
        debug!(graph_id = %graph_id, nodes = live.len(), edges = edges.len(), "Graph loaded");

        Graph::rehydrate(snapshot, live, edges, self.limits)
    }

    /// Headers of every graph the user owns, oldest key first
    pub async fn list_by_user(&self, user_id: &UserId) -> GraphCommandResult<Vec<GraphSnapshot>> {
        let query = Query::secondary(keys::user_partition(user_id)).with_prefix(keys::GRAPH_PREFIX);
        let items = self.store.query(query).await?;
        items
            .iter()
            .map(|item| item.decode().map_err(Into::into))
            .collect()
    }

    /// The user's default graph header, if one exists
    pub async fn find_default(
        &self,
        user_id: &UserId,
    ) -> GraphCommandResult<Option<GraphSnapshot>> {
        Ok(self
            .list_by_user(user_id)
            .await?
            .into_iter()
            .find(|snapshot| snapshot.is_default))
    }
}

impl TransactionalRepository<Graph> for GraphRepository {
    fn save_operations(&self, graph: &Graph) -> GraphCommandResult<Vec<WriteOp>> {
        if !graph.is_complete() {
            return Err(GraphCommandError::IncompleteGraph(graph.id()));
        }

        let item = Item::encode(keys::graph_metadata(graph.id()), &graph.snapshot())?
            .with_secondary_key(keys::graph_owner(graph.user_id(), graph.id()));
        let condition = match graph.persisted_version() {
            None => Condition::NotExists,
            Some(version) => Condition::attribute_equals("version", version),
        };
        Ok(vec![WriteOp::put_if(item, condition)])
    }

    fn delete_operations(&self, graph: &Graph) -> GraphCommandResult<Vec<WriteOp>> {
        Ok(vec![WriteOp::delete(keys::graph_metadata(graph.id()))])
    }
}
