//! Graph command handlers
//!
//! [`GraphService`] turns commands into aggregate mutations and commits the
//! resulting state and events through one unit of work per request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregate::{EdgeOptions, Graph, GraphSnapshot, Node, NodeUpdate};
use crate::commands::{GraphCommand, GraphCommandError, GraphCommandResult};
use crate::config::ServiceConfig;
use crate::infrastructure::{DistributedLock, GraphRepository, KeyValueStore, UnitOfWork};
use crate::queries::{GraphData, GraphQueryHandler};
use crate::similarity::{SimilarityEngine, SimilarityMatch};
use crate::value_objects::{
    normalize_tags, EdgeId, EdgeType, GraphId, NodeContent, NodeId, Position3D, UserId,
};

/// Name given to a user's automatically created graph
pub const DEFAULT_GRAPH_NAME: &str = "My Knowledge Graph";

/// Trait for handling graph commands
#[async_trait]
pub trait GraphCommandHandler: Send + Sync {
    /// Handle one command
    async fn handle(&self, command: GraphCommand) -> GraphCommandResult<CommandOutcome>;
}

/// What a handled command produced
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    NodeCreated(Node),
    NodesConnected(EdgeId),
    NodeRemoved,
    NodePublished { changed: bool },
    DefaultGraph(GraphSnapshot),
}

/// Input for one node of a bulk create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    pub content: NodeContent,
    #[serde(default)]
    pub position: Position3D,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A bulk item that did not make it
#[derive(Debug, Clone)]
pub struct BulkFailure {
    /// Position of the item in the request
    pub index: usize,
    pub error: GraphCommandError,
}

/// Result of a bulk operation; one item's failure never aborts the others
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub created: Vec<Node>,
    pub failures: Vec<BulkFailure>,
    /// Problems reported by the post-batch integrity probe
    pub integrity_problems: Vec<String>,
}

impl BulkOutcome {
    pub fn succeeded(&self) -> usize {
        self.created.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Orchestrates graph commands over the store
pub struct GraphService {
    store: Arc<dyn KeyValueStore>,
    graphs: GraphRepository,
    queries: GraphQueryHandler,
    lock: DistributedLock,
    similarity: SimilarityEngine,
    config: ServiceConfig,
    instance_id: Uuid,
}

impl GraphService {
    pub fn new(store: Arc<dyn KeyValueStore>, config: ServiceConfig) -> Self {
        let graphs = GraphRepository::new(store.clone(), config.limits);
        Self {
            queries: GraphQueryHandler::new(graphs.clone()),
            lock: DistributedLock::new(store.clone(), config.lock.clone()),
            similarity: SimilarityEngine::new(config.similarity),
            graphs,
            store,
            config,
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn graphs(&self) -> &GraphRepository {
        &self.graphs
    }

    pub fn queries(&self) -> &GraphQueryHandler {
        &self.queries
    }

    /// Return the user's default graph, creating it if it does not exist.
    ///
    /// Creation happens under a per-user lock and re-checks after acquiring
    /// it, so concurrent callers end up with the same graph.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn ensure_default_graph(&self, user_id: &UserId) -> GraphCommandResult<Graph> {
        if let Some(snapshot) = self.graphs.find_default(user_id).await? {
            return self.graphs.load(snapshot.id).await;
        }

        let resource = format!("default-graph:{user_id}");
        let owner = format!("graph-service:{}", self.instance_id);
        let lock = self.lock.acquire_with_defaults(&resource, &owner).await?;

        let result = self.create_default_graph(user_id).await;

        if let Err(e) = self.lock.release(&lock).await {
            warn!(resource = %resource, error = %e, "Failed to release default graph lock");
        }
        result
    }

    async fn create_default_graph(&self, user_id: &UserId) -> GraphCommandResult<Graph> {
        if let Some(snapshot) = self.graphs.find_default(user_id).await? {
            debug!("Default graph created by another caller while waiting");
            return self.graphs.load(snapshot.id).await;
        }

        let mut graph = Graph::new(user_id.clone(), DEFAULT_GRAPH_NAME, true, self.config.limits);
        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.register_save(&self.graphs, &graph)?;
        uow.register_events(graph.take_pending_events())?;
        uow.commit().await?;
        graph.mark_persisted();

        info!(graph_id = %graph.id(), "Default graph created");
        Ok(graph)
    }

    /// Create a node in the user's default graph and link it to similar nodes
    #[instrument(skip(self, user_id, content, tags), fields(user_id = %user_id))]
    pub async fn create_node(
        &self,
        user_id: &UserId,
        content: NodeContent,
        position: Position3D,
        tags: Vec<String>,
    ) -> GraphCommandResult<Node> {
        let limits = &self.config.node_limits;
        content.validate(limits)?;
        position.validate(limits)?;
        let tags = normalize_tags(tags, limits)?;

        let mut graph = self.ensure_default_graph(user_id).await?;
        let node = Node::new(user_id.clone(), graph.id(), content, position, tags, limits)?;
        let node_id = node.id();
        graph.add_node(node)?;

        let similar = self.similarity.connect_similar(&mut graph, node_id)?;

        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.register_save(&self.graphs, &graph)?;
        let created = graph
            .node(node_id)
            .cloned()
            .ok_or(GraphCommandError::NodeNotFound(node_id))?;
        uow.register_save(self.graphs.nodes(), &created)?;
        for edge in &similar {
            uow.register_save(self.graphs.edges(), edge)?;
        }
        uow.register_events(graph.take_pending_events())?;
        uow.commit().await?;
        graph.mark_persisted();

        info!(
            graph_id = %graph.id(),
            node_id = %node_id,
            similar_edges = similar.len(),
            "Node created"
        );
        Ok(created)
    }

    /// Create several nodes, each in its own transaction.
    ///
    /// Failures are collected per item. After the batch the graph is loaded
    /// once more and checked for integrity drift.
    pub async fn create_nodes(&self, user_id: &UserId, nodes: Vec<NewNode>) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();

        for (index, input) in nodes.into_iter().enumerate() {
            match self
                .create_node(user_id, input.content, input.position, input.tags)
                .await
            {
                Ok(node) => outcome.created.push(node),
                Err(error) => {
                    warn!(index, error = %error, "Bulk node create failed");
                    outcome.failures.push(BulkFailure { index, error });
                }
            }
        }

        if let Some(graph_id) = outcome.created.first().map(Node::graph_id) {
            match self.graphs.load(graph_id).await.and_then(|g| g.validate()) {
                Ok(()) => {}
                Err(GraphCommandError::IntegrityViolation(problems)) => {
                    warn!(
                        graph_id = %graph_id,
                        problems = problems.len(),
                        "Integrity drift after bulk create"
                    );
                    outcome.integrity_problems = problems;
                }
                Err(e) => outcome.integrity_problems.push(e.to_string()),
            }
        }

        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "Bulk node create finished"
        );
        outcome
    }

    /// Connect two nodes of a graph
    #[instrument(skip(self))]
    pub async fn connect_nodes(
        &self,
        graph_id: GraphId,
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
        weight: f64,
    ) -> GraphCommandResult<EdgeId> {
        let mut graph = self.graphs.load(graph_id).await?;
        let options = EdgeOptions::weighted(weight);
        let edge = graph.connect_nodes_with(source_id, target_id, edge_type, options)?;

        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.register_save(&self.graphs, &graph)?;
        uow.register_save(self.graphs.edges(), &edge)?;
        uow.register_events(graph.take_pending_events())?;
        uow.commit().await?;

        info!(edge_id = %edge.id, "Nodes connected");
        Ok(edge.id)
    }

    /// Remove one edge
    #[instrument(skip(self))]
    pub async fn disconnect_nodes(
        &self,
        graph_id: GraphId,
        source_id: NodeId,
        target_id: NodeId,
    ) -> GraphCommandResult<()> {
        let mut graph = self.graphs.load(graph_id).await?;
        let edge = graph.disconnect_nodes(source_id, target_id)?;

        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.register_save(&self.graphs, &graph)?;
        uow.register_delete(self.graphs.edges(), &edge)?;
        uow.register_events(graph.take_pending_events())?;
        uow.commit().await?;

        info!(edge_id = %edge.id, "Nodes disconnected");
        Ok(())
    }

    /// Archive a node and delete every edge touching it
    #[instrument(skip(self))]
    pub async fn remove_node(&self, graph_id: GraphId, node_id: NodeId) -> GraphCommandResult<()> {
        let mut graph = self.graphs.load(graph_id).await?;
        let removed = graph.remove_node(node_id)?;

        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.register_save(&self.graphs, &graph)?;
        uow.register_save(self.graphs.nodes(), &removed.node)?;
        for edge in &removed.edges {
            uow.register_delete(self.graphs.edges(), edge)?;
        }
        uow.register_events(graph.take_pending_events())?;
        uow.commit().await?;

        info!(removed_edges = removed.edges.len(), "Node removed");
        Ok(())
    }

    /// Publish a draft node. Returns whether its status changed.
    #[instrument(skip(self))]
    pub async fn publish_node(
        &self,
        graph_id: GraphId,
        node_id: NodeId,
    ) -> GraphCommandResult<bool> {
        let mut graph = self.graphs.load(graph_id).await?;
        if !graph.publish_node(node_id)? {
            return Ok(false);
        }
        self.commit_node(&mut graph, node_id).await?;
        Ok(true)
    }

    /// Change a node's content, tags or position. Returns whether anything changed.
    #[instrument(skip(self, update))]
    pub async fn update_node(
        &self,
        graph_id: GraphId,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> GraphCommandResult<bool> {
        if update.is_empty() {
            return Err(GraphCommandError::InvalidCommand(
                "Update carries no changes".to_string(),
            ));
        }
        let mut graph = self.graphs.load(graph_id).await?;
        if !graph.update_node(node_id, update, &self.config.node_limits)? {
            return Ok(false);
        }
        self.commit_node(&mut graph, node_id).await?;
        Ok(true)
    }

    /// Stage the header with the node so a graph changed since the load
    /// (a removal, say) rejects this write as a concurrent modification.
    async fn commit_node(&self, graph: &mut Graph, node_id: NodeId) -> GraphCommandResult<()> {
        let node = graph
            .node(node_id)
            .ok_or(GraphCommandError::NodeNotFound(node_id))?;
        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.register_save(&self.graphs, &*graph)?;
        uow.register_save(self.graphs.nodes(), node)?;
        uow.register_events(graph.take_pending_events())?;
        uow.commit().await?;
        graph.mark_persisted();
        Ok(())
    }

    /// Nodes, edges and statistics of a graph
    pub async fn get_graph_data(&self, graph_id: GraphId) -> GraphCommandResult<GraphData> {
        self.queries.get_graph_data(graph_id).await
    }

    /// Fewest-hop path between two nodes
    pub async fn find_path(
        &self,
        graph_id: GraphId,
        start: NodeId,
        end: NodeId,
    ) -> GraphCommandResult<Vec<NodeId>> {
        self.queries.find_path(graph_id, start, end).await
    }

    /// Ranked similarity candidates for a node, without creating edges
    pub async fn find_similar(
        &self,
        graph_id: GraphId,
        node_id: NodeId,
    ) -> GraphCommandResult<Vec<SimilarityMatch>> {
        let graph = self.graphs.load(graph_id).await?;
        self.similarity.find_similar(&graph, node_id)
    }
}

#[async_trait]
impl GraphCommandHandler for GraphService {
    async fn handle(&self, command: GraphCommand) -> GraphCommandResult<CommandOutcome> {
        match command {
            GraphCommand::CreateNode {
                user_id,
                content,
                position,
                tags,
            } => self
                .create_node(&user_id, content, position, tags)
                .await
                .map(CommandOutcome::NodeCreated),
            GraphCommand::ConnectNodes {
                graph_id,
                source_id,
                target_id,
                edge_type,
                weight,
            } => self
                .connect_nodes(graph_id, source_id, target_id, edge_type, weight)
                .await
                .map(CommandOutcome::NodesConnected),
            GraphCommand::RemoveNode { graph_id, node_id } => self
                .remove_node(graph_id, node_id)
                .await
                .map(|()| CommandOutcome::NodeRemoved),
            GraphCommand::PublishNode { graph_id, node_id } => self
                .publish_node(graph_id, node_id)
                .await
                .map(|changed| CommandOutcome::NodePublished { changed }),
            GraphCommand::EnsureDefaultGraph { user_id } => self
                .ensure_default_graph(&user_id)
                .await
                .map(|graph| CommandOutcome::DefaultGraph(graph.snapshot())),
        }
    }
}
