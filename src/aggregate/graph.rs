//! Graph aggregate
//!
//! The graph is the aggregate root for its nodes and edges. It owns the edge
//! set exclusively, keeps `metadata.node_count` / `metadata.edge_count` in step
//! with its maps, and buffers the domain events produced by every mutation of
//! itself or of the nodes it holds.
//!
//! A `Graph` value is scoped to one unit of work and is not internally
//! synchronized.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

use super::edge::{validate_weight, Edge, EdgeOptions};
use super::node::{Node, NodeUpdate};
use crate::commands::{GraphCommandError, GraphCommandResult};
use crate::domain_events::{EventEnvelope, GraphDomainEvent};
use crate::events::{
    GraphCreated, NodeAddedToGraph, NodeRemovedFromGraph, NodesConnected, NodesDisconnected,
};
use crate::value_objects::{
    EdgeKey, EdgeType, GraphId, GraphLimits, NodeId, NodeLimits, UserId,
};

/// Denormalized counters and timestamps stored with the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub node_count: usize,
    pub edge_count: usize,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted header of a graph: everything except its nodes and edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id: GraphId,
    pub user_id: UserId,
    pub name: String,
    pub is_default: bool,
    pub version: u64,
    pub metadata: GraphMetadata,
}

/// A node taken out of the graph together with the edges that touched it
#[derive(Debug, Clone)]
pub struct RemovedNode {
    /// The node, now archived
    pub node: Node,
    /// Edges dropped from the graph
    pub edges: Vec<Edge>,
}

/// Knowledge graph aggregate root
#[derive(Debug, Clone)]
pub struct Graph {
    id: GraphId,
    user_id: UserId,
    name: String,
    is_default: bool,
    nodes: IndexMap<NodeId, Node>,
    edges: IndexMap<EdgeKey, Edge>,
    metadata: GraphMetadata,
    limits: GraphLimits,
    version: u64,
    persisted_version: Option<u64>,
    complete: bool,
    pending_events: Vec<EventEnvelope>,
}

impl Graph {
    /// Create a new, empty graph
    pub fn new(
        user_id: UserId,
        name: impl Into<String>,
        is_default: bool,
        limits: GraphLimits,
    ) -> Self {
        let now = Utc::now();
        let mut graph = Self {
            id: GraphId::new(),
            user_id,
            name: name.into(),
            is_default,
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            metadata: GraphMetadata {
                node_count: 0,
                edge_count: 0,
                description: String::new(),
                created_at: now,
                updated_at: now,
            },
            limits,
            version: 1,
            persisted_version: None,
            complete: true,
            pending_events: Vec::new(),
        };

        graph.record(GraphDomainEvent::GraphCreated(GraphCreated {
            graph_id: graph.id,
            user_id: graph.user_id.clone(),
            name: graph.name.clone(),
            is_default,
            created_at: now,
        }));

        graph
    }

    /// Rebuild a graph from persisted state.
    ///
    /// `nodes` must hold the live (non-archived) nodes of the graph. When fewer
    /// nodes arrive than the snapshot records, the graph is marked incomplete
    /// and edges to missing nodes are skipped; otherwise a dangling edge is an
    /// integrity violation. More nodes than recorded is a stale counter: every
    /// node is present, so the load is complete and the count is re-derived.
    pub fn rehydrate(
        snapshot: GraphSnapshot,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        limits: GraphLimits,
    ) -> GraphCommandResult<Self> {
        let recorded_nodes = snapshot.metadata.node_count;
        let complete = nodes.len() >= recorded_nodes;
        if nodes.len() > recorded_nodes {
            warn!(
                graph_id = %snapshot.id,
                recorded = recorded_nodes,
                loaded = nodes.len(),
                "Stored node count is behind; re-deriving from loaded nodes"
            );
        }

        let mut node_map = IndexMap::with_capacity(nodes.len());
        for node in nodes {
            if node.graph_id() != snapshot.id {
                return Err(GraphCommandError::IntegrityViolation(vec![format!(
                    "node {} belongs to graph {}",
                    node.id(),
                    node.graph_id()
                )]));
            }
            node_map.insert(node.id(), node);
        }

        let mut edge_map = IndexMap::with_capacity(edges.len());
        for edge in edges {
            if edge.graph_id != snapshot.id {
                return Err(GraphCommandError::IntegrityViolation(vec![format!(
                    "edge {} belongs to graph {}",
                    edge.key(),
                    edge.graph_id
                )]));
            }
            let dangling = !node_map.contains_key(&edge.source_id)
                || !node_map.contains_key(&edge.target_id);
            if dangling {
                if complete {
                    return Err(GraphCommandError::IntegrityViolation(vec![format!(
                        "edge {} references a node outside graph {}",
                        edge.key(),
                        snapshot.id
                    )]));
                }
                warn!(
                    graph_id = %snapshot.id,
                    edge = %edge.key(),
                    "Skipping edge to unloaded node"
                );
                continue;
            }
            edge_map.insert(edge.key(), edge);
        }

        let mut metadata = snapshot.metadata;
        metadata.node_count = node_map.len();
        metadata.edge_count = edge_map.len();

        Ok(Self {
            id: snapshot.id,
            user_id: snapshot.user_id,
            name: snapshot.name,
            is_default: snapshot.is_default,
            nodes: node_map,
            edges: edge_map,
            metadata,
            limits,
            version: snapshot.version,
            persisted_version: Some(snapshot.version),
            complete,
            pending_events: Vec::new(),
        })
    }

    /// Persistable header
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            is_default: self.is_default,
            version: self.version,
            metadata: self.metadata.clone(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    pub fn limits(&self) -> GraphLimits {
        self.limits
    }

    /// Current version for optimistic concurrency control
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version last confirmed in the store, `None` for a graph never committed
    pub fn persisted_version(&self) -> Option<u64> {
        self.persisted_version
    }

    /// Record that the current version has been committed
    pub fn mark_persisted(&mut self) {
        self.persisted_version = Some(self.version);
    }

    /// Whether every node of the graph is loaded
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edge(&self, source_id: NodeId, target_id: NodeId) -> Option<&Edge> {
        self.edges.get(&EdgeKey::new(source_id, target_id))
    }

    /// Edges in insertion order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Every edge where the node is source or target.
    ///
    /// This is the node-level edge view; nodes themselves hold no edge list.
    pub fn edges_of(&self, node_id: NodeId) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.touches(node_id)).collect()
    }

    /// Get outgoing edges for a node
    pub fn outgoing_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.edges
            .values()
            .filter(|edge| edge.source_id == node_id)
            .collect()
    }

    /// Get incoming edges for a node
    pub fn incoming_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.edges
            .values()
            .filter(|edge| edge.target_id == node_id)
            .collect()
    }

    /// Events buffered since the last drain
    pub fn pending_events(&self) -> &[EventEnvelope] {
        &self.pending_events
    }

    /// Move every buffered event out of the aggregate.
    ///
    /// The persistence boundary calls this once when staging the graph into a
    /// unit of work; the events then travel with the transaction.
    pub fn take_pending_events(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.pending_events)
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, mut node: Node) -> GraphCommandResult<()> {
        if node.graph_id() != self.id {
            return Err(GraphCommandError::BusinessRuleViolation(format!(
                "Node {} belongs to graph {}, not {}",
                node.id(),
                node.graph_id(),
                self.id
            )));
        }
        if node.is_archived() {
            return Err(GraphCommandError::NodeArchived(node.id()));
        }
        if self.nodes.contains_key(&node.id()) {
            return Err(GraphCommandError::NodeAlreadyExists(node.id()));
        }
        if self.nodes.len() >= self.limits.max_nodes {
            return Err(GraphCommandError::CapacityExceeded(format!(
                "Graph {} already holds {} nodes",
                self.id, self.limits.max_nodes
            )));
        }

        let node_id = node.id();
        self.pending_events.extend(node.take_pending_events());
        self.nodes.insert(node_id, node);
        self.metadata.node_count += 1;
        self.bump();
        self.record(GraphDomainEvent::NodeAddedToGraph(NodeAddedToGraph {
            graph_id: self.id,
            node_id,
        }));

        Ok(())
    }

    /// Connect two loaded nodes with a default-weight, one-directional edge
    pub fn connect_nodes(
        &mut self,
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
    ) -> GraphCommandResult<Edge> {
        self.connect_nodes_with(source_id, target_id, edge_type, EdgeOptions::default())
    }

    /// Connect two loaded nodes.
    ///
    /// Both nodes must be present in this instance; a node that exists in the
    /// store but was not loaded is reported as not found.
    pub fn connect_nodes_with(
        &mut self,
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
        options: EdgeOptions,
    ) -> GraphCommandResult<Edge> {
        if source_id == target_id {
            return Err(GraphCommandError::SelfReference(source_id));
        }
        validate_weight(options.weight)?;
        for node_id in [source_id, target_id] {
            if !self.nodes.contains_key(&node_id) {
                return Err(GraphCommandError::NodeNotFound(node_id));
            }
        }

        let key = EdgeKey::new(source_id, target_id);
        if self.edges.contains_key(&key) {
            return Err(GraphCommandError::DuplicateEdge(key));
        }
        if self.edges.len() >= self.limits.max_edges {
            return Err(GraphCommandError::CapacityExceeded(format!(
                "Graph {} already holds {} edges",
                self.id, self.limits.max_edges
            )));
        }

        let edge = Edge::new(self.id, source_id, target_id, edge_type, options)?;
        self.edges.insert(key, edge.clone());
        self.metadata.edge_count += 1;
        self.bump();
        self.record(GraphDomainEvent::NodesConnected(NodesConnected {
            graph_id: self.id,
            edge_id: edge.id,
            source_id,
            target_id,
            edge_type,
            weight: edge.weight,
        }));

        Ok(edge)
    }

    /// Remove the edge for an ordered pair
    pub fn disconnect_nodes(
        &mut self,
        source_id: NodeId,
        target_id: NodeId,
    ) -> GraphCommandResult<Edge> {
        let key = EdgeKey::new(source_id, target_id);
        let edge = self
            .edges
            .shift_remove(&key)
            .ok_or(GraphCommandError::EdgeNotFound(key))?;

        self.metadata.edge_count -= 1;
        self.bump();
        self.record(GraphDomainEvent::NodesDisconnected(NodesDisconnected {
            graph_id: self.id,
            edge_id: edge.id,
            source_id,
            target_id,
        }));

        Ok(edge)
    }

    /// Archive a node and take it out of the graph along with all its edges
    pub fn remove_node(&mut self, node_id: NodeId) -> GraphCommandResult<RemovedNode> {
        let mut node = self
            .nodes
            .shift_remove(&node_id)
            .ok_or(GraphCommandError::NodeNotFound(node_id))?;

        node.archive();
        self.pending_events.extend(node.take_pending_events());

        let mut removed = Vec::new();
        self.edges.retain(|_, edge| {
            if edge.touches(node_id) {
                removed.push(edge.clone());
                false
            } else {
                true
            }
        });

        self.metadata.node_count -= 1;
        self.metadata.edge_count -= removed.len();
        self.bump();
        self.record(GraphDomainEvent::NodeRemovedFromGraph(NodeRemovedFromGraph {
            graph_id: self.id,
            node_id,
            removed_edges: removed.iter().map(|e| e.id).collect(),
        }));

        Ok(RemovedNode {
            node,
            edges: removed,
        })
    }

    /// Publish a node held by the graph. Returns whether its status changed.
    ///
    /// A change bumps the graph version so the header guard orders node
    /// writes against concurrent structural changes.
    pub fn publish_node(&mut self, node_id: NodeId) -> GraphCommandResult<bool> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphCommandError::NodeNotFound(node_id))?;
        let changed = node.publish()?;
        let events = node.take_pending_events();
        self.pending_events.extend(events);
        if changed {
            self.bump();
        }
        Ok(changed)
    }

    /// Update a node held by the graph. Returns whether anything changed.
    pub fn update_node(
        &mut self,
        node_id: NodeId,
        update: NodeUpdate,
        limits: &NodeLimits,
    ) -> GraphCommandResult<bool> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphCommandError::NodeNotFound(node_id))?;
        let changed = node.update(update, limits)?;
        let events = node.take_pending_events();
        self.pending_events.extend(events);
        if changed {
            self.bump();
        }
        Ok(changed)
    }

    /// Shortest path by hop count.
    ///
    /// Follows edges source → target, and target → source when the edge is
    /// bidirectional.
    pub fn find_path(&self, start: NodeId, end: NodeId) -> GraphCommandResult<Vec<NodeId>> {
        for node_id in [start, end] {
            if !self.nodes.contains_key(&node_id) {
                return Err(GraphCommandError::NodeNotFound(node_id));
            }
        }
        if start == end {
            return Ok(vec![start]);
        }

        let adjacency = self.directed_adjacency();
        let mut previous: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited: HashSet<NodeId> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = adjacency.get(&current) else {
                continue;
            };
            for &next in neighbors {
                if !visited.insert(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == end {
                    let mut path = vec![end];
                    let mut cursor = end;
                    while let Some(&prev) = previous.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Ok(path);
                }
                queue.push_back(next);
            }
        }

        Err(GraphCommandError::NoPath { start, end })
    }

    /// Partition all nodes into connected components.
    ///
    /// Edges are treated as undirected so the partition does not depend on
    /// which node a traversal starts from. Uses an explicit stack.
    pub fn get_clusters(&self) -> Vec<Vec<NodeId>> {
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(self.nodes.len());
        for edge in self.edges.values() {
            adjacency.entry(edge.source_id).or_default().push(edge.target_id);
            adjacency.entry(edge.target_id).or_default().push(edge.source_id);
        }

        let mut visited: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
        let mut clusters = Vec::new();

        for &node_id in self.nodes.keys() {
            if visited.contains(&node_id) {
                continue;
            }

            let mut cluster = Vec::new();
            let mut stack = vec![node_id];
            while let Some(current) = stack.pop() {
                if !visited.insert(current) {
                    continue;
                }
                cluster.push(current);
                if let Some(neighbors) = adjacency.get(&current) {
                    stack.extend(neighbors.iter().copied().filter(|n| !visited.contains(n)));
                }
            }
            clusters.push(cluster);
        }

        clusters
    }

    /// Edge density of the directed graph: `edges / (n * (n - 1))`
    pub fn density(&self) -> f64 {
        let n = self.nodes.len();
        if n < 2 {
            return 0.0;
        }
        self.edges.len() as f64 / (n as f64 * (n as f64 - 1.0))
    }

    /// Re-derive counts and edge endpoints from the live maps.
    ///
    /// Not called by any mutation; use it as an integrity probe.
    pub fn validate(&self) -> GraphCommandResult<()> {
        let mut problems = Vec::new();

        if self.metadata.node_count != self.nodes.len() {
            problems.push(format!(
                "node_count is {} but graph holds {} nodes",
                self.metadata.node_count,
                self.nodes.len()
            ));
        }
        if self.metadata.edge_count != self.edges.len() {
            problems.push(format!(
                "edge_count is {} but graph holds {} edges",
                self.metadata.edge_count,
                self.edges.len()
            ));
        }
        if self.nodes.len() > self.limits.max_nodes {
            problems.push(format!("more than {} nodes", self.limits.max_nodes));
        }
        if self.edges.len() > self.limits.max_edges {
            problems.push(format!("more than {} edges", self.limits.max_edges));
        }

        for (id, node) in &self.nodes {
            if *id != node.id() {
                problems.push(format!("node {} stored under key {id}", node.id()));
            }
            if node.graph_id() != self.id {
                problems.push(format!("node {id} points at graph {}", node.graph_id()));
            }
            if node.is_archived() {
                problems.push(format!("archived node {id} is still in the graph"));
            }
        }

        for (key, edge) in &self.edges {
            if *key != edge.key() {
                problems.push(format!("edge {} stored under key {key}", edge.key()));
            }
            if edge.graph_id != self.id {
                problems.push(format!("edge {key} points at graph {}", edge.graph_id));
            }
            if edge.source_id == edge.target_id {
                problems.push(format!("edge {key} is a self-loop"));
            }
            for endpoint in [edge.source_id, edge.target_id] {
                if !self.nodes.contains_key(&endpoint) {
                    problems.push(format!("edge {key} references missing node {endpoint}"));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GraphCommandError::IntegrityViolation(problems))
        }
    }

    fn directed_adjacency(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in self.edges.values() {
            adjacency.entry(edge.source_id).or_default().push(edge.target_id);
            if edge.bidirectional {
                adjacency.entry(edge.target_id).or_default().push(edge.source_id);
            }
        }
        adjacency
    }

    fn bump(&mut self) {
        self.version += 1;
        self.metadata.updated_at = Utc::now();
    }

    fn record(&mut self, event: GraphDomainEvent) {
        self.pending_events.push(EventEnvelope::new(event, self.version));
    }

    #[cfg(test)]
    pub(crate) fn corrupt_counts_for_test(&mut self, node_count: usize) {
        self.metadata.node_count = node_count;
    }
}
