//! Graph aggregate integration tests

use knowledge_graph_core::{
    DomainEvent, EdgeOptions, EdgeType, Graph, GraphCommandError, GraphLimits, Node, NodeContent,
    NodeId, NodeLimits, NodeStatus, Position3D, UserId,
};

fn user() -> UserId {
    UserId::new("reader-7").unwrap()
}

fn add(graph: &mut Graph, title: &str, tags: &[&str]) -> NodeId {
    let node = Node::new(
        user(),
        graph.id(),
        NodeContent::text(title, "notes"),
        Position3D::default(),
        tags.iter().map(|t| t.to_string()).collect(),
        &NodeLimits::default(),
    )
    .unwrap();
    let id = node.id();
    graph.add_node(node).unwrap();
    id
}

#[test]
fn test_reading_list_paths_and_clusters() {
    let mut graph = Graph::new(user(), "Reading list", false, GraphLimits::default());
    let intro = add(&mut graph, "Intro", &["basics"]);
    let traits = add(&mut graph, "Traits", &["types"]);
    let generics = add(&mut graph, "Generics", &["types"]);
    let macros = add(&mut graph, "Macros", &[]);
    let unrelated = add(&mut graph, "Gardening", &[]);

    graph.connect_nodes(intro, traits, EdgeType::Sequential).unwrap();
    graph.connect_nodes(traits, generics, EdgeType::Sequential).unwrap();
    graph
        .connect_nodes_with(
            generics,
            macros,
            EdgeType::Reference,
            EdgeOptions {
                weight: 0.4,
                bidirectional: true,
                ..EdgeOptions::default()
            },
        )
        .unwrap();

    assert_eq!(
        graph.find_path(intro, macros).unwrap(),
        vec![intro, traits, generics, macros]
    );
    // Only the bidirectional edge can be walked backwards
    assert_eq!(graph.find_path(macros, generics).unwrap(), vec![macros, generics]);
    assert!(matches!(
        graph.find_path(generics, intro),
        Err(GraphCommandError::NoPath { .. })
    ));
    assert!(matches!(
        graph.find_path(intro, NodeId::new()),
        Err(GraphCommandError::NodeNotFound(_))
    ));

    let mut clusters = graph.get_clusters();
    clusters.sort_by_key(|c| std::cmp::Reverse(c.len()));
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].len(), 4);
    assert_eq!(clusters[1], vec![unrelated]);

    let clustered: usize = clusters.iter().map(Vec::len).sum();
    assert_eq!(clustered, graph.node_count());
    assert!(graph.validate().is_ok());
}

#[test]
fn test_removing_a_hub_splits_the_graph() {
    let mut graph = Graph::new(user(), "Hub", false, GraphLimits::default());
    let hub = add(&mut graph, "Hub", &[]);
    let spokes: Vec<_> = ["One", "Two", "Three"]
        .iter()
        .map(|title| add(&mut graph, title, &[]))
        .collect();
    for spoke in &spokes {
        graph.connect_nodes(hub, *spoke, EdgeType::ParentChild).unwrap();
    }
    assert_eq!(graph.get_clusters().len(), 1);
    graph.take_pending_events();

    let removed = graph.remove_node(hub).unwrap();
    assert_eq!(removed.node.status(), NodeStatus::Archived);
    assert_eq!(removed.edges.len(), 3);
    assert_eq!(graph.edge_count(), 0);
    assert_eq!(graph.get_clusters().len(), 3);
    assert!(graph.validate().is_ok());

    let types: Vec<_> = graph
        .take_pending_events()
        .iter()
        .map(|e| e.event.event_type())
        .collect();
    assert_eq!(types, vec!["NodeArchived", "NodeRemovedFromGraph"]);
}

#[test]
fn test_edge_rules() {
    let limits = GraphLimits {
        max_nodes: 10,
        max_edges: 1,
    };
    let mut graph = Graph::new(user(), "Tight", false, limits);
    let a = add(&mut graph, "A", &[]);
    let b = add(&mut graph, "B", &[]);
    let c = add(&mut graph, "C", &[]);

    assert!(matches!(
        graph.connect_nodes(a, a, EdgeType::Reference),
        Err(GraphCommandError::SelfReference(_))
    ));
    assert!(graph
        .connect_nodes_with(a, b, EdgeType::Reference, EdgeOptions::weighted(1.5))
        .is_err());

    graph.connect_nodes(a, b, EdgeType::Reference).unwrap();
    assert!(matches!(
        graph.connect_nodes(a, b, EdgeType::Similar),
        Err(GraphCommandError::DuplicateEdge(_))
    ));
    assert!(matches!(
        graph.connect_nodes(b, c, EdgeType::Reference),
        Err(GraphCommandError::CapacityExceeded(_))
    ));
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn test_node_serializes_without_pending_events() {
    let mut graph = Graph::new(user(), "Serde", false, GraphLimits::default());
    let id = add(&mut graph, "Persisted", &["Mixed Case"]);
    let node = graph.node(id).unwrap();
    assert_eq!(node.tags(), ["mixed case".to_string()]);

    let json = serde_json::to_string(node).unwrap();
    let restored: Node = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.id(), id);
    assert_eq!(restored.status(), NodeStatus::Draft);
    assert!(restored.pending_events().is_empty());
}
