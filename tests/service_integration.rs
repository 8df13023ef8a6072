//! End-to-end tests of the graph service over the in-memory store

use std::sync::Arc;

use knowledge_graph_core::{
    CommandOutcome, EdgeType, ErrorKind, GraphCommand, GraphCommandError, GraphCommandHandler,
    GraphService, InMemoryStore, NewNode, NodeContent, OutboxRepository, Position3D,
    PublishStatus, ServiceConfig, UserId,
};

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn service() -> (Arc<InMemoryStore>, GraphService) {
    let store = Arc::new(InMemoryStore::new());
    (store.clone(), GraphService::new(store, ServiceConfig::default()))
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_similar_nodes_are_linked_and_unlinked() {
    let (store, service) = service();
    let owner = user("alice");

    let a = service
        .create_node(
            &owner,
            NodeContent::text("A", "architecture pattern"),
            Position3D::default(),
            tags(&["x", "y"]),
        )
        .await
        .unwrap();
    let b = service
        .create_node(
            &owner,
            NodeContent::text("B", "architecture design"),
            Position3D::new(10.0, 0.0, 0.0),
            tags(&["y", "z"]),
        )
        .await
        .unwrap();
    assert_eq!(a.graph_id(), b.graph_id());
    let graph_id = a.graph_id();

    let data = service.get_graph_data(graph_id).await.unwrap();
    assert_eq!(data.stats.node_count, 2);
    assert_eq!(data.stats.edge_count, 1);
    assert_eq!(data.stats.cluster_count, 1);

    // One shared keyword and one shared tag: (2 * 1 + 3 * 1) / 10
    let edge = &data.edges[0];
    assert_eq!(edge.edge_type, EdgeType::Similar);
    assert_eq!(edge.source_id, b.id());
    assert_eq!(edge.target_id, a.id());
    assert!(edge.bidirectional);
    assert!((edge.weight - 0.5).abs() < 1e-9);

    assert_eq!(
        service.find_path(graph_id, a.id(), b.id()).await.unwrap(),
        vec![a.id(), b.id()]
    );

    let outcome = service
        .handle(GraphCommand::RemoveNode {
            graph_id,
            node_id: a.id(),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, CommandOutcome::NodeRemoved));

    let data = service.get_graph_data(graph_id).await.unwrap();
    assert_eq!(data.stats.node_count, 1);
    assert_eq!(data.stats.edge_count, 0);
    assert_eq!(data.nodes[0].id(), b.id());

    let graph = service.graphs().load(graph_id).await.unwrap();
    assert!(graph.validate().is_ok());

    // Archived nodes stay in the store
    let archived = service
        .graphs()
        .nodes()
        .get(graph_id, a.id())
        .await
        .unwrap()
        .unwrap();
    assert!(archived.is_archived());

    // GraphCreated, 2 x (NodeCreated, NodeAddedToGraph), NodesConnected,
    // NodeArchived, NodeRemovedFromGraph
    let outbox = OutboxRepository::new(store);
    assert_eq!(outbox.count_by_status(PublishStatus::Pending).await.unwrap(), 8);
}

#[tokio::test]
async fn test_unrelated_nodes_stay_unlinked() {
    let (_, service) = service();
    let owner = user("bob");

    let first = service
        .create_node(
            &owner,
            NodeContent::text("Sourdough", "starter hydration schedule"),
            Position3D::default(),
            tags(&["baking"]),
        )
        .await
        .unwrap();
    service
        .create_node(
            &owner,
            NodeContent::text("Kubernetes", "cluster autoscaling notes"),
            Position3D::default(),
            tags(&["ops"]),
        )
        .await
        .unwrap();

    let data = service.get_graph_data(first.graph_id()).await.unwrap();
    assert_eq!(data.stats.edge_count, 0);
    assert_eq!(data.stats.cluster_count, 2);
}

#[tokio::test]
async fn test_connect_nodes_command() {
    let (_, service) = service();
    let owner = user("carol");
    let a = service
        .create_node(&owner, NodeContent::text("Left", "alpha"), Position3D::default(), vec![])
        .await
        .unwrap();
    let b = service
        .create_node(&owner, NodeContent::text("Right", "omega"), Position3D::default(), vec![])
        .await
        .unwrap();

    let outcome = service
        .handle(GraphCommand::ConnectNodes {
            graph_id: a.graph_id(),
            source_id: a.id(),
            target_id: b.id(),
            edge_type: EdgeType::Reference,
            weight: 0.75,
        })
        .await
        .unwrap();
    let CommandOutcome::NodesConnected(edge_id) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };

    let data = service.get_graph_data(a.graph_id()).await.unwrap();
    assert_eq!(data.edges.len(), 1);
    assert_eq!(data.edges[0].id, edge_id);
    assert_eq!(data.edges[0].weight, 0.75);

    let duplicate = service
        .connect_nodes(a.graph_id(), a.id(), b.id(), EdgeType::Similar, 0.2)
        .await;
    assert!(matches!(duplicate, Err(GraphCommandError::DuplicateEdge(_))));

    let bad_weight = service
        .connect_nodes(a.graph_id(), b.id(), a.id(), EdgeType::Reference, 2.0)
        .await;
    assert_eq!(bad_weight.unwrap_err().kind(), ErrorKind::Validation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_default_graph_creation_yields_one_graph() {
    let (_, service) = service();
    let service = Arc::new(service);
    let owner = user("dave");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let owner = owner.clone();
            tokio::spawn(async move { service.ensure_default_graph(&owner).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let graphs = service.queries().list_graphs(&owner).await.unwrap();
    assert_eq!(graphs.len(), 1);
    assert!(graphs[0].is_default);
}

#[tokio::test]
async fn test_default_graphs_are_per_user() {
    let (_, service) = service();
    let first = service.ensure_default_graph(&user("erin")).await.unwrap();
    let second = service.ensure_default_graph(&user("frank")).await.unwrap();
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn test_bulk_create_reports_partial_failure() {
    let (_, service) = service();
    let owner = user("grace");

    let outcome = service
        .create_nodes(
            &owner,
            vec![
                NewNode {
                    content: NodeContent::text("First", "one"),
                    position: Position3D::default(),
                    tags: vec![],
                },
                NewNode {
                    content: NodeContent::text("", "   "),
                    position: Position3D::default(),
                    tags: vec![],
                },
                NewNode {
                    content: NodeContent::text("Third", "three"),
                    position: Position3D::new(f64::NAN, 0.0, 0.0),
                    tags: vec![],
                },
                NewNode {
                    content: NodeContent::text("Fourth", "four"),
                    position: Position3D::default(),
                    tags: vec![],
                },
            ],
        )
        .await;

    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(outcome.failed(), 2);
    let failed: Vec<_> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(failed, vec![1, 2]);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.error.kind() == ErrorKind::Validation));
    assert!(outcome.integrity_problems.is_empty());

    let data = service
        .get_graph_data(outcome.created[0].graph_id())
        .await
        .unwrap();
    assert_eq!(data.stats.node_count, 2);
}

#[tokio::test]
async fn test_oversized_transaction_leaves_graph_unchanged() {
    let store = Arc::new(InMemoryStore::with_transaction_limit(5));
    let service = GraphService::new(store.clone(), ServiceConfig::default());
    let owner = user("heidi");

    let first = service
        .create_node(
            &owner,
            NodeContent::text("Event sourcing", "projections replay"),
            Position3D::default(),
            tags(&["events"]),
        )
        .await
        .unwrap();
    let items_before = store.len();

    // Header, node, similarity edge and three events: six items
    let result = service
        .create_node(
            &owner,
            NodeContent::text("Event replay", "projections rebuild"),
            Position3D::default(),
            tags(&["events"]),
        )
        .await;
    assert!(matches!(
        result,
        Err(GraphCommandError::TransactionTooLarge { items: 6, limit: 5 })
    ));
    assert_eq!(store.len(), items_before);

    let data = service.get_graph_data(first.graph_id()).await.unwrap();
    assert_eq!(data.stats.node_count, 1);
    assert_eq!(data.stats.edge_count, 0);
}

#[tokio::test]
async fn test_store_outage_is_an_infrastructure_error() {
    let (store, service) = service();
    store.set_unavailable(true);

    let result = service
        .create_node(
            &user("ivan"),
            NodeContent::text("Offline", "nothing persists"),
            Position3D::default(),
            vec![],
        )
        .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Infrastructure);

    store.set_unavailable(false);
    assert!(store.is_empty());
}
