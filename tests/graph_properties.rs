//! Property tests for graph algorithms and similarity scoring

use indexmap::IndexSet;
use proptest::prelude::*;

use knowledge_graph_core::similarity::{overlap, Fingerprint};
use knowledge_graph_core::{
    EdgeType, Graph, GraphCommandError, GraphLimits, Node, NodeContent, NodeId, NodeLimits,
    Position3D, UserId, WeightFormula,
};

fn build(n: usize, pairs: &[(usize, usize)]) -> (Graph, Vec<NodeId>) {
    let user = UserId::new("prop").unwrap();
    let mut graph = Graph::new(user.clone(), "Prop", false, GraphLimits::default());
    let ids: Vec<NodeId> = (0..n)
        .map(|i| {
            let node = Node::new(
                user.clone(),
                graph.id(),
                NodeContent::text(format!("Node {i}"), "body"),
                Position3D::default(),
                vec![],
                &NodeLimits::default(),
            )
            .unwrap();
            let id = node.id();
            graph.add_node(node).unwrap();
            id
        })
        .collect();

    for &(a, b) in pairs {
        let (a, b) = (a % n, b % n);
        if a != b {
            // Repeated pairs are rejected as duplicates; that is fine here
            let _ = graph.connect_nodes(ids[a], ids[b], EdgeType::Reference);
        }
    }
    (graph, ids)
}

fn words() -> impl Strategy<Value = IndexSet<String>> {
    prop::collection::vec("[a-e]{4}", 0..6).prop_map(|v| v.into_iter().collect())
}

proptest! {
    #[test]
    fn clusters_cover_every_node_once(
        n in 1usize..30,
        pairs in prop::collection::vec((0usize..30, 0usize..30), 0..60),
    ) {
        let (graph, ids) = build(n, &pairs);

        let mut clustered: Vec<NodeId> = graph.get_clusters().into_iter().flatten().collect();
        let mut expected = ids.clone();
        clustered.sort();
        expected.sort();
        prop_assert_eq!(clustered, expected);
        prop_assert!(graph.validate().is_ok());
    }

    #[test]
    fn path_to_self_is_trivial(
        n in 1usize..20,
        pairs in prop::collection::vec((0usize..20, 0usize..20), 0..40),
        pick in 0usize..20,
    ) {
        let (graph, ids) = build(n, &pairs);
        let node = ids[pick % n];
        prop_assert_eq!(graph.find_path(node, node).unwrap(), vec![node]);
    }

    #[test]
    fn found_paths_follow_edges(
        n in 2usize..20,
        pairs in prop::collection::vec((0usize..20, 0usize..20), 0..40),
    ) {
        let (graph, ids) = build(n, &pairs);
        match graph.find_path(ids[0], ids[n - 1]) {
            Ok(path) => {
                prop_assert_eq!(path.first(), Some(&ids[0]));
                prop_assert_eq!(path.last(), Some(&ids[n - 1]));
                for step in path.windows(2) {
                    prop_assert!(graph.edge(step[0], step[1]).is_some());
                }
            }
            Err(GraphCommandError::NoPath { .. }) => {}
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }

    #[test]
    fn second_connect_is_a_duplicate(n in 2usize..10, a in 0usize..10, b in 0usize..10) {
        let (mut graph, ids) = build(n, &[]);
        let (a, b) = (a % n, b % n);
        prop_assume!(a != b);

        graph.connect_nodes(ids[a], ids[b], EdgeType::Reference).unwrap();
        let again = graph.connect_nodes(ids[a], ids[b], EdgeType::Similar);
        prop_assert!(matches!(again, Err(GraphCommandError::DuplicateEdge(_))));
        prop_assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn similarity_and_weight_stay_in_unit_range(
        source_keywords in words(),
        source_tags in words(),
        candidate_keywords in words(),
        candidate_tags in words(),
    ) {
        let source = Fingerprint { keywords: source_keywords, tags: source_tags };
        let candidate = Fingerprint { keywords: candidate_keywords, tags: candidate_tags };

        if let Some(found) = overlap(&source, &candidate) {
            prop_assert!(found.score > 0.0 && found.score <= 1.0);
            for formula in [WeightFormula::WeightedOverlap, WeightFormula::Ratio] {
                let weight = formula.weight(found.score, found.shared_keywords, found.shared_tags);
                prop_assert!((0.0..=1.0).contains(&weight));
            }
        } else {
            let shared = source.keywords.iter().any(|k| candidate.keywords.contains(k))
                || source.tags.iter().any(|t| candidate.tags.contains(t));
            prop_assert!(!shared);
        }
    }
}
