//! Benchmarks for graph traversal and similarity discovery
//!
//! Run with: `cargo bench --bench graph_algorithms`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use knowledge_graph_core::{
    EdgeType, Graph, GraphLimits, Node, NodeContent, NodeId, NodeLimits, Position3D,
    SimilarityConfig, SimilarityEngine, UserId,
};

const TOPICS: &[&str] = &[
    "ownership", "borrowing", "lifetimes", "traits", "generics", "macros", "async", "futures",
    "channels", "atomics",
];

/// A graph of `size` nodes: a chain plus a shortcut every tenth node
fn build_graph(size: usize) -> (Graph, Vec<NodeId>) {
    let user = UserId::new("bench").unwrap();
    let mut graph = Graph::new(user.clone(), "Bench", false, GraphLimits::default());
    let limits = NodeLimits::default();

    let ids: Vec<NodeId> = (0..size)
        .map(|i| {
            let body = format!(
                "notes about {} and {}",
                TOPICS[i % TOPICS.len()],
                TOPICS[(i * 7) % TOPICS.len()]
            );
            let node = Node::new(
                user.clone(),
                graph.id(),
                NodeContent::text(format!("Note {i}"), body),
                Position3D::default(),
                vec![TOPICS[i % 3].to_string()],
                &limits,
            )
            .unwrap();
            let id = node.id();
            graph.add_node(node).unwrap();
            id
        })
        .collect();

    for pair in ids.windows(2) {
        graph.connect_nodes(pair[0], pair[1], EdgeType::Sequential).unwrap();
    }
    for i in (0..size.saturating_sub(10)).step_by(10) {
        graph.connect_nodes(ids[i], ids[i + 10], EdgeType::Reference).unwrap();
    }
    graph.take_pending_events();
    (graph, ids)
}

fn bench_find_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_path");
    for size in [100, 1_000, 5_000] {
        let (graph, ids) = build_graph(size);
        let (start, end) = (ids[0], ids[size - 1]);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| graph.find_path(black_box(start), black_box(end)).unwrap())
        });
    }
    group.finish();
}

fn bench_get_clusters(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_clusters");
    for size in [100, 1_000, 5_000] {
        let (graph, _) = build_graph(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(graph.get_clusters()))
        });
    }
    group.finish();
}

fn bench_find_similar(c: &mut Criterion) {
    let engine = SimilarityEngine::new(SimilarityConfig::default());
    let mut group = c.benchmark_group("find_similar");
    for size in [100, 1_000] {
        let (graph, ids) = build_graph(size);
        let source = ids[size / 2];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| engine.find_similar(&graph, black_box(source)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_find_path, bench_get_clusters, bench_find_similar);
criterion_main!(benches);
