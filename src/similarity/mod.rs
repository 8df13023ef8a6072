//! Similarity edge discovery
//!
//! Finds nodes related to a given node by lexical overlap of keywords and tags,
//! and materializes the best matches as `similar` edges.

mod keywords;

pub use keywords::{extract_keywords, MIN_KEYWORD_CHARS, STOP_WORDS};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::aggregate::{Edge, EdgeOptions, Graph, Node};
use crate::commands::{GraphCommandError, GraphCommandResult};
use crate::value_objects::{EdgeType, NodeId};

/// How the weight of a discovered edge is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightFormula {
    /// `(2 × shared keywords + 3 × shared tags) / 10`, capped at 1.0
    #[default]
    WeightedOverlap,
    /// Same value as the similarity score
    Ratio,
}

impl WeightFormula {
    /// Edge weight for the given overlap
    pub fn weight(&self, score: f64, shared_keywords: usize, shared_tags: usize) -> f64 {
        match self {
            WeightFormula::WeightedOverlap => {
                ((2 * shared_keywords + 3 * shared_tags) as f64 / 10.0).min(1.0)
            }
            WeightFormula::Ratio => score,
        }
    }
}

/// Tuning for similarity discovery
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Candidates must score strictly above this
    pub threshold: f64,
    /// Keep at most this many candidates
    pub max_edges: usize,
    /// Weight of materialized edges
    pub formula: WeightFormula,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            max_edges: 10,
            formula: WeightFormula::WeightedOverlap,
        }
    }
}

/// Keywords and tags of a node, ready for set lookups
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    pub keywords: IndexSet<String>,
    pub tags: IndexSet<String>,
}

impl Fingerprint {
    /// Fingerprint of a node's title, body and tags
    pub fn of(node: &Node) -> Self {
        Self {
            keywords: extract_keywords(&node.content().searchable_text()),
            tags: node.tags().iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn size(&self) -> usize {
        self.keywords.len() + self.tags.len()
    }
}

/// Overlap between a source fingerprint and one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    pub shared_keywords: usize,
    pub shared_tags: usize,
    /// `matches / (|source keywords| + |source tags|)`, capped at 1.0
    pub score: f64,
}

/// Score a candidate against a source.
///
/// Returns `None` when they share nothing or the source has no terms.
pub fn overlap(source: &Fingerprint, candidate: &Fingerprint) -> Option<Overlap> {
    let denominator = source.size();
    if denominator == 0 {
        return None;
    }

    let shared_keywords = source
        .keywords
        .iter()
        .filter(|k| candidate.keywords.contains(*k))
        .count();
    let shared_tags = source
        .tags
        .iter()
        .filter(|t| candidate.tags.contains(*t))
        .count();

    let matches = shared_keywords + shared_tags;
    if matches == 0 {
        return None;
    }

    Some(Overlap {
        shared_keywords,
        shared_tags,
        score: (matches as f64 / denominator as f64).min(1.0),
    })
}

/// A candidate that passed the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub node_id: NodeId,
    pub overlap: Overlap,
    pub weight: f64,
}

/// Discovers and materializes `similar` edges
#[derive(Debug, Clone, Default)]
pub struct SimilarityEngine {
    config: SimilarityConfig,
}

impl SimilarityEngine {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Rank the other nodes of the graph by similarity to `source_id`.
    ///
    /// Needs every node of the graph loaded; a partial graph is refused rather
    /// than silently compared against a subset. Equal scores keep graph order.
    pub fn find_similar(
        &self,
        graph: &Graph,
        source_id: NodeId,
    ) -> GraphCommandResult<Vec<SimilarityMatch>> {
        if !graph.is_complete() {
            return Err(GraphCommandError::IncompleteGraph(graph.id()));
        }
        let source = graph
            .node(source_id)
            .ok_or(GraphCommandError::NodeNotFound(source_id))?;
        let source_print = Fingerprint::of(source);

        let mut matches: Vec<SimilarityMatch> = graph
            .nodes()
            .filter(|candidate| candidate.id() != source_id)
            .filter_map(|candidate| {
                let overlap = overlap(&source_print, &Fingerprint::of(candidate))?;
                (overlap.score > self.config.threshold).then(|| SimilarityMatch {
                    node_id: candidate.id(),
                    weight: self.config.formula.weight(
                        overlap.score,
                        overlap.shared_keywords,
                        overlap.shared_tags,
                    ),
                    overlap,
                })
            })
            .collect();

        // Stable sort keeps discovery order for ties
        matches.sort_by(|a, b| b.overlap.score.total_cmp(&a.overlap.score));
        matches.truncate(self.config.max_edges);
        Ok(matches)
    }

    /// Create `similar` edges from `source_id` to its best matches.
    ///
    /// Pairs already connected in either direction are skipped. Stops early,
    /// keeping the edges made so far, when the graph runs out of edge capacity.
    pub fn connect_similar(
        &self,
        graph: &mut Graph,
        source_id: NodeId,
    ) -> GraphCommandResult<Vec<Edge>> {
        let matches = self.find_similar(graph, source_id)?;
        let mut created = Vec::with_capacity(matches.len());

        for candidate in matches {
            if graph.edge(source_id, candidate.node_id).is_some()
                || graph.edge(candidate.node_id, source_id).is_some()
            {
                debug!(
                    source_id = %source_id,
                    target_id = %candidate.node_id,
                    "Nodes already connected, skipping similarity edge"
                );
                continue;
            }

            let mut metadata = HashMap::new();
            metadata.insert("similarity".to_string(), serde_json::json!(candidate.overlap.score));
            metadata.insert(
                "shared_keywords".to_string(),
                serde_json::json!(candidate.overlap.shared_keywords),
            );
            metadata.insert(
                "shared_tags".to_string(),
                serde_json::json!(candidate.overlap.shared_tags),
            );
            let options = EdgeOptions {
                weight: candidate.weight,
                bidirectional: true,
                metadata,
            };

            let target_id = candidate.node_id;
            match graph.connect_nodes_with(source_id, target_id, EdgeType::Similar, options) {
                Ok(edge) => {
                    debug!(
                        source_id = %source_id,
                        target_id = %target_id,
                        weight = edge.weight,
                        "Created similarity edge"
                    );
                    created.push(edge);
                }
                Err(GraphCommandError::CapacityExceeded(reason)) => {
                    warn!(
                        graph_id = %graph.id(),
                        %reason,
                        "Edge capacity reached during similarity discovery"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(created)
    }
}
