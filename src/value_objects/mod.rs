//! Graph value objects
//!
//! Value objects are immutable types that represent concepts in the knowledge graph domain.
//! They are compared by value rather than identity and encapsulate domain validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::commands::GraphCommandError;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = GraphCommandError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    GraphCommandError::InvalidCommand(format!(
                        "invalid {}: {s} ({e})",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

entity_id!(
    /// Identifier of a node
    NodeId
);
entity_id!(
    /// Identifier of a graph
    GraphId
);
entity_id!(
    /// Identifier of an edge
    EdgeId
);

/// Identifier of the user owning graphs and nodes.
///
/// User IDs come from the authentication layer and are opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user ID, rejecting blank values
    pub fn new(id: impl Into<String>) -> Result<Self, GraphCommandError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GraphCommandError::InvalidCommand(
                "User ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the raw string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format of a node body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// Plain text
    #[default]
    Text,
    /// Markdown
    Markdown,
    /// HTML fragment
    Html,
}

/// Textual content of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeContent {
    /// Short title
    pub title: String,
    /// Main body
    pub body: String,
    /// Body format
    #[serde(default)]
    pub format: ContentFormat,
}

impl NodeContent {
    /// Create new content
    pub fn new(title: impl Into<String>, body: impl Into<String>, format: ContentFormat) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            format,
        }
    }

    /// Plain-text content
    pub fn text(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body, ContentFormat::Text)
    }

    /// Whether both title and body are blank
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body.trim().is_empty()
    }

    /// Check content against node limits
    pub fn validate(&self, limits: &NodeLimits) -> Result<(), GraphCommandError> {
        if self.is_empty() {
            return Err(GraphCommandError::InvalidCommand(
                "Node content cannot be empty".to_string(),
            ));
        }
        if self.title.chars().count() > limits.max_title_len {
            return Err(GraphCommandError::InvalidCommand(format!(
                "Title exceeds {} characters",
                limits.max_title_len
            )));
        }
        if self.body.chars().count() > limits.max_body_len {
            return Err(GraphCommandError::InvalidCommand(format!(
                "Body exceeds {} characters",
                limits.max_body_len
            )));
        }
        Ok(())
    }

    /// Title and body joined for keyword extraction
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

/// 3D position for spatial layout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position3D {
    /// Create a new 3D position
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Check every component is finite and within bounds
    pub fn validate(&self, limits: &NodeLimits) -> Result<(), GraphCommandError> {
        let bound = limits.max_coordinate;
        for (axis, value) in [("x", self.x), ("y", self.y), ("z", self.z)] {
            if !value.is_finite() || value.abs() > bound {
                return Err(GraphCommandError::InvalidCommand(format!(
                    "Position {axis}={value} is outside ±{bound}"
                )));
            }
        }
        Ok(())
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Newly created, editable
    #[default]
    Draft,
    /// Visible to readers, still editable
    Published,
    /// Terminal; immutable except for deletion
    Archived,
}

impl NodeStatus {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Draft => "draft",
            NodeStatus::Published => "published",
            NodeStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents different types of edges in a knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// One node cites or mentions another
    #[default]
    Reference,
    /// Hierarchical containment
    ParentChild,
    /// Lexically related content
    Similar,
    /// Reading or process order
    Sequential,
}

impl EdgeType {
    /// Get the string representation of the edge type
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Reference => "reference",
            EdgeType::ParentChild => "parent_child",
            EdgeType::Similar => "similar",
            EdgeType::Sequential => "sequential",
        }
    }
}

impl FromStr for EdgeType {
    type Err = GraphCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reference" => Ok(EdgeType::Reference),
            "parent_child" | "parent-child" => Ok(EdgeType::ParentChild),
            "similar" => Ok(EdgeType::Similar),
            "sequential" => Ok(EdgeType::Sequential),
            other => Err(GraphCommandError::InvalidCommand(format!(
                "Unknown edge type: {other}"
            ))),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key for edges: the ordered (source, target) pair.
///
/// Edge type is deliberately not part of the key, so a pair can hold at most
/// one edge regardless of type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
}

impl EdgeKey {
    /// Build the key for a directed pair
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// Size bounds for a single graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphLimits {
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_nodes: 10_000,
            max_edges: 50_000,
        }
    }
}

/// Validation bounds for node attributes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLimits {
    pub max_tags: usize,
    pub max_tag_len: usize,
    pub max_title_len: usize,
    pub max_body_len: usize,
    pub max_coordinate: f64,
}

impl Default for NodeLimits {
    fn default() -> Self {
        Self {
            max_tags: 20,
            max_tag_len: 50,
            max_title_len: 200,
            max_body_len: 50_000,
            max_coordinate: 1_000_000.0,
        }
    }
}

/// Normalize and validate a tag list: trimmed, lowercased, deduplicated in order.
pub fn normalize_tags(
    tags: impl IntoIterator<Item = impl AsRef<str>>,
    limits: &NodeLimits,
) -> Result<Vec<String>, GraphCommandError> {
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if tag.is_empty() {
            return Err(GraphCommandError::InvalidCommand(
                "Tags cannot be empty".to_string(),
            ));
        }
        if tag.chars().count() > limits.max_tag_len {
            return Err(GraphCommandError::InvalidCommand(format!(
                "Tag '{tag}' exceeds {} characters",
                limits.max_tag_len
            )));
        }
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    if normalized.len() > limits.max_tags {
        return Err(GraphCommandError::InvalidCommand(format!(
            "Too many tags: {} (max {})",
            normalized.len(),
            limits.max_tags
        )));
    }
    Ok(normalized)
}
