//! Graph aggregates

mod edge;
mod graph;
mod node;

pub use edge::*;
pub use graph::*;
pub use node::*;
