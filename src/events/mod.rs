//! Graph domain event payloads

mod graph_events;

pub use graph_events::*;
