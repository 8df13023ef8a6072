//! Item key layout
//!
//! ```text
//! GRAPH#<gid>  / METADATA                      graph header   (owner: USER#<uid> / GRAPH#<gid>)
//! GRAPH#<gid>  / NODE#<nid>                    node           (owner: USER#<uid> / NODE#<nid>)
//! GRAPH#<gid>  / EDGE#<eid>                    edge
//! LOCK#<name>  / LOCK                          lock record
//! EVENT#<aid>  / <version:020>#<type>          outbox record
//!   status index: OUTBOX#<status> / <created_at>#<event_id>
//! ```

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::ItemKey;
use crate::value_objects::{EdgeId, GraphId, NodeId, UserId};

pub const METADATA_SORT: &str = "METADATA";
pub const NODE_PREFIX: &str = "NODE#";
pub const EDGE_PREFIX: &str = "EDGE#";
pub const GRAPH_PREFIX: &str = "GRAPH#";
pub const LOCK_SORT: &str = "LOCK";

pub fn graph_partition(graph_id: GraphId) -> String {
    format!("GRAPH#{graph_id}")
}

pub fn user_partition(user_id: &UserId) -> String {
    format!("USER#{user_id}")
}

pub fn graph_metadata(graph_id: GraphId) -> ItemKey {
    ItemKey::new(graph_partition(graph_id), METADATA_SORT)
}

pub fn graph_owner(user_id: &UserId, graph_id: GraphId) -> ItemKey {
    ItemKey::new(user_partition(user_id), format!("{GRAPH_PREFIX}{graph_id}"))
}

pub fn node(graph_id: GraphId, node_id: NodeId) -> ItemKey {
    ItemKey::new(graph_partition(graph_id), format!("{NODE_PREFIX}{node_id}"))
}

pub fn node_owner(user_id: &UserId, node_id: NodeId) -> ItemKey {
    ItemKey::new(user_partition(user_id), format!("{NODE_PREFIX}{node_id}"))
}

pub fn edge(graph_id: GraphId, edge_id: EdgeId) -> ItemKey {
    ItemKey::new(graph_partition(graph_id), format!("{EDGE_PREFIX}{edge_id}"))
}

pub fn lock(resource: &str) -> ItemKey {
    ItemKey::new(format!("LOCK#{resource}"), LOCK_SORT)
}

pub fn event(aggregate_id: Uuid, version: u64, event_type: &str) -> ItemKey {
    ItemKey::new(format!("EVENT#{aggregate_id}"), format!("{version:020}#{event_type}"))
}

pub fn outbox_partition(status: &str) -> String {
    format!("OUTBOX#{status}")
}

/// Status index key; sorts oldest first within a status
pub fn outbox_status(status: &str, created_at: DateTime<Utc>, event_id: Uuid) -> ItemKey {
    ItemKey::new(
        outbox_partition(status),
        format!("{}#{event_id}", created_at.format("%Y-%m-%dT%H:%M:%S%.6fZ")),
    )
}
