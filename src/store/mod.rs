//! Persistence for the path graph.
//!
//! A [`GraphStore`] keeps node records keyed by [`NodeKey`] and edge records
//! keyed by the ordered endpoint pair. Writes go through [`GraphStore::flush`],
//! which commits a whole [`GraphDelta`] or nothing.

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::error::StoreError;
use crate::graph::{GraphDelta, GraphSnapshot, HopEdge, HopNode};

/// Backend holding the persisted path graph
pub trait GraphStore: Send + Sync {
    /// Commit a batch of node and edge upserts as one unit.
    ///
    /// Nodes are written before edges. Every edge endpoint must be in the
    /// batch or already persisted, otherwise the whole batch is rejected
    /// with [`StoreError::DanglingEdge`].
    fn flush(&self, delta: &GraphDelta) -> Result<(), StoreError>;

    /// Read every node and edge from one consistent view
    fn load_all(&self) -> Result<GraphSnapshot, StoreError>;

    /// Atomically swap the whole persisted graph for `snapshot`
    fn replace(&self, snapshot: &GraphSnapshot) -> Result<(), StoreError>;

    fn upsert_node(&self, node: &HopNode) -> Result<(), StoreError> {
        self.flush(&GraphDelta {
            nodes: vec![node.clone()],
            edges: Vec::new(),
        })
    }

    fn upsert_edge(&self, edge: &HopEdge) -> Result<(), StoreError> {
        self.flush(&GraphDelta {
            nodes: Vec::new(),
            edges: vec![edge.clone()],
        })
    }
}

/// Storage key of an edge record
pub(crate) fn edge_record_key(edge: &HopEdge) -> String {
    format!("{}>{}", edge.from, edge.to)
}
