//! In-process graph store.
//!
//! Batches are staged on a copy and swapped in only when every write in the
//! batch succeeded. Faults can be injected to exercise retry and atomicity.

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::GraphStore;
use crate::error::StoreError;
use crate::graph::{EdgeKey, GraphDelta, GraphSnapshot, HopEdge, HopNode, NodeKey};

#[derive(Debug, Default, Clone)]
struct Tables {
    nodes: IndexMap<NodeKey, HopNode>,
    edges: IndexMap<EdgeKey, HopEdge>,
}

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    /// Fail the next N commits outright
    fail_next: usize,
    /// Fail once this many record writes have been staged
    fail_after_writes: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    faults: Faults,
    commits: usize,
}

/// Graph store kept in memory, with fault injection
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `snapshot`
    pub fn with_snapshot(snapshot: &GraphSnapshot) -> Result<Self, StoreError> {
        let store = Self::new();
        store.replace(snapshot)?;
        Ok(store)
    }

    /// While offline every operation fails with [`StoreError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().faults.offline = offline;
    }

    /// Make the next `count` commits fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().faults.fail_next = count;
    }

    /// Make the next commit fail after `writes` records have been staged.
    /// The staged records are discarded.
    pub fn fail_after(&self, writes: usize) {
        self.inner.lock().faults.fail_after_writes = Some(writes);
    }

    /// Number of successful commits
    pub fn commits(&self) -> usize {
        self.inner.lock().commits
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().tables.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.lock().tables.edges.len()
    }

    /// Check the one-shot faults for a commit attempt
    fn check_commit(faults: &mut Faults) -> Result<(), StoreError> {
        if faults.offline {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        Ok(())
    }
}

impl GraphStore for MemoryStore {
    fn flush(&self, delta: &GraphDelta) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_commit(&mut inner.faults)?;

        let limit = inner.faults.fail_after_writes.take();
        let mut staged = inner.tables.clone();
        let mut writes = 0usize;
        let mut write = || -> Result<(), StoreError> {
            if limit.is_some_and(|n| writes >= n) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure after {} writes",
                    writes
                )));
            }
            writes += 1;
            Ok(())
        };

        for node in &delta.nodes {
            write()?;
            staged.nodes.insert(node.key.clone(), node.clone());
        }
        for edge in &delta.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !staged.nodes.contains_key(endpoint) {
                    return Err(StoreError::DanglingEdge {
                        edge: edge.key(),
                        missing: endpoint.clone(),
                    });
                }
            }
            write()?;
            staged.edges.insert(edge.key(), edge.clone());
        }

        inner.tables = staged;
        inner.commits += 1;
        Ok(())
    }

    fn load_all(&self) -> Result<GraphSnapshot, StoreError> {
        let inner = self.inner.lock();
        if inner.faults.offline {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(GraphSnapshot {
            nodes: inner.tables.nodes.values().cloned().collect(),
            edges: inner.tables.edges.values().cloned().collect(),
        })
    }

    fn replace(&self, snapshot: &GraphSnapshot) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_commit(&mut inner.faults)?;

        let mut tables = Tables::default();
        for node in &snapshot.nodes {
            tables.nodes.insert(node.key.clone(), node.clone());
        }
        for edge in &snapshot.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !tables.nodes.contains_key(endpoint) {
                    return Err(StoreError::DanglingEdge {
                        edge: edge.key(),
                        missing: endpoint.clone(),
                    });
                }
            }
            tables.edges.insert(edge.key(), edge.clone());
        }

        inner.tables = tables;
        inner.commits += 1;
        Ok(())
    }
}
