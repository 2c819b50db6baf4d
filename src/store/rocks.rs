//! RocksDB-backed graph store.
//!
//! Two column families hold the graph: `nodes` keyed by the node key string
//! and `edges` keyed by `"<from>><to>"`. Values are JSON records. Every flush
//! and replace is a single `WriteBatch`, so a failed write leaves nothing
//! behind.

use rocksdb::{ColumnFamily, DB, IteratorMode, Options, WriteBatch};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{GraphStore, edge_record_key};
use crate::error::StoreError;
use crate::graph::{GraphDelta, GraphSnapshot, HopEdge, HopNode, NodeKey};

const CF_NODES: &str = "nodes";
const CF_EDGES: &str = "edges";

/// Graph store persisted in a RocksDB directory
pub struct RocksStore {
    db: DB,
    path: PathBuf,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore").field("path", &self.path).finish()
    }
}

impl RocksStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, &path, [CF_NODES, CF_EDGES]).map_err(|e| {
            StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "opened graph store");

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Corrupt(format!("column family {} missing", name)))
    }

    fn node_persisted(&self, key: &NodeKey) -> Result<bool, StoreError> {
        let found = self
            .db
            .get_pinned_cf(self.cf(CF_NODES)?, key.to_string())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(found.is_some())
    }

    fn put_node(&self, batch: &mut WriteBatch, node: &HopNode) -> Result<(), StoreError> {
        let value = serde_json::to_vec(node).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        batch.put_cf(self.cf(CF_NODES)?, node.key.to_string(), value);
        Ok(())
    }

    fn put_edge(&self, batch: &mut WriteBatch, edge: &HopEdge) -> Result<(), StoreError> {
        let value = serde_json::to_vec(edge).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        batch.put_cf(self.cf(CF_EDGES)?, edge_record_key(edge), value);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn decode<T: DeserializeOwned>(
    item: Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>,
) -> Result<T, StoreError> {
    let (key, value) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
    serde_json::from_slice(&value).map_err(|e| {
        StoreError::Corrupt(format!("{}: {}", String::from_utf8_lossy(&key), e))
    })
}

impl GraphStore for RocksStore {
    fn flush(&self, delta: &GraphDelta) -> Result<(), StoreError> {
        if delta.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        for node in &delta.nodes {
            self.put_node(&mut batch, node)?;
        }
        for edge in &delta.edges {
            for endpoint in [&edge.from, &edge.to] {
                let in_batch = delta.nodes.iter().any(|n| &n.key == endpoint);
                if !in_batch && !self.node_persisted(endpoint)? {
                    return Err(StoreError::DanglingEdge {
                        edge: edge.key(),
                        missing: endpoint.clone(),
                    });
                }
            }
            self.put_edge(&mut batch, edge)?;
        }

        debug!(
            nodes = delta.nodes.len(),
            edges = delta.edges.len(),
            "flushing graph delta"
        );
        self.write(batch)
    }

    fn load_all(&self) -> Result<GraphSnapshot, StoreError> {
        let view = self.db.snapshot();

        let nodes = view
            .iterator_cf(self.cf(CF_NODES)?, IteratorMode::Start)
            .map(decode::<HopNode>)
            .collect::<Result<Vec<_>, _>>()?;
        let edges = view
            .iterator_cf(self.cf(CF_EDGES)?, IteratorMode::Start)
            .map(decode::<HopEdge>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(GraphSnapshot { nodes, edges })
    }

    fn replace(&self, snapshot: &GraphSnapshot) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();

        for cf_name in [CF_EDGES, CF_NODES] {
            let cf = self.cf(cf_name)?;
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, _) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
                batch.delete_cf(cf, key);
            }
        }

        for node in &snapshot.nodes {
            self.put_node(&mut batch, node)?;
        }
        for edge in &snapshot.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !snapshot.nodes.iter().any(|n| &n.key == endpoint) {
                    return Err(StoreError::DanglingEdge {
                        edge: edge.key(),
                        missing: endpoint.clone(),
                    });
                }
            }
            self.put_edge(&mut batch, edge)?;
        }

        debug!(
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            "replacing graph store contents"
        );
        self.write(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AnnotatedHop, GeoPoint, PathGraph};
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tempfile::TempDir;

    fn hop(ttl: u8, last: u8) -> AnnotatedHop {
        AnnotatedHop::responded(
            ttl,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            Duration::from_micros(1500),
        )
    }

    fn sample_graph() -> PathGraph {
        let mut graph = PathGraph::new();
        graph
            .merge_at(
                "a.com",
                Some(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))),
                &[
                    hop(1, 1).with_geo(GeoPoint::new(37.751, -97.822)),
                    AnnotatedHop::unresponsive(2),
                    hop(3, 3),
                ],
                Utc::now(),
            )
            .unwrap();
        graph.merge_at("b.com", None, &[hop(1, 1), hop(2, 4)], Utc::now()).unwrap();
        graph
    }

    fn sorted(mut snap: GraphSnapshot) -> GraphSnapshot {
        snap.nodes.sort_by(|a, b| a.key.cmp(&b.key));
        snap.edges.sort_by(|a, b| a.key().cmp(&b.key()));
        snap
    }

    #[test]
    fn test_flush_and_reload_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.db");
        let graph = sample_graph();

        {
            let store = RocksStore::open(&path).unwrap();
            store.replace(&graph.snapshot()).unwrap();
        }

        let store = RocksStore::open(&path).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(sorted(loaded.clone()), sorted(graph.snapshot()));

        let rebuilt = PathGraph::from_snapshot(loaded).unwrap();
        assert_eq!(rebuilt.stats(), graph.stats());
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path().join("graph.db")).unwrap();

        let mut graph = PathGraph::new();
        let delta = graph.merge_at("a.com", None, &[hop(1, 1), hop(2, 2)], Utc::now()).unwrap();
        store.flush(&delta).unwrap();
        store.flush(&delta).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.nodes.len(), 3);
        assert_eq!(loaded.edges.len(), 2);
    }

    #[test]
    fn test_dangling_edge_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path().join("graph.db")).unwrap();

        let mut graph = PathGraph::new();
        let mut delta = graph.merge_at("a.com", None, &[hop(1, 1), hop(2, 2)], Utc::now()).unwrap();
        delta.nodes.retain(|n| n.key.to_string() != "10.0.0.2");

        let err = store.flush(&delta).unwrap_err();
        assert!(matches!(err, StoreError::DanglingEdge { .. }));
        assert!(store.load_all().unwrap().nodes.is_empty());
    }

    #[test]
    fn test_replace_drops_previous_records() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path().join("graph.db")).unwrap();
        store.replace(&sample_graph().snapshot()).unwrap();

        let mut small = PathGraph::new();
        small.merge_at("c.com", None, &[hop(1, 7)], Utc::now()).unwrap();
        store.replace(&small.snapshot()).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(sorted(loaded), sorted(small.snapshot()));
    }
}
