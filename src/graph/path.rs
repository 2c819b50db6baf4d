//! The path graph: every hop and next-hop adjacency seen across all probes.
//!
//! Nodes and edges live in key-indexed maps, so folding the same probe
//! output in twice updates counters and timestamps instead of duplicating
//! entities. Insertion order is kept for stable enumeration.

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

use super::key::{EdgeKey, NodeKey, checked_domain};
use super::types::{AnnotatedHop, HopEdge, HopNode, HopObservation, LATENCY_WINDOW};
use crate::error::IntegrityError;

/// Nodes and edges touched by one merge, in the order they must be persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    pub nodes: Vec<HopNode>,
    pub edges: Vec<HopEdge>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }
}

/// Full contents of a graph as plain records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<HopNode>,
    pub edges: Vec<HopEdge>,
}

/// Summary counts for a graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Hop nodes (domain roots excluded)
    pub hops: usize,
    pub domains: usize,
    pub edges: usize,
    /// Hop nodes with known coordinates
    pub located: usize,
}

/// Result of a prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub nodes_removed: usize,
    pub edges_removed: usize,
}

/// In-memory path graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathGraph {
    nodes: IndexMap<NodeKey, HopNode>,
    edges: IndexMap<EdgeKey, HopEdge>,
}

impl PathGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from records, nodes first, then edges.
    ///
    /// Rejects duplicate keys, edges whose endpoints are not among `nodes`,
    /// over-long latency windows and malformed coordinates.
    pub fn from_parts(nodes: Vec<HopNode>, edges: Vec<HopEdge>) -> Result<Self, IntegrityError> {
        let mut graph = PathGraph::new();

        for node in nodes {
            validate_coordinates(&node)?;
            if graph.nodes.contains_key(&node.key) {
                return Err(IntegrityError::DuplicateNode(node.key));
            }
            graph.nodes.insert(node.key.clone(), node);
        }

        for edge in edges {
            let key = edge.key();
            for endpoint in [&edge.from, &edge.to] {
                if !graph.nodes.contains_key(endpoint) {
                    return Err(IntegrityError::UnknownEndpoint {
                        missing: endpoint.clone(),
                        edge: key,
                    });
                }
            }
            if edge.from == edge.to {
                return Err(IntegrityError::SelfLoop(key));
            }
            if edge.latency_samples.len() > LATENCY_WINDOW {
                return Err(IntegrityError::LatencyWindow {
                    len: edge.latency_samples.len(),
                    window: LATENCY_WINDOW,
                    edge: key,
                });
            }
            if graph.edges.contains_key(&key) {
                return Err(IntegrityError::DuplicateEdge(key));
            }
            graph.edges.insert(key, edge);
        }

        Ok(graph)
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self, IntegrityError> {
        Self::from_parts(snapshot.nodes, snapshot.edges)
    }

    /// Copy every node and edge out, in insertion order
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    pub fn node(&self, key: &NodeKey) -> Option<&HopNode> {
        self.nodes.get(key)
    }

    pub fn edge(&self, from: &NodeKey, to: &NodeKey) -> Option<&HopEdge> {
        self.edges.get(&EdgeKey::new(from.clone(), to.clone()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HopNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &HopEdge> {
        self.edges.values()
    }

    /// Edges leaving `key`
    pub fn outgoing<'a>(&'a self, key: &'a NodeKey) -> impl Iterator<Item = &'a HopEdge> + 'a {
        self.edges.values().filter(move |e| &e.from == key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            edges: self.edges.len(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            if node.is_domain_root() {
                stats.domains += 1;
            } else {
                stats.hops += 1;
                if node.coordinates().is_some() {
                    stats.located += 1;
                }
            }
        }
        stats
    }

    /// Fold one domain's annotated hop sequence into the graph, stamped now
    pub fn merge(
        &mut self,
        domain: &str,
        hops: &[AnnotatedHop],
    ) -> Result<GraphDelta, IntegrityError> {
        self.merge_at(domain, None, hops, Utc::now())
    }

    /// Fold one domain's annotated hop sequence into the graph.
    ///
    /// The chain starts at the domain root. Unresponsive hops create no node;
    /// the next responding hop is linked to the last responding one and the
    /// edge records how many hops were skipped. A node's observation count
    /// rises at most once per call even if its address repeats in `hops`.
    ///
    /// A domain that normalizes to an empty name or contains whitespace is
    /// rejected before anything is touched.
    pub fn merge_at(
        &mut self,
        domain: &str,
        target: Option<IpAddr>,
        hops: &[AnnotatedHop],
        now: DateTime<Utc>,
    ) -> Result<GraphDelta, IntegrityError> {
        let domain_name =
            checked_domain(domain).map_err(|_| IntegrityError::InvalidDomain(domain.to_string()))?;
        let root = NodeKey::Domain(domain_name.clone());

        let mut touched_nodes: IndexSet<NodeKey> = IndexSet::new();
        let mut touched_edges: IndexSet<EdgeKey> = IndexSet::new();

        let root_node = self
            .nodes
            .entry(root.clone())
            .or_insert_with(|| HopNode::new(root.clone(), now));
        root_node.observe(now);
        if target.is_some() {
            root_node.target = target;
        }
        touched_nodes.insert(root.clone());

        let mut seen: HashSet<NodeKey> = HashSet::new();
        seen.insert(root.clone());
        let mut prev = root;
        let mut skipped: u32 = 0;

        for hop in hops {
            let (addr, hostname, rtt) = match &hop.observation {
                HopObservation::Unresponsive { .. } => {
                    skipped += 1;
                    continue;
                }
                HopObservation::Responded {
                    addr, hostname, rtt, ..
                } => (*addr, hostname, *rtt),
            };

            let key = NodeKey::Addr(addr);
            // Same responder twice in a row is one hop, not a self loop
            if key == prev {
                skipped = 0;
                continue;
            }

            let node = self
                .nodes
                .entry(key.clone())
                .or_insert_with(|| HopNode::new(key.clone(), now));
            if seen.insert(key.clone()) {
                node.observe(now);
            } else {
                node.touch(now);
            }
            if let Some(name) = hostname {
                node.hostname = Some(name.clone());
            }
            if let Some(geo) = &hop.geo {
                node.set_location(geo);
            }
            touched_nodes.insert(key.clone());

            let edge_key = EdgeKey::new(prev.clone(), key.clone());
            let edge = self
                .edges
                .entry(edge_key.clone())
                .or_insert_with(|| HopEdge::new(prev.clone(), key.clone(), now));
            edge.record(&domain_name, rtt, skipped, now);
            touched_edges.insert(edge_key);

            prev = key;
            skipped = 0;
        }

        Ok(self.collect_delta(&touched_nodes, &touched_edges))
    }

    /// Current state of the given keys, with every edge endpoint included
    fn collect_delta(&self, nodes: &IndexSet<NodeKey>, edges: &IndexSet<EdgeKey>) -> GraphDelta {
        let mut node_keys = nodes.clone();
        for key in edges {
            node_keys.insert(key.from.clone());
            node_keys.insert(key.to.clone());
        }

        GraphDelta {
            nodes: node_keys
                .iter()
                .filter_map(|k| self.nodes.get(k).cloned())
                .collect(),
            edges: edges
                .iter()
                .filter_map(|k| self.edges.get(k).cloned())
                .collect(),
        }
    }

    /// Remove everything last seen before `older_than`.
    ///
    /// Removing a node also removes every edge touching it.
    pub fn prune(&mut self, older_than: DateTime<Utc>) -> PruneReport {
        let nodes_before = self.nodes.len();
        let edges_before = self.edges.len();

        self.nodes.retain(|_, node| node.last_seen >= older_than);

        let nodes = &self.nodes;
        self.edges.retain(|_, edge| {
            edge.last_seen >= older_than
                && nodes.contains_key(&edge.from)
                && nodes.contains_key(&edge.to)
        });

        PruneReport {
            nodes_removed: nodes_before - self.nodes.len(),
            edges_removed: edges_before - self.edges.len(),
        }
    }
}

fn validate_coordinates(node: &HopNode) -> Result<(), IntegrityError> {
    let invalid = |reason: &str| IntegrityError::Coordinates {
        key: node.key.clone(),
        reason: reason.to_string(),
    };

    match (node.latitude, node.longitude) {
        (None, None) => Ok(()),
        (Some(_), None) | (None, Some(_)) => Err(invalid("latitude and longitude must come together")),
        (Some(lat), Some(lon)) => {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return Err(invalid("latitude out of range"));
            }
            if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                return Err(invalid("longitude out of range"));
            }
            Ok(())
        }
    }
}
