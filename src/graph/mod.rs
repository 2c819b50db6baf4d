mod key;
mod path;
mod types;

pub use key::{EdgeKey, KeyParseError, NodeKey, checked_domain, normalize_domain};
pub use path::{GraphDelta, GraphSnapshot, GraphStats, PathGraph, PruneReport};
pub use types::{AnnotatedHop, GeoPoint, HopEdge, HopNode, HopObservation, LATENCY_WINDOW};
