// Public API - graph model, persistence and interchange
pub mod error;
pub mod exchange;
pub mod export;
pub mod graph;
pub mod store;

// Collaborators and orchestration
pub mod cli;
pub mod config;
pub mod lookup;
pub mod pipeline;
pub mod probe;

pub use error::{ExchangeError, GeoError, ImportError, IntegrityError, ProbeError, StoreError};
pub use graph::{AnnotatedHop, GeoPoint, HopEdge, HopNode, HopObservation, NodeKey, PathGraph};
pub use pipeline::{Analyzer, AnalyzerOptions, DomainOutcome, DomainStatus, RunSummary};
pub use store::{GraphStore, MemoryStore, RocksStore};
