//! Error types for the path graph engine.
//!
//! Each boundary has its own error enum so callers can tell recoverable
//! per-domain failures (probe, geo) apart from run-terminating ones
//! (store, exchange).

use thiserror::Error;

use crate::graph::{EdgeKey, NodeKey};

/// Failures of a [`HopProbe`](crate::probe::HopProbe) run for one domain.
///
/// None of these abort a multi-domain run; the affected domain is reported
/// as failed and the others continue.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The domain could not be resolved to an address.
    #[error("failed to resolve {domain}: {reason}")]
    Resolve { domain: String, reason: String },

    /// The probing facility is missing or could not be started.
    #[error("probe unavailable: {0}")]
    Unavailable(String),

    /// The probe did not finish within its time budget.
    #[error("probe timed out")]
    Timeout,

    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a [`GeoAnnotator`](crate::lookup::GeoAnnotator) lookup.
///
/// Always recovered as "unknown location" on the affected node.
#[derive(Debug, Error)]
pub enum GeoError {
    /// The provider has no location for this address.
    #[error("location unknown")]
    Unknown,

    #[error("geolocation lookup timed out")]
    Timeout,

    #[error("geolocation request failed: {0}")]
    Request(String),
}

/// Failures of a [`GraphStore`](crate::store::GraphStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached or refused the write. Retryable.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    /// A persisted record could not be decoded.
    #[error("graph store record corrupt: {0}")]
    Corrupt(String),

    /// A batch contained an edge whose endpoint is neither in the batch nor
    /// already persisted.
    #[error("edge {edge} references unknown node {missing}")]
    DanglingEdge { edge: EdgeKey, missing: NodeKey },
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Structural violations found while assembling a graph from records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrityError {
    #[error("duplicate node {0}")]
    DuplicateNode(NodeKey),

    #[error("duplicate edge {0}")]
    DuplicateEdge(EdgeKey),

    #[error("edge {edge} references unknown node {missing}")]
    UnknownEndpoint { edge: EdgeKey, missing: NodeKey },

    #[error("edge {0} is a self loop")]
    SelfLoop(EdgeKey),

    #[error("edge {edge} carries {len} latency samples (window is {window})")]
    LatencyWindow {
        edge: EdgeKey,
        len: usize,
        window: usize,
    },

    #[error("invalid domain name {0:?}")]
    InvalidDomain(String),

    #[error("node {key} has invalid coordinates: {reason}")]
    Coordinates { key: NodeKey, reason: String },
}

/// Failures of document import/export.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The document is malformed or violates graph integrity. The import is
    /// rejected as a whole.
    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("document I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of importing a document into a store.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The document was rejected; the store was not written.
    #[error(transparent)]
    Document(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IntegrityError> for ExchangeError {
    fn from(err: IntegrityError) -> Self {
        ExchangeError::Corrupt(err.to_string())
    }
}
