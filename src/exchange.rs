//! Graph interchange documents.
//!
//! A document is a versioned JSON object with two ordered collections,
//! `nodes` then `edges`. Import is all-or-nothing: any malformed record or
//! integrity violation rejects the whole document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::ExchangeError;
use crate::graph::{HopEdge, HopNode, PathGraph};

/// Current document format version
pub const DOCUMENT_VERSION: u32 = 1;

/// Largest document accepted by [`read_document`]
pub const MAX_DOCUMENT_BYTES: u64 = 256 * 1024 * 1024;

/// Serialized form of a whole path graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub nodes: Vec<HopNode>,
    pub edges: Vec<HopEdge>,
}

/// Capture every node and edge of `graph` in its enumeration order
pub fn export(graph: &PathGraph) -> Document {
    let snapshot = graph.snapshot();
    Document {
        version: DOCUMENT_VERSION,
        exported_at: Utc::now(),
        nodes: snapshot.nodes,
        edges: snapshot.edges,
    }
}

/// Build a graph from a document, nodes first, then edges
pub fn import(document: Document) -> Result<PathGraph, ExchangeError> {
    if document.version != DOCUMENT_VERSION {
        return Err(ExchangeError::Corrupt(format!(
            "unsupported document version {} (expected {})",
            document.version, DOCUMENT_VERSION
        )));
    }
    Ok(PathGraph::from_parts(document.nodes, document.edges)?)
}

/// Replace `target` with the document's graph. On error `target` is untouched.
pub fn import_into(target: &mut PathGraph, document: Document) -> Result<(), ExchangeError> {
    *target = import(document)?;
    Ok(())
}

/// Write a document as pretty-printed JSON
pub fn write_document<W: Write>(mut writer: W, document: &Document) -> Result<(), ExchangeError> {
    serde_json::to_writer_pretty(&mut writer, document).map_err(|e| {
        if e.is_io() {
            ExchangeError::Io(e.into())
        } else {
            ExchangeError::Corrupt(e.to_string())
        }
    })?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read a document, refusing inputs larger than [`MAX_DOCUMENT_BYTES`]
pub fn read_document<R: Read>(reader: R) -> Result<Document, ExchangeError> {
    let mut buf = Vec::new();
    reader.take(MAX_DOCUMENT_BYTES + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > MAX_DOCUMENT_BYTES {
        return Err(ExchangeError::Corrupt(format!(
            "document exceeds {} bytes",
            MAX_DOCUMENT_BYTES
        )));
    }
    serde_json::from_slice(&buf).map_err(|e| ExchangeError::Corrupt(e.to_string()))
}
