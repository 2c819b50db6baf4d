//! GeoJSON rendering of the located part of a graph.
//!
//! Located hop nodes become Point features; a node with no outgoing edge is
//! flagged `terminal`. Edges whose endpoints are both located become
//! LineString features. Coordinates are `[longitude, latitude]`.

use serde_json::{Value, json};
use std::collections::HashSet;
use std::io::Write;

use crate::graph::{NodeKey, PathGraph};

/// Build a FeatureCollection for `graph`
pub fn to_geojson(graph: &PathGraph) -> Value {
    let sources: HashSet<&NodeKey> = graph.edges().map(|e| &e.from).collect();
    let mut features = Vec::new();

    for node in graph.nodes() {
        let Some((lat, lon)) = node.coordinates() else {
            continue;
        };
        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [lon, lat] },
            "properties": {
                "key": node.key.to_string(),
                "hostname": node.hostname,
                "city": node.city,
                "country": node.country,
                "observationCount": node.observation_count,
                "lastSeen": node.last_seen,
                "terminal": !sources.contains(&node.key),
            },
        }));
    }

    for edge in graph.edges() {
        let from = graph.node(&edge.from).and_then(|n| n.coordinates());
        let to = graph.node(&edge.to).and_then(|n| n.coordinates());
        let (Some((lat1, lon1)), Some((lat2, lon2))) = (from, to) else {
            continue;
        };
        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "LineString", "coordinates": [[lon1, lat1], [lon2, lat2]] },
            "properties": {
                "from": edge.from.to_string(),
                "to": edge.to.to_string(),
                "domains": edge.domains,
                "meanLatencyMs": edge.mean_latency_ms(),
                "skippedHops": edge.skipped_hops,
            },
        }));
    }

    json!({ "type": "FeatureCollection", "features": features })
}

/// Write the FeatureCollection as pretty-printed JSON
pub fn write_geojson<W: Write>(graph: &PathGraph, mut writer: W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, &to_geojson(graph))?;
    writeln!(writer)?;
    writer.flush()
}
