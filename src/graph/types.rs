use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use super::key::{EdgeKey, NodeKey};

/// Number of recent latency samples kept per edge
pub const LATENCY_WINDOW: usize = 8;

/// Approximate location of an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            city: None,
            country: None,
        }
    }
}

/// One raw hop as reported by a probe
#[derive(Debug, Clone, PartialEq)]
pub enum HopObservation {
    /// A responder answered at this distance
    Responded {
        ttl: u8,
        addr: IpAddr,
        hostname: Option<String>,
        rtt: Option<Duration>,
    },
    /// No answer at this distance (timeout or filtered)
    Unresponsive { ttl: u8 },
}

impl HopObservation {
    pub fn ttl(&self) -> u8 {
        match self {
            HopObservation::Responded { ttl, .. } | HopObservation::Unresponsive { ttl } => *ttl,
        }
    }

    pub fn addr(&self) -> Option<IpAddr> {
        match self {
            HopObservation::Responded { addr, .. } => Some(*addr),
            HopObservation::Unresponsive { .. } => None,
        }
    }
}

/// A hop observation enriched with its geolocation (if known)
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedHop {
    pub observation: HopObservation,
    pub geo: Option<GeoPoint>,
}

impl AnnotatedHop {
    pub fn responded(ttl: u8, addr: IpAddr, rtt: Duration) -> Self {
        Self {
            observation: HopObservation::Responded {
                ttl,
                addr,
                hostname: None,
                rtt: Some(rtt),
            },
            geo: None,
        }
    }

    pub fn unresponsive(ttl: u8) -> Self {
        Self {
            observation: HopObservation::Unresponsive { ttl },
            geo: None,
        }
    }

    pub fn with_geo(mut self, geo: GeoPoint) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_hostname(mut self, name: &str) -> Self {
        if let HopObservation::Responded { hostname, .. } = &mut self.observation {
            *hostname = Some(name.to_string());
        }
        self
    }
}

/// A network hop (or domain root) in the path graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopNode {
    pub key: NodeKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Resolved address of the domain (domain roots only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<IpAddr>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of probe runs that observed this node
    pub observation_count: u64,
}

impl HopNode {
    pub fn new(key: NodeKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            hostname: None,
            latitude: None,
            longitude: None,
            city: None,
            country: None,
            target: None,
            first_seen: now,
            last_seen: now,
            observation_count: 0,
        }
    }

    pub fn is_domain_root(&self) -> bool {
        self.key.is_domain()
    }

    /// Count one more probe run and refresh last-seen
    pub fn observe(&mut self, now: DateTime<Utc>) {
        self.observation_count += 1;
        self.touch(now);
    }

    /// Refresh last-seen without counting a run
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// Latitude/longitude pair when both are known
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Overwrite the location (last write wins)
    pub fn set_location(&mut self, geo: &GeoPoint) {
        self.latitude = Some(geo.latitude);
        self.longitude = Some(geo.longitude);
        self.city = geo.city.clone();
        self.country = geo.country.clone();
    }
}

/// Directed "next hop" relation between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopEdge {
    #[serde(rename = "fromKey")]
    pub from: NodeKey,
    #[serde(rename = "toKey")]
    pub to: NodeKey,
    /// Domains whose probes produced this edge
    pub domains: BTreeSet<String>,
    /// Most recent round-trip samples to `to`, in milliseconds, oldest first
    pub latency_samples: VecDeque<f64>,
    pub last_seen: DateTime<Utc>,
    /// Unresponsive hops between `from` and `to` on the latest observation
    pub skipped_hops: u32,
}

impl HopEdge {
    pub fn new(from: NodeKey, to: NodeKey, now: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            domains: BTreeSet::new(),
            latency_samples: VecDeque::with_capacity(LATENCY_WINDOW),
            last_seen: now,
            skipped_hops: 0,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from.clone(), self.to.clone())
    }

    /// Fold one observation of this adjacency into the edge
    pub fn record(
        &mut self,
        domain: &str,
        rtt: Option<Duration>,
        skipped_hops: u32,
        now: DateTime<Utc>,
    ) {
        if !self.domains.contains(domain) {
            self.domains.insert(domain.to_string());
        }
        if let Some(rtt) = rtt {
            self.latency_samples.push_back(rtt.as_micros() as f64 / 1000.0);
            while self.latency_samples.len() > LATENCY_WINDOW {
                self.latency_samples.pop_front();
            }
        }
        self.skipped_hops = skipped_hops;
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// Mean of the retained latency samples
    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.latency_samples.is_empty() {
            None
        } else {
            Some(self.latency_samples.iter().sum::<f64>() / self.latency_samples.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_node_observe_counts_and_refreshes() {
        let mut node = HopNode::new("10.0.0.1".parse().unwrap(), t(0));
        assert_eq!(node.observation_count, 0);

        node.observe(t(10));
        node.observe(t(20));
        assert_eq!(node.observation_count, 2);
        assert_eq!(node.first_seen, t(0));
        assert_eq!(node.last_seen, t(20));

        // Older timestamps never move last-seen backwards
        node.touch(t(5));
        assert_eq!(node.last_seen, t(20));
    }

    #[test]
    fn test_node_location_last_write_wins() {
        let mut node = HopNode::new("10.0.0.1".parse().unwrap(), t(0));
        assert_eq!(node.coordinates(), None);

        node.set_location(&GeoPoint {
            latitude: 37.386,
            longitude: -122.0838,
            city: Some("Mountain View".into()),
            country: Some("US".into()),
        });
        node.set_location(&GeoPoint::new(52.52, 13.405));

        assert_eq!(node.coordinates(), Some((52.52, 13.405)));
        assert_eq!(node.city, None);
    }

    #[test]
    fn test_edge_latency_window_is_bounded() {
        let mut edge = HopEdge::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            t(0),
        );

        for ms in 1..=(LATENCY_WINDOW as u64 + 3) {
            edge.record("a.com", Some(Duration::from_millis(ms)), 0, t(ms as i64));
        }

        assert_eq!(edge.latency_samples.len(), LATENCY_WINDOW);
        // Oldest samples were dropped
        assert_eq!(edge.latency_samples.front().copied(), Some(4.0));
        assert_eq!(
            edge.latency_samples.back().copied(),
            Some((LATENCY_WINDOW + 3) as f64)
        );
    }

    #[test]
    fn test_edge_record_unions_domains() {
        let mut edge = HopEdge::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            t(0),
        );
        edge.record("b.com", None, 1, t(1));
        edge.record("a.com", None, 0, t(2));
        edge.record("b.com", None, 0, t(3));

        let domains: Vec<_> = edge.domains.iter().cloned().collect();
        assert_eq!(domains, vec!["a.com".to_string(), "b.com".to_string()]);
        assert!(edge.latency_samples.is_empty());
        assert_eq!(edge.mean_latency_ms(), None);
        assert_eq!(edge.skipped_hops, 0);
    }

    #[test]
    fn test_node_serializes_camel_case() {
        let node = HopNode::new(NodeKey::domain("example.com"), t(0));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["key"], "domain:example.com");
        assert_eq!(json["observationCount"], 0);
        assert!(json.get("firstSeen").is_some());
        assert!(json.get("latitude").is_none());
    }

    #[test]
    fn test_edge_serializes_endpoint_keys() {
        let edge = HopEdge::new(NodeKey::domain("a.com"), "10.0.0.1".parse().unwrap(), t(0));
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["fromKey"], "domain:a.com");
        assert_eq!(json["toKey"], "10.0.0.1");
        assert_eq!(json["skippedHops"], 0);
        assert!(json["latencySamples"].as_array().unwrap().is_empty());
    }
}
