use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Prefix that marks a domain root key in its string form
const DOMAIN_PREFIX: &str = "domain:";

/// Natural identity of a graph node.
///
/// Hop nodes are keyed by address. Domain roots are keyed by the normalized
/// domain name and render as `domain:<name>` so both kinds share one key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeKey {
    Addr(IpAddr),
    Domain(String),
}

impl NodeKey {
    /// Key for the root node of a probed domain
    pub fn domain(name: &str) -> Self {
        NodeKey::Domain(normalize_domain(name))
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, NodeKey::Domain(_))
    }

    pub fn addr(&self) -> Option<IpAddr> {
        match self {
            NodeKey::Addr(ip) => Some(*ip),
            NodeKey::Domain(_) => None,
        }
    }
}

/// Lowercase, trim, and drop trailing root dots.
///
/// Trimming repeats until the name stops changing, so normalizing an
/// already normalized name is a no-op.
pub fn normalize_domain(name: &str) -> String {
    let mut current = name;
    loop {
        let next = current.trim().trim_end_matches('.');
        if next == current {
            break;
        }
        current = next;
    }
    current.to_ascii_lowercase()
}

/// Normalize `name` and reject it if nothing usable is left.
///
/// A domain root name must be non-empty and free of whitespace and control
/// characters, which keeps its `domain:<name>` form parseable.
pub fn checked_domain(name: &str) -> Result<String, KeyParseError> {
    let normalized = normalize_domain(name);
    if normalized.is_empty()
        || normalized
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(KeyParseError(format!("{}{}", DOMAIN_PREFIX, name)));
    }
    Ok(normalized)
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Addr(ip) => write!(f, "{}", ip),
            NodeKey::Domain(name) => write!(f, "{}{}", DOMAIN_PREFIX, name),
        }
    }
}

/// Error for key strings that are neither an IP literal nor a domain root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParseError(String);

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node key: {:?}", self.0)
    }
}

impl std::error::Error for KeyParseError {}

impl FromStr for NodeKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix(DOMAIN_PREFIX) {
            return checked_domain(name)
                .map(NodeKey::Domain)
                .map_err(|_| KeyParseError(s.to_string()));
        }
        s.parse::<IpAddr>()
            .map(NodeKey::Addr)
            .map_err(|_| KeyParseError(s.to_string()))
    }
}

impl TryFrom<String> for NodeKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeKey> for String {
    fn from(key: NodeKey) -> Self {
        key.to_string()
    }
}

impl From<IpAddr> for NodeKey {
    fn from(ip: IpAddr) -> Self {
        NodeKey::Addr(ip)
    }
}

/// Identity of a directed edge: the ordered pair of endpoint keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub from: NodeKey,
    pub to: NodeKey,
}

impl EdgeKey {
    pub fn new(from: NodeKey, to: NodeKey) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_parse_ipv4_key() {
        let key: NodeKey = "192.168.1.1".parse().unwrap();
        assert_eq!(key, NodeKey::Addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        assert_eq!(key.to_string(), "192.168.1.1");
    }

    #[test]
    fn test_parse_ipv6_key() {
        let key: NodeKey = "2001:db8::1".parse().unwrap();
        assert_eq!(
            key,
            NodeKey::Addr(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)))
        );
    }

    #[test]
    fn test_domain_key_roundtrip() {
        let key = NodeKey::domain("Example.COM.");
        assert_eq!(key.to_string(), "domain:example.com");
        let parsed: NodeKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert!(parsed.is_domain());
        assert_eq!(parsed.addr(), None);
    }

    #[test]
    fn test_reject_bare_hostname_and_empty_domain() {
        assert!("example.com".parse::<NodeKey>().is_err());
        assert!("domain:".parse::<NodeKey>().is_err());
        assert!("".parse::<NodeKey>().is_err());
    }

    #[test]
    fn test_normalize_is_stable() {
        for raw in ["a. . .", " Example.COM. ", "a.com..", ". .", "x. \t.\n"] {
            let once = normalize_domain(raw);
            assert_eq!(normalize_domain(&once), once, "unstable for {:?}", raw);
        }
        assert_eq!(normalize_domain("a. . ."), "a");
    }

    #[test]
    fn test_checked_domain_rejects_unusable_names() {
        assert_eq!(checked_domain(" A.com. ").unwrap(), "a.com");
        assert!(checked_domain("").is_err());
        assert!(checked_domain(" . . ").is_err());
        assert!(checked_domain("a b.com").is_err());
        assert!(checked_domain("a\u{7}.com").is_err());
        assert!("domain:a b".parse::<NodeKey>().is_err());
    }

    #[test]
    fn test_domain_display_parses_back() {
        for raw in ["a. . .", "Example.COM.", "sub.x.org"] {
            let key = NodeKey::Domain(checked_domain(raw).unwrap());
            let parsed: NodeKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn test_key_serde_as_string() {
        let key = NodeKey::domain("example.com");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"domain:example.com\"");
        let back: NodeKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);

        assert!(serde_json::from_str::<NodeKey>("\"not-a-key\"").is_err());
    }

    #[test]
    fn test_edge_key_display() {
        let edge = EdgeKey::new(NodeKey::domain("a.com"), "10.0.0.1".parse().unwrap());
        assert_eq!(edge.to_string(), "domain:a.com -> 10.0.0.1");
    }
}
