use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::graph::normalize_domain;

/// DNS cache entry
struct CacheEntry {
    addr: IpAddr,
    cached_at: Instant,
}

/// Forward resolver for probe targets, with caching
pub struct DnsResolver {
    resolver: TokioResolver,
    cache: RwLock<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
    timeout: Duration,
    prefer_ipv6: bool,
}

impl DnsResolver {
    pub fn new(timeout: Duration, prefer_ipv6: bool) -> Self {
        // Try system DNS config first, fall back to Google DNS if unavailable
        let resolver = match Resolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!(error = %e, "system DNS config unavailable, using Google DNS (8.8.8.8)");
                Resolver::builder_with_config(
                    ResolverConfig::google(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };

        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(300),
            timeout,
            prefer_ipv6,
        }
    }

    /// Resolve a domain to one address. IP literals pass through untouched.
    pub async fn resolve(&self, domain: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = domain.trim().parse::<IpAddr>() {
            return Ok(ip);
        }
        let name = normalize_domain(domain);

        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&name)
                && entry.cached_at.elapsed() < self.cache_ttl
            {
                return Ok(entry.addr);
            }
        }

        let resolve_err = |reason: String| ProbeError::Resolve {
            domain: name.clone(),
            reason,
        };

        let lookup = tokio::time::timeout(self.timeout, self.resolver.lookup_ip(name.as_str()))
            .await
            .map_err(|_| resolve_err("DNS lookup timed out".into()))?
            .map_err(|e| resolve_err(e.to_string()))?;

        let addrs: Vec<IpAddr> = lookup.iter().collect();
        let addr = pick_address(&addrs, self.prefer_ipv6)
            .ok_or_else(|| resolve_err("no addresses found".into()))?;
        debug!(domain = %name, %addr, "resolved");

        self.cache.write().insert(
            name.clone(),
            CacheEntry {
                addr,
                cached_at: Instant::now(),
            },
        );
        Ok(addr)
    }
}

/// Prefer IPv4 unless asked otherwise, falling back to whatever exists
fn pick_address(addrs: &[IpAddr], prefer_ipv6: bool) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv6() == prefer_ipv6)
        .or_else(|| addrs.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_address_prefers_family() {
        let v4: IpAddr = "93.184.216.34".parse().unwrap();
        let v6: IpAddr = "2606:2800:220:1::1".parse().unwrap();

        assert_eq!(pick_address(&[v6, v4], false), Some(v4));
        assert_eq!(pick_address(&[v4, v6], true), Some(v6));
        assert_eq!(pick_address(&[v6], false), Some(v6));
        assert_eq!(pick_address(&[], false), None);
    }

    #[tokio::test]
    async fn test_ip_literal_passes_through() {
        let dns = DnsResolver::new(Duration::from_secs(1), false);
        let ip = dns.resolve(" 192.0.2.10 ").await.unwrap();
        assert_eq!(ip, "192.0.2.10".parse::<IpAddr>().unwrap());
    }
}
