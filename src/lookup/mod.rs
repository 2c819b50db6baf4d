pub mod dns;
pub mod geo;
pub mod ipapi;

pub use dns::DnsResolver;
pub use geo::MaxMindLocator;
pub use ipapi::IpApiLocator;

use async_trait::async_trait;
use std::net::IpAddr;

use crate::error::GeoError;
use crate::graph::GeoPoint;

/// Source of approximate locations for hop addresses.
///
/// Rate limiting, caching and retries are the implementation's business.
#[async_trait]
pub trait GeoAnnotator: Send + Sync {
    async fn locate(&self, addr: IpAddr) -> Result<GeoPoint, GeoError>;
}

/// Sanitize a string for safe terminal display by removing control characters.
///
/// This filters out ASCII control characters (0x00-0x1F, 0x7F) and Unicode control
/// characters that could be used to inject terminal escape sequences.
pub(crate) fn sanitize_display(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect()
}

/// Whether an address can be meaningfully geolocated
pub(crate) fn is_public_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                // 100.64.0.0/10 carrier-grade NAT
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64))
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // fc00::/7 unique local
                || (seg0 & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (seg0 & 0xffc0) == 0xfe80
                // 2001:db8::/32 documentation
                || (seg0 == 0x2001 && v6.segments()[1] == 0x0db8))
        }
    }
}
