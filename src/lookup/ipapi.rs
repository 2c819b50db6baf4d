use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{GeoAnnotator, is_public_address, sanitize_display};
use crate::error::GeoError;
use crate::graph::GeoPoint;

/// Default lookup endpoint; `{ip}` is replaced with the address
pub const DEFAULT_ENDPOINT: &str =
    "http://ip-api.com/json/{ip}?fields=status,message,country,countryCode,city,lat,lon,query";

/// Cache entry (negative results are cached too)
struct CacheEntry {
    geo: Option<GeoPoint>,
    cached_at: Instant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// Online locator using the ip-api.com JSON service
pub struct IpApiLocator {
    client: reqwest::Client,
    endpoint: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    cache: RwLock<HashMap<IpAddr, CacheEntry>>,
    cache_ttl: Duration,
}

impl IpApiLocator {
    pub fn new(endpoint: &str, timeout: Duration, min_interval: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pathgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GeoError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            min_interval,
            last_request: Mutex::new(None),
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(3600), // 1 hour
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        if self.endpoint.contains("{ip}") {
            self.endpoint.replace("{ip}", &ip.to_string())
        } else {
            format!("{}/{}", self.endpoint.trim_end_matches('/'), ip)
        }
    }

    fn cached(&self, ip: IpAddr) -> Option<Option<GeoPoint>> {
        let cache = self.cache.read();
        cache
            .get(&ip)
            .filter(|entry| entry.cached_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.geo.clone())
    }

    /// Wait until the minimum spacing since the previous request has passed
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch(&self, ip: IpAddr) -> Result<GeoPoint, GeoError> {
        self.throttle().await;

        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;
        let body: IpApiResponse = response.json().await.map_err(map_reqwest)?;
        parse_response(body)
    }
}

fn map_reqwest(e: reqwest::Error) -> GeoError {
    if e.is_timeout() {
        GeoError::Timeout
    } else {
        GeoError::Request(e.to_string())
    }
}

fn parse_response(body: IpApiResponse) -> Result<GeoPoint, GeoError> {
    if body.status != "success" {
        debug!(message = ?body.message, "ip-api lookup failed");
        return Err(GeoError::Unknown);
    }
    let (Some(latitude), Some(longitude)) = (body.lat, body.lon) else {
        return Err(GeoError::Unknown);
    };
    Ok(GeoPoint {
        latitude,
        longitude,
        city: body.city.filter(|c| !c.is_empty()).map(|c| sanitize_display(&c)),
        country: body
            .country
            .or(body.country_code)
            .filter(|c| !c.is_empty())
            .map(|c| sanitize_display(&c)),
    })
}

#[async_trait]
impl GeoAnnotator for IpApiLocator {
    async fn locate(&self, addr: IpAddr) -> Result<GeoPoint, GeoError> {
        if !is_public_address(addr) {
            return Err(GeoError::Unknown);
        }
        if let Some(hit) = self.cached(addr) {
            return hit.ok_or(GeoError::Unknown);
        }

        match self.fetch(addr).await {
            Ok(geo) => {
                self.cache.write().insert(
                    addr,
                    CacheEntry {
                        geo: Some(geo.clone()),
                        cached_at: Instant::now(),
                    },
                );
                Ok(geo)
            }
            Err(GeoError::Unknown) => {
                self.cache.write().insert(
                    addr,
                    CacheEntry {
                        geo: None,
                        cached_at: Instant::now(),
                    },
                );
                Err(GeoError::Unknown)
            }
            // Transport failures are not cached
            Err(e) => Err(e),
        }
    }
}
