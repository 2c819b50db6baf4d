use async_trait::async_trait;
use maxminddb::{Reader, geoip2};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{GeoAnnotator, sanitize_display};
use crate::error::GeoError;
use crate::graph::GeoPoint;

const DB_FILE: &str = "GeoLite2-City.mmdb";

/// GeoIP cache entry
struct CacheEntry {
    geo: Option<GeoPoint>,
    cached_at: Instant,
}

/// Offline locator backed by a MaxMind GeoLite2-City database
pub struct MaxMindLocator {
    reader: Reader<Vec<u8>>,
    cache: RwLock<HashMap<IpAddr, CacheEntry>>,
    cache_ttl: Duration,
}

impl MaxMindLocator {
    /// Open a database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, maxminddb::MaxMindDBError> {
        let reader = Reader::open_readfile(db_path)?;

        Ok(Self {
            reader,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(3600), // 1 hour
        })
    }

    /// Places a database is looked for when none is configured
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::data_dir().map(|d| d.join("pathgraph").join(DB_FILE)),
            dirs::config_dir().map(|d| d.join("pathgraph").join(DB_FILE)),
            Some(PathBuf::from(DB_FILE)),
            Some(PathBuf::from("/usr/share/GeoIP").join(DB_FILE)),
            Some(PathBuf::from("/var/lib/GeoIP").join(DB_FILE)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Open the first database found in [`default_paths`](Self::default_paths)
    pub fn try_default() -> Option<Self> {
        Self::default_paths()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| Self::new(&path).ok())
    }

    /// Lookup a location, using the cache
    pub fn lookup(&self, ip: IpAddr) -> Option<GeoPoint> {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&ip)
                && entry.cached_at.elapsed() < self.cache_ttl
            {
                return entry.geo.clone();
            }
        }

        let geo = self.do_lookup(ip);

        self.cache.write().insert(
            ip,
            CacheEntry {
                geo: geo.clone(),
                cached_at: Instant::now(),
            },
        );

        geo
    }

    /// Perform the actual database lookup
    fn do_lookup(&self, ip: IpAddr) -> Option<GeoPoint> {
        let city: geoip2::City = self.reader.lookup(ip).ok()?;

        // Coordinates are required, names are optional
        let location = city.location.as_ref()?;
        let (latitude, longitude) = (location.latitude?, location.longitude?);

        let city_name = city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en"))
            .map(|s| sanitize_display(s));

        let country = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(sanitize_display);

        Some(GeoPoint {
            latitude,
            longitude,
            city: city_name,
            country,
        })
    }
}

#[async_trait]
impl GeoAnnotator for MaxMindLocator {
    async fn locate(&self, addr: IpAddr) -> Result<GeoPoint, GeoError> {
        self.lookup(addr).ok_or(GeoError::Unknown)
    }
}
