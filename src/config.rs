//! Runtime configuration.
//!
//! Loaded from TOML at `--config` or `<config dir>/pathgraph/config.toml`,
//! then overridden by command line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;
use crate::lookup::ipapi::DEFAULT_ENDPOINT;

/// Geolocation backend
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum GeoProvider {
    /// ip-api.com web service
    #[default]
    IpApi,
    /// Local MaxMind GeoLite2-City database
    Maxmind,
    /// No geolocation
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// traceroute binary
    pub command: String,
    pub max_hops: u8,
    #[serde(with = "duration_serde")]
    pub per_hop_timeout: Duration,
    /// Overall budget per domain
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    pub queries: u8,
    pub numeric: bool,
    pub concurrency: usize,
    #[serde(with = "duration_serde")]
    pub dns_timeout: Duration,
    pub prefer_ipv6: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: "traceroute".to_string(),
            max_hops: 30,
            per_hop_timeout: Duration::from_secs(3),
            timeout: Duration::from_secs(120),
            queries: 1,
            numeric: false,
            concurrency: 4,
            dns_timeout: Duration::from_secs(5),
            prefer_ipv6: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub provider: GeoProvider,
    /// ip-api endpoint template (`{ip}` is substituted)
    pub endpoint: String,
    /// MaxMind database path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Minimum spacing between ip-api requests
    #[serde(with = "duration_serde")]
    pub rate_limit_delay: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            provider: GeoProvider::IpApi,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            database: None,
            timeout: Duration::from_secs(10),
            rate_limit_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(with = "duration_serde")]
    pub retry_initial: Duration,
    #[serde(with = "duration_serde")]
    pub retry_max_interval: Duration,
    /// Give up on a store operation after this long
    #[serde(with = "duration_serde")]
    pub retry_max_elapsed: Duration,
}

impl StoreConfig {
    /// Default store location: <data dir>/pathgraph/graph.db
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pathgraph")
            .join("graph.db")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            retry_initial: Duration::from_millis(200),
            retry_max_interval: Duration::from_secs(5),
            retry_max_elapsed: Duration::from_secs(30),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub geo: GeoConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Default config file path: ~/.config/pathgraph/config.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pathgraph").join("config.toml"))
    }

    /// Load from `path`, or from the default location.
    ///
    /// A missing default file yields defaults; an explicit path must exist.
    /// A file that fails to parse is always an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply command line overrides
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(path) = &args.store {
            self.store.path = path.clone();
        }
        if let Some(hops) = args.max_hops {
            self.probe.max_hops = hops;
        }
        if let Some(t) = args.per_hop_timeout_duration() {
            self.probe.per_hop_timeout = t;
        }
        if let Some(t) = args.probe_timeout_duration() {
            self.probe.timeout = t;
        }
        if let Some(n) = args.concurrency {
            self.probe.concurrency = n;
        }
        if args.numeric {
            self.probe.numeric = true;
        }
        if let Some(provider) = args.geo {
            self.geo.provider = provider;
        }
        if let Some(db) = &args.geoip_db {
            self.geo.database = Some(db.clone());
            if args.geo.is_none() {
                self.geo.provider = GeoProvider::Maxmind;
            }
        }
        if args.no_geo {
            self.geo.provider = GeoProvider::None;
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.probe.max_hops, 30);
        assert_eq!(config.probe.per_hop_timeout, Duration::from_secs(3));
        assert_eq!(config.probe.timeout, Duration::from_secs(120));
        assert_eq!(config.probe.concurrency, 4);
        assert_eq!(config.probe.command, "traceroute");
        assert_eq!(config.geo.provider, GeoProvider::IpApi);
        assert_eq!(config.geo.timeout, Duration::from_secs(10));
        assert_eq!(config.geo.rate_limit_delay, Duration::from_millis(100));
        assert!(config.store.path.ends_with("pathgraph/graph.db"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [probe]
            max_hops = 20
            timeout = 45.5

            [geo]
            provider = "maxmind"
            database = "/srv/GeoLite2-City.mmdb"
            "#,
        )
        .unwrap();

        assert_eq!(config.probe.max_hops, 20);
        assert_eq!(config.probe.timeout, Duration::from_millis(45_500));
        assert_eq!(config.probe.queries, 1);
        assert_eq!(config.geo.provider, GeoProvider::Maxmind);
        assert_eq!(
            config.geo.database.as_deref(),
            Some(Path::new("/srv/GeoLite2-City.mmdb"))
        );
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.geo.provider = GeoProvider::None;
        config.store.path = PathBuf::from("/tmp/graph.db");

        let text = config.to_toml().unwrap();
        assert!(text.contains("provider = \"none\""));
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml("[probe]\nmax_hops = \"many\"").is_err());
        assert!(Config::from_toml("[probe]\ntimeout = -1.0").is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());

        let path = dir.path().join("config.toml");
        fs::write(&path, "[probe]\nconcurrency = 2\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().probe.concurrency, 2);
    }

    #[test]
    fn test_args_override_file() {
        let mut config = Config::default();
        let args = Args {
            domains: vec!["a.com".into()],
            max_hops: Some(12),
            probe_timeout: Some(30.0),
            concurrency: Some(8),
            store: Some(PathBuf::from("/data/g.db")),
            numeric: true,
            no_geo: true,
            ..Default::default()
        };
        config.apply_args(&args);

        assert_eq!(config.probe.max_hops, 12);
        assert_eq!(config.probe.timeout, Duration::from_secs(30));
        assert_eq!(config.probe.per_hop_timeout, Duration::from_secs(3));
        assert_eq!(config.probe.concurrency, 8);
        assert!(config.probe.numeric);
        assert_eq!(config.store.path, PathBuf::from("/data/g.db"));
        assert_eq!(config.geo.provider, GeoProvider::None);
    }

    #[test]
    fn test_oversized_timeout_arg_is_ignored() {
        let mut config = Config::default();
        let args = Args {
            probe_timeout: Some(1e300),
            ..Default::default()
        };
        config.apply_args(&args);
        assert_eq!(config.probe.timeout, Config::default().probe.timeout);
    }

    #[test]
    fn test_geoip_db_selects_maxmind() {
        let mut config = Config::default();
        let args = Args {
            geoip_db: Some(PathBuf::from("/srv/city.mmdb")),
            ..Default::default()
        };
        config.apply_args(&args);
        assert_eq!(config.geo.provider, GeoProvider::Maxmind);
    }
}
