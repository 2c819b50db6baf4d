use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::GeoProvider;

/// Probe domains with traceroute, geolocate the hops and merge every path into one graph
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "pathgraph")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Domains to analyze
    pub domains: Vec<String>,

    /// File with one domain per line (`-` for stdin)
    #[arg(short = 'f', long = "domains-file")]
    pub domains_file: Option<PathBuf>,

    /// Config file (default: <config dir>/pathgraph/config.toml)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Graph store directory
    #[arg(long = "store")]
    pub store: Option<PathBuf>,

    /// Export the stored graph as a JSON document (`-` for stdout)
    #[arg(long = "export")]
    pub export: Option<String>,

    /// Replace the stored graph with a JSON document (`-` for stdin)
    #[arg(long = "import")]
    pub import: Option<String>,

    /// Write the stored graph as GeoJSON (`-` for stdout)
    #[arg(long = "visualize")]
    pub visualize: Option<String>,

    /// Drop nodes and edges not seen for this many days
    #[arg(long = "prune-older-than", value_name = "DAYS")]
    pub prune_older_than: Option<f64>,

    /// Maximum hops per probe
    #[arg(short = 'm', long = "max-hops")]
    pub max_hops: Option<u8>,

    /// Wait per hop in seconds (traceroute takes whole seconds, so this rounds up)
    #[arg(long = "per-hop-timeout")]
    pub per_hop_timeout: Option<f64>,

    /// Overall time budget per domain in seconds
    #[arg(long = "probe-timeout")]
    pub probe_timeout: Option<f64>,

    /// Domains probed concurrently
    #[arg(short = 'j', long = "concurrency")]
    pub concurrency: Option<usize>,

    /// Geolocation provider
    #[arg(long = "geo", value_enum)]
    pub geo: Option<GeoProvider>,

    /// Path to MaxMind GeoLite2 database file
    #[arg(long = "geoip-db")]
    pub geoip_db: Option<PathBuf>,

    /// Skip geolocation
    #[arg(long = "no-geo")]
    pub no_geo: bool,

    /// Do not resolve hop hostnames
    #[arg(short = 'n', long = "numeric")]
    pub numeric: bool,

    /// Print the run summary as JSON
    #[arg(long = "json")]
    pub json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// What one invocation does
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Analyze,
    Export(String),
    Import(String),
    Visualize(String),
    Prune { days: f64 },
}

/// Upper bound on hops, matching common traceroute limits
const MAX_SAFE_HOPS: u8 = 64;
const MAX_CONCURRENCY: usize = 64;

impl Args {
    /// `None` if unset or not representable; `validate` rejects the latter
    pub fn per_hop_timeout_duration(&self) -> Option<Duration> {
        self.per_hop_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn probe_timeout_duration(&self) -> Option<Duration> {
        self.probe_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    fn selected_modes(&self) -> Vec<Mode> {
        let mut modes = Vec::new();
        if let Some(path) = &self.export {
            modes.push(Mode::Export(path.clone()));
        }
        if let Some(path) = &self.import {
            modes.push(Mode::Import(path.clone()));
        }
        if let Some(path) = &self.visualize {
            modes.push(Mode::Visualize(path.clone()));
        }
        if let Some(days) = self.prune_older_than {
            modes.push(Mode::Prune { days });
        }
        modes
    }

    /// Selected mode; analysis unless another mode flag is given
    pub fn mode(&self) -> Mode {
        self.selected_modes().into_iter().next().unwrap_or(Mode::Analyze)
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        let modes = self.selected_modes();
        if modes.len() > 1 {
            return Err(
                "Only one of --export, --import, --visualize, --prune-older-than may be given"
                    .into(),
            );
        }

        let has_domains = !self.domains.is_empty() || self.domains_file.is_some();
        if modes.is_empty() && !has_domains {
            return Err("No domains given (pass domains or --domains-file)".into());
        }
        if !modes.is_empty() && has_domains {
            return Err("Domains can only be given when analyzing".into());
        }

        if let Some(days) = self.prune_older_than
            && !(days.is_finite() && days >= 0.0)
        {
            return Err("Prune age must be a non-negative number of days".into());
        }

        for (name, value) in [
            ("Per-hop timeout", self.per_hop_timeout),
            ("Probe timeout", self.probe_timeout),
        ] {
            if let Some(secs) = value {
                if !(secs.is_finite() && secs > 0.0) {
                    return Err(format!("{} must be positive", name));
                }
                if Duration::try_from_secs_f64(secs).is_err() {
                    return Err(format!("{} is too large", name));
                }
            }
        }

        if let Some(hops) = self.max_hops {
            if hops == 0 {
                return Err("Max hops must be at least 1".into());
            }
            if hops > MAX_SAFE_HOPS {
                return Err(format!("Max hops cannot exceed {}", MAX_SAFE_HOPS));
            }
        }

        if let Some(n) = self.concurrency
            && !(1..=MAX_CONCURRENCY).contains(&n)
        {
            return Err(format!("Concurrency must be between 1 and {}", MAX_CONCURRENCY));
        }

        if self.no_geo && self.geo.is_some_and(|g| g != GeoProvider::None) {
            return Err("Cannot combine --no-geo with --geo".into());
        }

        Ok(())
    }

    /// Domains from the command line followed by those in the domains file
    pub fn collect_domains(&self) -> Result<Vec<String>> {
        let mut domains: Vec<String> = self
            .domains
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();

        if let Some(path) = &self.domains_file {
            let text = if path.as_os_str() == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read domains from stdin")?;
                buf
            } else {
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read domains file {}", path.display()))?
            };
            domains.extend(parse_domain_list(&text));
        }

        Ok(domains)
    }
}

/// One domain per line; blank lines and `#` comments are ignored
pub fn parse_domain_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pathgraph").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_analyze_is_default_mode() {
        let args = parse(&["example.com", "example.org"]);
        assert_eq!(args.mode(), Mode::Analyze);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_modes_are_exclusive() {
        let args = parse(&["--export", "out.json", "--import", "in.json"]);
        assert!(args.validate().is_err());

        let args = parse(&["--visualize", "-"]);
        assert_eq!(args.mode(), Mode::Visualize("-".into()));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_domains_required_for_analysis() {
        assert!(parse(&[]).validate().is_err());
        assert!(parse(&["-f", "domains.txt"]).validate().is_ok());
        assert!(parse(&["--export", "-", "example.com"]).validate().is_err());
    }

    #[test]
    fn test_numeric_bounds() {
        assert!(parse(&["a.com", "-m", "0"]).validate().is_err());
        assert!(parse(&["a.com", "-m", "65"]).validate().is_err());
        assert!(parse(&["a.com", "-m", "64"]).validate().is_ok());
        assert!(parse(&["a.com", "-j", "0"]).validate().is_err());
        assert!(parse(&["a.com", "--probe-timeout", "0"]).validate().is_err());
        assert!(parse(&["a.com", "--per-hop-timeout=-1"]).validate().is_err());
        assert!(parse(&["--prune-older-than=-3"]).validate().is_err());
        assert_eq!(
            parse(&["--prune-older-than", "30"]).mode(),
            Mode::Prune { days: 30.0 }
        );
    }

    #[test]
    fn test_unrepresentable_timeouts_rejected() {
        let args = parse(&["a.com", "--probe-timeout", "1e300"]);
        assert!(args.validate().is_err());
        assert_eq!(args.probe_timeout_duration(), None);

        assert!(parse(&["a.com", "--per-hop-timeout", "1e20"]).validate().is_err());

        let args = parse(&["a.com", "--per-hop-timeout", "2.5"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.per_hop_timeout_duration(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_geo_flags_conflict() {
        assert!(parse(&["a.com", "--no-geo", "--geo", "maxmind"]).validate().is_err());
        assert!(parse(&["a.com", "--geo", "ip-api"]).validate().is_ok());
    }

    #[test]
    fn test_verbose_counts() {
        assert_eq!(parse(&["a.com", "-vv"]).verbose, 2);
    }

    #[test]
    fn test_parse_domain_list() {
        let text = "example.com\n\n# comment\n  example.org  # trailing\nexample.net\n";
        assert_eq!(
            parse_domain_list(text),
            vec!["example.com", "example.org", "example.net"]
        );
    }

    #[test]
    fn test_collect_domains_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("domains.txt");
        std::fs::write(&path, "b.com\n#skip\nc.com\n").unwrap();

        let args = Args {
            domains: vec!["a.com".into()],
            domains_file: Some(path),
            ..Default::default()
        };
        assert_eq!(args.collect_domains().unwrap(), vec!["a.com", "b.com", "c.com"]);
    }
}
