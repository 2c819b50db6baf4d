use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use clap::Parser;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pathgraph::cli::{Args, Mode};
use pathgraph::config::{Config, GeoProvider};
use pathgraph::exchange;
use pathgraph::export::{generate_report, write_geojson};
use pathgraph::lookup::{DnsResolver, GeoAnnotator, IpApiLocator, MaxMindLocator};
use pathgraph::pipeline::{
    Analyzer, AnalyzerOptions, RetryPolicy, import_document, load_graph, prune_store, with_retry,
};
use pathgraph::probe::{SystemTraceroute, TracerouteOptions};
use pathgraph::store::{GraphStore, RocksStore};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    init_logging(args.verbose);

    let mut config = Config::load(args.config.as_deref())?;
    config.apply_args(&args);

    let retry = RetryPolicy::from(&config.store);
    let store = open_store(&config, &retry).await?;

    match args.mode() {
        Mode::Analyze => run_analyze(&args, &config, store).await,
        Mode::Export(path) => run_export(store.as_ref(), &retry, &path).await,
        Mode::Import(path) => run_import(store.as_ref(), &retry, &path).await,
        Mode::Visualize(path) => run_visualize(store.as_ref(), &retry, &path).await,
        Mode::Prune { days } => run_prune(store.as_ref(), &retry, days).await,
    }
}

/// Log to stderr; `-v` raises our level, RUST_LOG overrides everything
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,pathgraph={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn open_store(config: &Config, retry: &RetryPolicy) -> Result<Arc<dyn GraphStore>> {
    let path = &config.store.path;
    let store = with_retry(retry, "open", || RocksStore::open(path))
        .await
        .with_context(|| format!("Failed to open graph store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_geo(config: &Config) -> Option<Arc<dyn GeoAnnotator>> {
    match config.geo.provider {
        GeoProvider::None => None,
        GeoProvider::IpApi => {
            match IpApiLocator::new(
                &config.geo.endpoint,
                config.geo.timeout,
                config.geo.rate_limit_delay,
            ) {
                Ok(locator) => Some(Arc::new(locator)),
                Err(e) => {
                    warn!(error = %e, "geolocation disabled");
                    None
                }
            }
        }
        GeoProvider::Maxmind => {
            let locator = match &config.geo.database {
                Some(path) => match MaxMindLocator::new(path) {
                    Ok(locator) => Some(locator),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to load GeoIP database");
                        None
                    }
                },
                None => MaxMindLocator::try_default(),
            };
            if locator.is_none() {
                warn!("no GeoIP database available, continuing without geolocation");
            }
            locator.map(|l| Arc::new(l) as Arc<dyn GeoAnnotator>)
        }
    }
}

async fn run_analyze(args: &Args, config: &Config, store: Arc<dyn GraphStore>) -> Result<()> {
    let domains = args.collect_domains()?;
    if domains.is_empty() {
        anyhow::bail!("No domains to analyze");
    }

    let resolver = DnsResolver::new(config.probe.dns_timeout, config.probe.prefer_ipv6);
    let probe = SystemTraceroute::new(
        resolver,
        TracerouteOptions {
            command: config.probe.command.clone(),
            queries: config.probe.queries,
            numeric: config.probe.numeric,
            timeout: config.probe.timeout,
            prefer_ipv6: config.probe.prefer_ipv6,
        },
    );

    let analyzer = Analyzer::new(
        Arc::new(probe),
        build_geo(config),
        store,
        AnalyzerOptions::from(config),
    );

    // Cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("interrupted, finishing merges of completed paths");
        cancel_clone.cancel();
    });

    let summary = analyzer
        .run(&domains, &cancel)
        .await
        .context("Analysis aborted")?;

    let stdout = std::io::stdout();
    if args.json {
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &summary)?;
        writeln!(out)?;
    } else {
        generate_report(&summary, stdout.lock())?;
    }
    Ok(())
}

async fn run_export(store: &dyn GraphStore, retry: &RetryPolicy, path: &str) -> Result<()> {
    let graph = load_graph(store, retry)
        .await
        .context("Failed to load graph")?;
    let document = exchange::export(&graph);

    exchange::write_document(open_output(path)?, &document)
        .with_context(|| format!("Failed to write {}", path))?;
    info!(nodes = document.nodes.len(), edges = document.edges.len(), path, "exported graph");
    Ok(())
}

async fn run_import(store: &dyn GraphStore, retry: &RetryPolicy, path: &str) -> Result<()> {
    let stats = import_document(store, retry, open_input(path)?)
        .await
        .with_context(|| format!("Failed to import {}", path))?;
    info!(hops = stats.hops, domains = stats.domains, edges = stats.edges, "imported graph");
    Ok(())
}

async fn run_visualize(store: &dyn GraphStore, retry: &RetryPolicy, path: &str) -> Result<()> {
    let graph = load_graph(store, retry)
        .await
        .context("Failed to load graph")?;
    write_geojson(&graph, open_output(path)?).with_context(|| format!("Failed to write {}", path))?;
    Ok(())
}

async fn run_prune(store: &dyn GraphStore, retry: &RetryPolicy, days: f64) -> Result<()> {
    let age = TimeDelta::try_milliseconds((days * 86_400_000.0) as i64)
        .context("Prune age out of range")?;
    let cutoff = Utc::now()
        .checked_sub_signed(age)
        .context("Prune age out of range")?;

    let report = prune_store(store, retry, cutoff)
        .await
        .context("Failed to prune graph")?;
    eprintln!(
        "Pruned {} nodes and {} edges last seen before {}",
        report.nodes_removed,
        report.edges_removed,
        cutoff.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

/// `-` is stdout
fn open_output(path: &str) -> Result<Box<dyn Write>> {
    if path == "-" {
        return Ok(Box::new(std::io::stdout().lock()));
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

/// `-` is stdin
fn open_input(path: &str) -> Result<Box<dyn Read>> {
    if path == "-" {
        return Ok(Box::new(std::io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    Ok(Box::new(BufReader::new(file)))
}
