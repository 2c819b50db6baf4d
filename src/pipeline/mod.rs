//! Multi-domain analysis runs.
//!
//! Each domain is probed and annotated in its own pipeline; pipelines run
//! concurrently up to a limit. Completed paths flow into a single merge loop
//! that owns the graph and flushes every delta to the store.

mod merge;
mod retry;
mod worker;

pub use retry::{RetryPolicy, with_retry};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ImportError, StoreError};
use crate::exchange;
use crate::graph::{GraphStats, PathGraph, PruneReport, checked_domain, normalize_domain};
use crate::lookup::GeoAnnotator;
use crate::probe::HopProbe;
use crate::store::GraphStore;
use merge::MergeLoop;
use worker::{PipelineResult, run_pipeline};

/// How one domain fared in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DomainStatus {
    /// Path merged into the graph
    Merged {
        responded: usize,
        unresponsive: usize,
        timed_out: bool,
    },
    ResolveFailed {
        reason: String,
    },
    ProbeFailed {
        reason: String,
    },
    /// The probe finished but no hop answered
    NoHops {
        timed_out: bool,
    },
    /// The domain name cannot key a graph node
    Rejected {
        reason: String,
    },
    /// Abandoned because the run was cancelled
    Cancelled,
}

impl DomainStatus {
    pub fn is_merged(&self) -> bool {
        matches!(self, DomainStatus::Merged { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DomainStatus::Merged { .. } => "merged",
            DomainStatus::ResolveFailed { .. } => "resolve failed",
            DomainStatus::ProbeFailed { .. } => "probe failed",
            DomainStatus::NoHops { .. } => "no hops",
            DomainStatus::Rejected { .. } => "rejected",
            DomainStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainOutcome {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<IpAddr>,
    #[serde(flatten)]
    pub status: DomainStatus,
}

/// Result of [`Analyzer::run`], one outcome per distinct input domain
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub outcomes: Vec<DomainOutcome>,
    pub stats: GraphStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn merged(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_merged()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.merged()
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub max_hops: u8,
    pub per_hop_timeout: Duration,
    /// Budget for one probe; the pipeline abandons it a little after this
    pub probe_timeout: Duration,
    pub geo_timeout: Duration,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for AnalyzerOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_hops: config.probe.max_hops,
            per_hop_timeout: config.probe.per_hop_timeout,
            probe_timeout: config.probe.timeout,
            geo_timeout: config.geo.timeout,
            concurrency: config.probe.concurrency,
            retry: RetryPolicy::from(&config.store),
        }
    }
}

/// Runs domain pipelines and merges their paths into the stored graph
pub struct Analyzer {
    probe: Arc<dyn HopProbe>,
    geo: Option<Arc<dyn GeoAnnotator>>,
    store: Arc<dyn GraphStore>,
    options: AnalyzerOptions,
}

impl Analyzer {
    pub fn new(
        probe: Arc<dyn HopProbe>,
        geo: Option<Arc<dyn GeoAnnotator>>,
        store: Arc<dyn GraphStore>,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            probe,
            geo,
            store,
            options,
        }
    }

    /// Analyze `domains` and fold every completed path into the store.
    ///
    /// Per-domain failures are reported in the summary. Only a store that
    /// stays unavailable after retries, or a corrupt stored graph, fails
    /// the run.
    pub async fn run(
        &self,
        domains: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunSummary, StoreError> {
        let started_at = Utc::now();
        let domains = dedupe_domains(domains);
        info!(domains = domains.len(), concurrency = self.options.concurrency, "starting run");

        let graph = load_graph(self.store.as_ref(), &self.options.retry).await?;

        let concurrency = self.options.concurrency.max(1);
        let abort = cancel.child_token();
        let (tx, rx) = mpsc::channel::<PipelineResult>(concurrency);

        let merge_loop = MergeLoop::new(
            graph,
            self.store.clone(),
            self.options.retry.clone(),
            domains.len(),
        );

        let producer = {
            let abort = abort.clone();
            let domains = domains.clone();
            async move {
                let mut results = stream::iter(domains.into_iter().enumerate())
                    .map(|(index, domain)| {
                        let abort = abort.clone();
                        async move {
                            let outcome = tokio::select! {
                                biased;
                                _ = abort.cancelled() => Err(DomainStatus::Cancelled),
                                outcome = run_pipeline(
                                    self.probe.as_ref(),
                                    self.geo.as_ref(),
                                    &domain,
                                    &self.options,
                                ) => outcome,
                            };
                            PipelineResult {
                                index,
                                domain,
                                outcome,
                            }
                        }
                    })
                    .buffer_unordered(concurrency);

                while let Some(result) = results.next().await {
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            }
        };

        let ((), merged) = tokio::join!(producer, merge_loop.run(rx, abort.clone()));
        let (graph, outcomes) = merged?;

        let outcomes = outcomes
            .into_iter()
            .zip(domains)
            .map(|(outcome, domain)| {
                outcome.unwrap_or(DomainOutcome {
                    domain,
                    target: None,
                    status: DomainStatus::Cancelled,
                })
            })
            .collect();

        let summary = RunSummary {
            outcomes,
            stats: graph.stats(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            merged = summary.merged(),
            failed = summary.failed(),
            hops = summary.stats.hops,
            edges = summary.stats.edges,
            "run finished"
        );
        Ok(summary)
    }
}

/// Normalize and drop repeated domains, keeping first-occurrence order.
///
/// Blank names are skipped silently; names with inner whitespace are
/// skipped with a warning.
pub fn dedupe_domains(domains: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for domain in domains {
        if normalize_domain(domain).is_empty() {
            continue;
        }
        let name = match checked_domain(domain) {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "invalid domain ignored");
                continue;
            }
        };
        if seen.insert(name.clone()) {
            unique.push(name);
        } else {
            warn!(domain = %name, "duplicate domain ignored");
        }
    }
    unique
}

/// Load and validate the stored graph
pub async fn load_graph(store: &dyn GraphStore, retry: &RetryPolicy) -> Result<PathGraph, StoreError> {
    let snapshot = with_retry(retry, "load", || store.load_all()).await?;
    PathGraph::from_snapshot(snapshot).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Atomically replace the stored graph with `graph`
pub async fn replace_graph(
    store: &dyn GraphStore,
    retry: &RetryPolicy,
    graph: &PathGraph,
) -> Result<(), StoreError> {
    let snapshot = graph.snapshot();
    with_retry(retry, "replace", || store.replace(&snapshot)).await
}

/// Read a document and make its graph the stored one.
///
/// The document is fully validated before the store is touched, so a
/// rejected document leaves the stored graph as it was.
pub async fn import_document<R: Read>(
    store: &dyn GraphStore,
    retry: &RetryPolicy,
    reader: R,
) -> Result<GraphStats, ImportError> {
    let graph = exchange::import(exchange::read_document(reader)?)?;
    replace_graph(store, retry, &graph).await?;
    Ok(graph.stats())
}

/// Drop stored nodes and edges last seen before `older_than`
pub async fn prune_store(
    store: &dyn GraphStore,
    retry: &RetryPolicy,
    older_than: DateTime<Utc>,
) -> Result<PruneReport, StoreError> {
    let mut graph = load_graph(store, retry).await?;
    let report = graph.prune(older_than);
    if report != PruneReport::default() {
        replace_graph(store, retry, &graph).await?;
    }
    info!(
        nodes_removed = report.nodes_removed,
        edges_removed = report.edges_removed,
        "pruned graph"
    );
    Ok(report)
}
