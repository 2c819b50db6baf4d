//! Single-writer merge loop.
//!
//! Owns the run's [`PathGraph`]. Completed paths arrive over a channel and are
//! merged one at a time; each resulting delta is flushed before the next path
//! is taken.

use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry::{RetryPolicy, with_retry};
use super::worker::PipelineResult;
use super::{DomainOutcome, DomainStatus};
use crate::error::StoreError;
use crate::graph::PathGraph;
use crate::store::GraphStore;

pub(crate) struct MergeLoop {
    graph: PathGraph,
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
    outcomes: Vec<Option<DomainOutcome>>,
}

impl MergeLoop {
    pub fn new(
        graph: PathGraph,
        store: Arc<dyn GraphStore>,
        retry: RetryPolicy,
        domains: usize,
    ) -> Self {
        Self {
            graph,
            store,
            retry,
            outcomes: vec![None; domains],
        }
    }

    /// Drain `rx` until every sender is gone.
    ///
    /// A flush that still fails after retries stops the loop and cancels
    /// `abort` so in-flight pipelines are dropped.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<PipelineResult>,
        abort: CancellationToken,
    ) -> Result<(PathGraph, Vec<Option<DomainOutcome>>), StoreError> {
        while let Some(result) = rx.recv().await {
            if let Err(e) = self.apply(result).await {
                error!(error = %e, "giving up on graph store");
                abort.cancel();
                return Err(e);
            }
        }
        Ok((self.graph, self.outcomes))
    }

    async fn apply(&mut self, result: PipelineResult) -> Result<(), StoreError> {
        let PipelineResult {
            index,
            domain,
            outcome,
        } = result;

        let (target, status) = match outcome {
            Ok(path) => {
                let delta = match self
                    .graph
                    .merge_at(&domain, path.target, &path.hops, Utc::now())
                {
                    Ok(delta) => delta,
                    Err(e) => {
                        warn!(%domain, error = %e, "path not merged");
                        let status = DomainStatus::Rejected {
                            reason: e.to_string(),
                        };
                        self.record(index, domain, None, status);
                        return Ok(());
                    }
                };
                if !delta.is_empty() {
                    with_retry(&self.retry, "flush", || self.store.flush(&delta)).await?;
                }

                let responded = path.hops.iter().filter(|h| h.observation.addr().is_some()).count();
                let status = DomainStatus::Merged {
                    responded,
                    unresponsive: path.hops.len() - responded,
                    timed_out: path.timed_out,
                };
                info!(%domain, responded, records = delta.len(), "merged path");
                (path.target, status)
            }
            Err(status) => {
                debug!(%domain, ?status, "domain not merged");
                (None, status)
            }
        };

        self.record(index, domain, target, status);
        Ok(())
    }

    fn record(
        &mut self,
        index: usize,
        domain: String,
        target: Option<IpAddr>,
        status: DomainStatus,
    ) {
        if let Some(slot) = self.outcomes.get_mut(index) {
            *slot = Some(DomainOutcome {
                domain,
                target,
                status,
            });
        }
    }
}
