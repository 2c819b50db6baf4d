//! One domain's pipeline: probe the path, then geolocate its responders.

use futures::future::join_all;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{AnalyzerOptions, DomainStatus};
use crate::error::ProbeError;
use crate::graph::{AnnotatedHop, GeoPoint, HopObservation};
use crate::lookup::GeoAnnotator;
use crate::probe::HopProbe;

/// A fully annotated path, ready to merge
#[derive(Debug, Clone)]
pub(crate) struct CompletedPath {
    pub target: Option<IpAddr>,
    pub hops: Vec<AnnotatedHop>,
    pub timed_out: bool,
}

/// What a pipeline hands to the merge loop
#[derive(Debug)]
pub(crate) struct PipelineResult {
    pub index: usize,
    pub domain: String,
    pub outcome: Result<CompletedPath, DomainStatus>,
}

/// Extra time granted past the probe's own deadline before it is abandoned
const PROBE_GRACE: Duration = Duration::from_secs(5);

pub(crate) async fn run_pipeline(
    probe: &dyn HopProbe,
    geo: Option<&Arc<dyn GeoAnnotator>>,
    domain: &str,
    options: &AnalyzerOptions,
) -> Result<CompletedPath, DomainStatus> {
    let probed = tokio::time::timeout(
        options.probe_timeout.saturating_add(PROBE_GRACE),
        probe.probe(domain, options.max_hops, options.per_hop_timeout),
    )
    .await
    .unwrap_or(Err(ProbeError::Timeout));

    let (target, observations, timed_out) = match probed {
        Ok(report) => (report.target, report.hops, report.timed_out),
        Err(ProbeError::Timeout) => {
            info!(domain, "probe timed out, treating remaining hops as unresponsive");
            let hops = (1..=options.max_hops)
                .map(|ttl| HopObservation::Unresponsive { ttl })
                .collect();
            (None, hops, true)
        }
        Err(ProbeError::Resolve { reason, .. }) => {
            return Err(DomainStatus::ResolveFailed { reason });
        }
        Err(e) => {
            return Err(DomainStatus::ProbeFailed {
                reason: e.to_string(),
            });
        }
    };

    if !observations.iter().any(|h| h.addr().is_some()) {
        return Err(DomainStatus::NoHops { timed_out });
    }

    let locations = match geo {
        Some(geo) => locate_all(geo.as_ref(), &observations, options.geo_timeout).await,
        None => HashMap::new(),
    };

    let hops = observations
        .into_iter()
        .map(|observation| {
            let geo = observation.addr().and_then(|a| locations.get(&a).cloned());
            AnnotatedHop { observation, geo }
        })
        .collect();

    Ok(CompletedPath {
        target,
        hops,
        timed_out,
    })
}

/// Geolocate every distinct responder; failures leave the address unlocated
async fn locate_all(
    geo: &dyn GeoAnnotator,
    hops: &[HopObservation],
    timeout: Duration,
) -> HashMap<IpAddr, GeoPoint> {
    let mut addrs: Vec<IpAddr> = hops.iter().filter_map(|h| h.addr()).collect();
    addrs.sort();
    addrs.dedup();

    let lookups = addrs.into_iter().map(|addr| async move {
        match tokio::time::timeout(timeout, geo.locate(addr)).await {
            Ok(Ok(point)) => Some((addr, point)),
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "geolocation failed");
                None
            }
            Err(_) => {
                debug!(%addr, "geolocation timed out");
                None
            }
        }
    });

    join_all(lookups).await.into_iter().flatten().collect()
}
