pub mod traceroute;

pub use traceroute::{SystemTraceroute, TracerouteOptions, parse_hop_line};

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::ProbeError;
use crate::graph::HopObservation;

/// Ordered hop observations for one domain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// Address the probe was aimed at
    pub target: Option<IpAddr>,
    /// One entry per hop distance, nearest first
    pub hops: Vec<HopObservation>,
    /// The probe hit its overall deadline; later hops were padded as unresponsive
    pub timed_out: bool,
}

impl ProbeReport {
    pub fn responded(&self) -> usize {
        self.hops.iter().filter(|h| h.addr().is_some()).count()
    }

    pub fn unresponsive(&self) -> usize {
        self.hops.len() - self.responded()
    }
}

/// Discovers the hop sequence towards a domain
#[async_trait]
pub trait HopProbe: Send + Sync {
    async fn probe(
        &self,
        domain: &str,
        max_hops: u8,
        per_hop_timeout: Duration,
    ) -> Result<ProbeReport, ProbeError>;
}
