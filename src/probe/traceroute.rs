//! Hop probe that drives the system `traceroute` binary.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::{HopProbe, ProbeReport};
use crate::error::ProbeError;
use crate::graph::HopObservation;
use crate::lookup::{DnsResolver, sanitize_display};

/// How the traceroute binary is invoked
#[derive(Debug, Clone)]
pub struct TracerouteOptions {
    /// Binary name or path
    pub command: String,
    /// Probes sent per hop (`-q`)
    pub queries: u8,
    /// Skip reverse DNS in traceroute itself (`-n`)
    pub numeric: bool,
    /// Overall budget for one domain
    pub timeout: Duration,
    pub prefer_ipv6: bool,
}

impl Default for TracerouteOptions {
    fn default() -> Self {
        Self {
            command: "traceroute".to_string(),
            queries: 1,
            numeric: false,
            timeout: Duration::from_secs(120),
            prefer_ipv6: false,
        }
    }
}

pub struct SystemTraceroute {
    resolver: DnsResolver,
    options: TracerouteOptions,
}

impl SystemTraceroute {
    pub fn new(resolver: DnsResolver, options: TracerouteOptions) -> Self {
        Self { resolver, options }
    }

    fn command(&self, target: IpAddr, max_hops: u8, per_hop_timeout: Duration) -> Command {
        let mut cmd = Command::new(&self.options.command);
        cmd.arg("-m")
            .arg(max_hops.to_string())
            .arg("-w")
            .arg(wait_seconds(per_hop_timeout).to_string())
            .arg("-q")
            .arg(self.options.queries.max(1).to_string());
        if self.options.numeric {
            cmd.arg("-n");
        }
        if target.is_ipv6() {
            cmd.arg("-6");
        }
        cmd.arg(target.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl HopProbe for SystemTraceroute {
    async fn probe(
        &self,
        domain: &str,
        max_hops: u8,
        per_hop_timeout: Duration,
    ) -> Result<ProbeReport, ProbeError> {
        let target = self.resolver.resolve(domain).await?;

        let mut child = self
            .command(target, max_hops, per_hop_timeout)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    ProbeError::Unavailable(format!("{} not found", self.options.command))
                }
                ErrorKind::PermissionDenied => {
                    ProbeError::Unavailable(format!("cannot execute {}", self.options.command))
                }
                _ => ProbeError::Io(e),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProbeError::Unavailable("traceroute stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        let mut hops = Vec::new();
        let mut timed_out = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        trace!(domain, %line, "traceroute output");
                        if let Some(hop) = parse_hop_line(&line) {
                            push_hop(&mut hops, hop);
                        }
                    }
                    None => break,
                },
            }
        }

        if timed_out {
            warn!(domain, timeout = ?self.options.timeout, "traceroute timed out, padding remaining hops");
            if let Err(e) = child.start_kill() {
                debug!(domain, error = %e, "failed to kill traceroute");
            }
            pad_hops(&mut hops, max_hops);
        } else {
            let status = child.wait().await?;
            if !status.success() && hops.is_empty() {
                return Err(ProbeError::Unavailable(format!("traceroute exited with {}", status)));
            }
        }

        debug!(domain, %target, hops = hops.len(), timed_out, "probe finished");
        Ok(ProbeReport {
            target: Some(target),
            hops,
            timed_out,
        })
    }
}

/// Whole seconds for `-w`, rounded up so the wait is never shorter than asked
fn wait_seconds(per_hop_timeout: Duration) -> u64 {
    let secs = per_hop_timeout.as_secs();
    if per_hop_timeout.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs.max(1)
    }
}

/// Append a parsed hop, filling skipped distances and ignoring repeats
fn push_hop(hops: &mut Vec<HopObservation>, hop: HopObservation) {
    let ttl = hop.ttl();
    let next = hops.len() as u16 + 1;
    if u16::from(ttl) < next {
        return;
    }
    for missing in next..u16::from(ttl) {
        hops.push(HopObservation::Unresponsive { ttl: missing as u8 });
    }
    hops.push(hop);
}

/// Mark every distance not yet reported, up to `max_hops`, as unresponsive
fn pad_hops(hops: &mut Vec<HopObservation>, max_hops: u8) {
    for ttl in (hops.len() as u16 + 1)..=u16::from(max_hops) {
        hops.push(HopObservation::Unresponsive { ttl: ttl as u8 });
    }
}

/// Parse one line of traceroute output.
///
/// Returns `None` for lines that are not hop lines (headers, blank lines).
/// When several responders appear on one line the first one wins.
pub fn parse_hop_line(line: &str) -> Option<HopObservation> {
    let mut tokens = line.split_whitespace();
    let ttl: u8 = tokens.next()?.parse().ok()?;
    let rest: Vec<&str> = tokens.collect();

    let mut addr = None;
    let mut hostname = None;
    let mut rtt = None;

    let mut i = 0;
    while i < rest.len() {
        let tok = rest[i];
        if addr.is_none() {
            if let Some(ip) = parse_addr(tok) {
                addr = Some(ip);
            } else if let Some(ip) = rest.get(i + 1).and_then(|next| parse_paren_addr(next)) {
                hostname = Some(sanitize_display(tok));
                addr = Some(ip);
                i += 1;
            }
        } else if let Some(ms) = parse_rtt(tok, rest.get(i + 1).copied()) {
            rtt = Some(ms);
            break;
        }
        i += 1;
    }

    match addr {
        Some(addr) if is_reportable(addr) => Some(HopObservation::Responded {
            ttl,
            addr,
            hostname,
            rtt,
        }),
        _ => Some(HopObservation::Unresponsive { ttl }),
    }
}

fn parse_addr(tok: &str) -> Option<IpAddr> {
    tok.parse().ok()
}

fn parse_paren_addr(tok: &str) -> Option<IpAddr> {
    tok.strip_prefix('(')?.strip_suffix(')')?.parse().ok()
}

/// `1.234 ms` (split over two tokens) or `1.234ms`
fn parse_rtt(tok: &str, next: Option<&str>) -> Option<Duration> {
    let value = match tok.strip_suffix("ms") {
        Some(num) if !num.is_empty() => num,
        _ if next == Some("ms") => tok,
        _ => return None,
    };
    let ms: f64 = value.parse().ok()?;
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some(Duration::from_micros((ms * 1000.0).round() as u64))
}

/// Addresses that never identify a real hop
fn is_reportable(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_unspecified() || v4.octets()[0] == 255),
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}
