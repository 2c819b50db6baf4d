use std::io::Write;

use crate::pipeline::{DomainStatus, RunSummary};

/// Write a fixed-width text report of a run
pub fn generate_report<W: Write>(summary: &RunSummary, mut writer: W) -> std::io::Result<()> {
    writeln!(
        writer,
        "pathgraph report: {} domains, {} merged, {} failed",
        summary.outcomes.len(),
        summary.merged(),
        summary.failed()
    )?;
    writeln!(
        writer,
        "Started: {}  Finished: {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(writer)?;

    // Header
    writeln!(
        writer,
        "{:<40} {:<16} {:>5} {:>5}  {:<39}",
        "Domain", "Status", "Resp", "Lost", "Target"
    )?;
    writeln!(writer, "{}", "-".repeat(110))?;

    for outcome in &summary.outcomes {
        let (responded, lost) = match &outcome.status {
            DomainStatus::Merged {
                responded,
                unresponsive,
                ..
            } => (responded.to_string(), unresponsive.to_string()),
            _ => ("-".to_string(), "-".to_string()),
        };

        let mut status = outcome.status.label().to_string();
        if matches!(
            outcome.status,
            DomainStatus::Merged { timed_out: true, .. } | DomainStatus::NoHops { timed_out: true }
        ) {
            status.push_str(" (timeout)");
        }

        let target = outcome
            .target
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());

        writeln!(
            writer,
            "{:<40} {:<16} {:>5} {:>5}  {:<39}",
            outcome.domain, status, responded, lost, target
        )?;

        if let DomainStatus::ResolveFailed { reason }
        | DomainStatus::ProbeFailed { reason }
        | DomainStatus::Rejected { reason } = &outcome.status
        {
            writeln!(writer, "    {}", reason)?;
        }
    }

    writeln!(writer)?;
    writeln!(
        writer,
        "Graph: {} hops ({} located), {} domains, {} edges",
        summary.stats.hops, summary.stats.located, summary.stats.domains, summary.stats.edges
    )?;

    Ok(())
}
