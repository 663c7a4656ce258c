use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::simulator::{OrderState, SimulationSummary};

const WIDTH: usize = 80;

/// Writes the fixed-width results table to stdout.
pub fn print_summary(summary: &SimulationSummary) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_summary(&mut out, summary)
}

pub fn write_summary(out: &mut impl Write, summary: &SimulationSummary) -> io::Result<()> {
    let rule = "=".repeat(WIDTH);
    let count = |state: OrderState| summary.state_counts.get(&state).copied().unwrap_or(0);

    writeln!(out)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "SIMULATION RESULTS")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "{:<22}{}", "Total Orders:", summary.total_orders)?;
    writeln!(
        out,
        "{:<22}{} ({:.1}%)",
        "Successful Orders:",
        summary.successful_orders,
        summary.success_rate()
    )?;
    writeln!(out, "{:<22}{}", "Failed Orders:", summary.failed_orders)?;
    writeln!(out, "{:<22}{}", "Interrupted Orders:", summary.interrupted_orders)?;
    writeln!(out, "{:<22}{}", "Pending Termination:", summary.pending_orders)?;
    writeln!(out, "{:<22}{}", "Ended Orders:", count(OrderState::Ended))?;
    writeln!(out, "{:<22}{}", "Cancelled Orders:", count(OrderState::Cancelled))?;
    writeln!(out, "{:<22}{}", "Total Batches:", summary.batches.len())?;
    writeln!(out, "{:<22}{}ms", "Total Duration:", summary.duration_ms)?;
    match summary.average_order_duration_ms {
        Some(ms) => writeln!(out, "{:<22}{}ms", "Avg Order Duration:", ms)?,
        None => writeln!(out, "{:<22}-", "Avg Order Duration:")?,
    }
    writeln!(
        out,
        "{:<22}{} applied, {} failed, {} abandoned",
        "Terminations:",
        summary.terminations.applied,
        summary.terminations.failed,
        summary.terminations.abandoned
    )?;

    if let Some(service) = &summary.service {
        writeln!(out, "{rule}")?;
        writeln!(
            out,
            "{:<12}{:>10}{:>10}{:>10}{:>14}",
            "operation", "requests", "errors", "timeouts", "avg latency"
        )?;
        for op in &service.operations {
            writeln!(
                out,
                "{:<12}{:>10}{:>10}{:>10}{:>12.1}ms",
                op.operation.as_str(),
                op.total_requests,
                op.total_errors,
                op.total_timeouts,
                op.average_latency_ms
            )?;
        }
        writeln!(out, "{:<22}{:?}", "Circuit Breaker:", service.breaker_state)?;
    }

    let failures: Vec<_> = summary.failures().take(10).collect();
    if !failures.is_empty() {
        writeln!(out, "{rule}")?;
        writeln!(out, "First failures:")?;
        for order in failures {
            writeln!(
                out,
                "  {:<16}{}",
                order.order_number,
                order.error.as_deref().unwrap_or("-")
            )?;
        }
    }
    writeln!(out, "{rule}")?;
    Ok(())
}

/// Writes the whole summary as pretty JSON to
/// `<dir>/simulation_results_<YYYYmmdd_HHMMSS>.json` and returns the path.
pub fn save_json(
    dir: impl AsRef<Path>,
    summary: &SimulationSummary,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create results directory {}", dir.display()))?;
    let path = dir.join(format!(
        "simulation_results_{}.json",
        now.format("%Y%m%d_%H%M%S")
    ));
    let data = serde_json::to_vec_pretty(summary).context("failed to serialize results")?;
    std::fs::write(&path, data)
        .with_context(|| format!("failed to write results file {}", path.display()))?;
    Ok(path)
}
