//! export.rs
//! End-of-run summary: one `metric,value,description` row per statistic.

use std::{fs::create_dir_all, path::Path};

use csv::Writer;
use log::info;
use serde::Serialize;

use crate::utils::metrics::LoopStats;

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    metric: &'a str,
    value: String,
    description: &'a str,
}

/// Writes the run summary to `path`, creating parent directories as needed.
pub fn export_summary_csv(stats: &LoopStats, path: &Path) -> Result<(), csv::Error> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_dir_all(dir)?;
    }
    let mut wtr = Writer::from_path(path)?;

    let mut row = |metric: &str, value: String, description: &str| {
        wtr.serialize(SummaryRow {
            metric,
            value,
            description,
        })
    };
    row("cycles", stats.cycles.to_string(), "Control cycles run")?;
    row("inferences", stats.inferences.to_string(), "Cycles that ran the policy")?;
    row("deadline_misses", stats.deadline_misses.to_string(), "Late cycle releases")?;
    row(
        "deadline_miss_rate_pct",
        format!("{:.3}", stats.deadline_miss_rate()),
        "Late releases as a share of cycles",
    )?;
    row("emergency_stops", stats.emergency_stops.to_string(), "Tilt trips")?;
    if let Some(mean) = stats.mean_latency_us() {
        row("latency_avg_us", format!("{:.2}", mean), "Mean cycle latency")?;
    }
    if let Some(max) = stats.max_latency_us() {
        row("latency_max_us", format!("{:.2}", max), "Worst cycle latency")?;
    }
    for (kind, count) in &stats.errors {
        row(&format!("errors.{}", kind), count.to_string(), "Failed cycles of this kind")?;
    }

    wtr.flush()?;
    info!("Summary written to {}", path.display());
    Ok(())
}
