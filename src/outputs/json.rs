//! JSON run reports.
//!
//! Each run writes one file, grouped by the UTC date the run started:
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     └── run-080000.json
//! ```

use crate::models::RunSummary;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write a [`RunSummary`] to `{report_dir}/{date}/run-{HHMMSS}.json`.
///
/// Returns the path of the written file.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display()))]
pub async fn write_run_summary(
    summary: &RunSummary,
    report_dir: &Path,
) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let json = serde_json::to_string_pretty(summary)?;

    let day_dir = report_dir.join(summary.started_at.format("%Y-%m-%d").to_string());
    info!(day_dir = %day_dir.display(), "Ensuring report directory exists");
    if let Err(e) = fs::create_dir_all(&day_dir).await {
        error!(day_dir = %day_dir.display(), error = %e, "Failed to create report dir");
        return Err(e.into());
    }

    let path = day_dir.join(format!("run-{}.json", summary.started_at.format("%H%M%S")));
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");

    Ok(path)
}
