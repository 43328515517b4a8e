//! Summarize runs and recent log activity

use anyhow::Result;
use sluice_core::{RunStatus, Stage};
use sluice_runtime::OverviewFilter;

use crate::output;
use crate::project::Project;

/// Print run counts, matching runs and the most recent log entries
pub async fn run(
    config_path: &str,
    job_id: Option<i64>,
    status: Option<RunStatus>,
    stage: Option<Stage>,
) -> Result<()> {
    let project = Project::open(config_path).await?;
    let filter = OverviewFilter {
        job_id,
        status,
        stage,
    };
    let overview = project.pipeline.overview(&filter).await?;

    let mut summary = output::table(["Runs", "Successful", "Failed", "Log entries"]);
    summary.add_row(vec![
        overview.total_runs.to_string(),
        overview.successful_runs.to_string(),
        overview.failed_runs.to_string(),
        overview.total_logs.to_string(),
    ]);
    println!("{}", summary);

    if overview.runs.is_empty() {
        println!("\nNo runs match");
    } else {
        println!("\n{}", output::runs(&overview.runs));
    }

    if !overview.recent_logs.is_empty() {
        println!("\nRecent log entries:");
        println!("{}", output::logs(&overview.recent_logs));
    }
    Ok(())
}
