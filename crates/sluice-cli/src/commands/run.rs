//! Run a job's pipeline

use anyhow::{Context, Result, bail};
use sluice_core::RunStatus;

use crate::output;
use crate::project::Project;

/// Run the pipeline once and report the outcome
///
/// A failed run is an error so the process exits non-zero.
pub async fn run(config_path: &str, job_id: i64) -> Result<()> {
    let project = Project::open(config_path).await?;

    tracing::info!("Project: {}", project.config.project.name);
    let result = project
        .pipeline
        .run_job(job_id)
        .await
        .context("Pipeline could not be run")?;

    let mut table = output::table(["Run", "Status", "Extracted", "Transformed", "Loaded"]);
    table.add_row(vec![
        result.run_id.to_string(),
        result.status.to_string(),
        output::count(result.rows_extracted),
        output::count(result.rows_transformed),
        output::count(result.rows_loaded),
    ]);
    println!("{}", table);

    if result.status != RunStatus::Success {
        bail!(
            "Run {} failed: {}",
            result.run_id,
            result.error_message.unwrap_or_default()
        );
    }

    println!(
        "Pipeline completed successfully! Processed {} rows.",
        result.rows_loaded.unwrap_or_default()
    );
    Ok(())
}
