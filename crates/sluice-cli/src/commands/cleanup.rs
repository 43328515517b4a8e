//! Reclaim runs stuck in `running`

use anyhow::Result;

use crate::project::Project;

/// Fail every run older than the configured staleness window
pub async fn run(config_path: &str) -> Result<()> {
    let project = Project::open(config_path).await?;
    tracing::debug!(
        stale_after_secs = project.config.project.runs.stale_after_secs,
        "Looking for stuck runs"
    );

    let reclaimed = project.pipeline.cleanup_stale().await?;
    if reclaimed.is_empty() {
        println!("No stuck runs found");
    } else {
        println!("Successfully cleaned up {} stuck run(s)", reclaimed.len());
        for run_id in reclaimed {
            tracing::info!(run_id, "Run marked as failed");
        }
    }
    Ok(())
}
