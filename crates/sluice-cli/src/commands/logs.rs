//! Show the log trail of a run

use anyhow::Result;

use crate::output;
use crate::project::Project;

/// Print a run's log entries, oldest first
pub async fn run(config_path: &str, run_id: i64) -> Result<()> {
    let project = Project::open(config_path).await?;
    let entries = project.pipeline.logs(run_id).await?;

    if entries.is_empty() {
        println!("No log entries for run {}", run_id);
        return Ok(());
    }

    println!("{}", output::logs(&entries));
    Ok(())
}
