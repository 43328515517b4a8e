//! Show a job's run history

use anyhow::Result;

use crate::output;
use crate::project::Project;

/// Print a job's runs, newest first
pub async fn run(config_path: &str, job_id: i64) -> Result<()> {
    let project = Project::open(config_path).await?;
    let runs = project.pipeline.history(job_id).await?;

    if runs.is_empty() {
        println!("Job {} has no runs yet", job_id);
        return Ok(());
    }

    println!("{}", output::runs(&runs));
    Ok(())
}
