//! Job management commands

use anyhow::{Result, bail};
use sluice_core::{ApiFormat, LoadMode, NewJob, SourceSpec};

use crate::output;
use crate::project::Project;

/// Build the source definition from the mutually exclusive flags
pub fn source_spec(
    csv: Option<String>,
    api_url: Option<String>,
    api_format: ApiFormat,
) -> Result<SourceSpec> {
    match (csv, api_url) {
        (Some(file_path), None) => Ok(SourceSpec::Csv { file_path }),
        (None, Some(url)) => Ok(SourceSpec::Api {
            url,
            format: api_format,
        }),
        _ => bail!("Exactly one of --csv or --api-url is required"),
    }
}

/// Register a job
pub async fn create(
    config_path: &str,
    name: String,
    description: Option<String>,
    owner: String,
    load_mode: LoadMode,
    source: SourceSpec,
) -> Result<()> {
    let project = Project::open(config_path).await?;
    let job = project
        .pipeline
        .create_job(NewJob {
            name,
            description,
            owner,
            load_mode,
            source,
        })
        .await?;

    println!(
        "Created job {} \"{}\" (table: {}, mode: {})",
        job.id, job.name, job.table_name, job.load_mode
    );
    Ok(())
}

/// List jobs, newest first
pub async fn list(config_path: &str) -> Result<()> {
    let project = Project::open(config_path).await?;
    let jobs = project.pipeline.list_jobs().await?;

    if jobs.is_empty() {
        println!("No jobs registered");
        return Ok(());
    }

    let mut table = output::table(["ID", "Name", "Owner", "Table", "Mode", "Created"]);
    for job in &jobs {
        table.add_row(vec![
            job.id.to_string(),
            job.name.clone(),
            job.owner.clone(),
            job.table_name.clone(),
            job.load_mode.to_string(),
            output::timestamp(&job.created_at),
        ]);
    }
    println!("{}", table);
    Ok(())
}

/// Show a job, reclaiming its stale runs first
pub async fn show(config_path: &str, job_id: i64) -> Result<()> {
    let project = Project::open(config_path).await?;
    let details = project.pipeline.inspect_job(job_id).await?;
    let job = &details.job;

    if !details.reclaimed.is_empty() {
        println!("Cleaned up {} stuck run(s)", details.reclaimed.len());
    }

    println!("Job {}: {}", job.id, job.name);
    if let Some(description) = &job.description {
        println!("  Description: {}", description);
    }
    println!("  Owner:       {}", job.owner);
    println!("  Table:       {}", job.table_name);
    println!("  Load mode:   {}", job.load_mode);
    if let Some(source) = &details.source {
        match source.spec() {
            Ok(SourceSpec::Csv { file_path }) => println!("  Source:      csv {}", file_path),
            Ok(SourceSpec::Api { url, format }) => {
                println!("  Source:      api {} ({})", url, format)
            }
            Err(e) => println!("  Source:      {}", e),
        }
    }
    println!("  Created:     {}", output::timestamp(&job.created_at));

    if details.runs.is_empty() {
        println!("\nNo runs yet");
    } else {
        println!("\n{}", output::runs(&details.runs));
    }
    Ok(())
}

/// Delete a job
pub async fn delete(config_path: &str, job_id: i64) -> Result<()> {
    let project = Project::open(config_path).await?;
    if !project.pipeline.delete_job(job_id).await? {
        bail!("Job {} not found", job_id);
    }
    println!("Job {} deleted", job_id);
    Ok(())
}
