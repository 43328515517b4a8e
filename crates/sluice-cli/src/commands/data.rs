//! Show a job's destination table

use anyhow::Result;

use crate::output;
use crate::project::Project;

/// Print up to `limit` rows of the job's destination table
pub async fn run(config_path: &str, job_id: i64, limit: usize) -> Result<()> {
    let project = Project::open(config_path).await?;
    let view = project.pipeline.view_data(job_id, limit).await?;

    if !view.exists {
        println!("Data table does not exist. Please run the ETL pipeline first.");
        return Ok(());
    }

    let mut table = output::table(view.preview.columns().iter().map(String::as_str));
    for row in view.preview.rows() {
        table.add_row(row.iter().map(output::cell).collect::<Vec<_>>());
    }

    println!("Table: {}", view.table_name);
    println!("{}", table);
    println!("Showing {} of {} rows", view.preview.len(), view.total_rows);
    Ok(())
}
