//! Initialize a new Sluice project

use anyhow::{Context, Result, bail};
use sluice_core::config::CONFIG_FILE;
use std::fs;
use std::path::Path;

/// Scaffold a project in `path`, refusing a directory that already has one
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);
    if project_dir.join(CONFIG_FILE).exists() {
        bail!(
            "Directory '{}' already contains a {}",
            project_dir.display(),
            CONFIG_FILE
        );
    }
    fs::create_dir_all(project_dir)?;

    let abs_path = project_dir.canonicalize()?;
    let project_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Could not determine project name from path")?,
    };

    tracing::info!("Creating new Sluice project: {}", project_name);

    let config = format!(
        r#"# Sluice Project Configuration
name: {project_name}

storage:
  # Run ledger (jobs, runs, logs); a path or a sqlite: URL
  ledger: .sluice/sluice.db
  # Destination tables go to the ledger database unless set
  # destination: .sluice/warehouse.db

uploads:
  dir: .sluice/uploads

http:
  timeout_secs: 10
  max_retries: 3
  backoff_base_ms: 1000
  retry_statuses: [429, 500, 502, 503, 504]

runs:
  stale_after_secs: 300
"#
    );
    fs::write(project_dir.join(CONFIG_FILE), config)?;

    fs::create_dir_all(project_dir.join(".sluice/uploads"))?;

    let gitignore = r#"# Sluice ledger, staged uploads and destination tables
.sluice/

# IDE
.idea/
.vscode/
*.swp
"#;
    fs::write(project_dir.join(".gitignore"), gitignore)?;

    tracing::info!(
        "Created project '{}' at {}",
        project_name,
        abs_path.display()
    );
    tracing::info!("");
    tracing::info!("Next steps:");
    if path != "." {
        tracing::info!("  cd {}", project_dir.display());
    }
    tracing::info!("  sluice job create --name customers --csv customers.csv");
    tracing::info!("  sluice run 1");

    Ok(())
}
