//! Open the project a command operates on

use anyhow::{Context, Result};
use sluice_core::Config;
use sluice_runtime::Pipeline;

/// Loaded configuration plus a pipeline over the project's stores
pub struct Project {
    /// Project configuration
    pub config: Config,
    /// Pipeline over the configured ledger and destination
    pub pipeline: Pipeline,
}

impl Project {
    /// Load `config_path` and open the stores it names
    pub async fn open(config_path: &str) -> Result<Self> {
        tracing::debug!("Loading configuration from {}", config_path);
        let config = Config::load(config_path).context("Failed to load configuration")?;

        tracing::debug!(
            project = %config.project.name,
            ledger = %config.ledger_url(),
            "Opening run ledger"
        );
        let pipeline = Pipeline::from_config(&config)
            .await
            .context("Failed to open project stores")?;

        Ok(Self { config, pipeline })
    }
}
