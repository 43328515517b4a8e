//! Configuration parsing and validation
//!
//! This module handles loading and validating the Sluice project file.
//!
//! # Configuration Files
//!
//! - `sluice.yaml` - Project root configuration (storage, uploads, HTTP, runs)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Name of the project file looked up inside a project directory
pub const CONFIG_FILE: &str = "sluice.yaml";

/// Root project configuration from `sluice.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Ledger and destination storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Where CSV uploads are staged
    #[serde(default)]
    pub uploads: UploadConfig,

    /// HTTP client settings for API extraction
    #[serde(default)]
    pub http: HttpConfig,

    /// Run bookkeeping settings
    #[serde(default)]
    pub runs: RunConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Ledger database, as a file path or a `sqlite:` URL
    #[serde(default = "default_ledger")]
    pub ledger: String,

    /// Destination database; the ledger database is reused when unset
    #[serde(default)]
    pub destination: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger(),
            destination: None,
        }
    }
}

fn default_ledger() -> String {
    ".sluice/sluice.db".to_string()
}

/// Upload staging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory holding staged CSV uploads
    #[serde(default = "default_upload_dir")]
    pub dir: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> String {
    ".sluice/uploads".to_string()
}

/// HTTP client configuration for API sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before retry n is `backoff_base_ms * 2^(n-1)`
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Response statuses that trigger a retry
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

impl HttpConfig {
    /// Request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base backoff delay as a [`Duration`]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

/// Run bookkeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Seconds after which a `running` run is reclaimed as failed
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl RunConfig {
    /// Staleness window as a [`Duration`]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

fn default_stale_after_secs() -> u64 {
    300
}

/// Main configuration container
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Base path of the project
    pub base_path: PathBuf,
}

impl Config {
    /// Load configuration from a directory
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the project directory or sluice.yaml file
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::load("./my-project")?;
    /// println!("Project: {}", config.project.name);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let (config_path, base_path) = if path.is_dir() {
            (path.join(CONFIG_FILE), path.to_path_buf())
        } else {
            (
                path.to_path_buf(),
                path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            )
        };

        if !config_path.exists() {
            return Err(Error::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let project: ProjectConfig = serde_yaml::from_str(&contents)?;
        project.validate()?;

        Ok(Self { project, base_path })
    }

    /// SQLite URL of the ledger database
    pub fn ledger_url(&self) -> String {
        self.storage_url(&self.project.storage.ledger)
    }

    /// SQLite URL of the destination database, if it is separate from the ledger
    pub fn destination_url(&self) -> Option<String> {
        self.project
            .storage
            .destination
            .as_deref()
            .map(|d| self.storage_url(d))
    }

    /// Absolute directory for staged uploads
    pub fn upload_dir(&self) -> PathBuf {
        self.resolve(&self.project.uploads.dir)
    }

    fn storage_url(&self, location: &str) -> String {
        if location.starts_with("sqlite:") {
            location.to_string()
        } else {
            format!("sqlite://{}", self.resolve(location).display())
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}

impl ProjectConfig {
    /// Reject values the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                message: "project name must not be empty".to_string(),
            });
        }
        if self.http.timeout_secs == 0 {
            return Err(Error::ConfigInvalid {
                message: "http.timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.http.max_retries > 10 {
            return Err(Error::ConfigInvalid {
                message: format!(
                    "http.max_retries must be at most 10, got {}",
                    self.http.max_retries
                ),
            });
        }
        Ok(())
    }
}
