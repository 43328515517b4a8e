//! Job, data source, run, and log entry records
//!
//! These are the Run Ledger's records. A job is the root: it owns exactly one
//! data source and any number of runs, and each run owns an append-only
//! sequence of log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::naming;

/// Write policy for the destination table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Drop any existing table and create it from the new rows
    #[default]
    Replace,
    /// Add rows to an existing table, creating it when absent
    Append,
}

impl LoadMode {
    /// Parse a stored mode, falling back to [`LoadMode::Replace`] for anything unknown
    pub fn parse_lossy(raw: &str) -> Self {
        match raw.parse() {
            Ok(mode) => mode,
            Err(_) => {
                tracing::warn!(mode = raw, "unrecognized load mode, using replace");
                LoadMode::Replace
            }
        }
    }

    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Replace => "replace",
            LoadMode::Append => "append",
        }
    }
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Pipeline is in progress
    Running,
    /// All three stages completed
    Success,
    /// A stage failed, or the run went stale
    Failed,
}

impl RunStatus {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Pipeline stage a log entry belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Pulling rows from the source
    Extract,
    /// Cleaning the extracted table
    Transform,
    /// Writing to the destination store
    Load,
    /// Orchestration-level events
    General,
}

impl Stage {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
            Stage::General => "general",
        }
    }
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Normal progress
    Info,
    /// Something unexpected that did not stop the stage
    Warning,
    /// Stage or run failure
    Error,
}

impl LogLevel {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Response format of an API source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    /// JSON body, classified by [`crate::response::classify`]
    Json,
    /// CSV text body
    Csv,
}

impl ApiFormat {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFormat::Json => "json",
            ApiFormat::Csv => "csv",
        }
    }
}

macro_rules! text_enum {
    ($ty:ident, $what:literal, { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {}: {}", $what, other)),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(LoadMode, "load mode", { "replace" => Replace, "append" => Append });
text_enum!(RunStatus, "run status", {
    "running" => Running,
    "success" => Success,
    "failed" => Failed,
});
text_enum!(Stage, "stage", {
    "extract" => Extract,
    "transform" => Transform,
    "load" => Load,
    "general" => General,
});
text_enum!(LogLevel, "log level", { "info" => Info, "warning" => Warning, "error" => Error });
text_enum!(ApiFormat, "API format", { "json" => Json, "csv" => Csv });

/// A registered pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Ledger id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Owning user reference
    pub owner: String,
    /// Destination table name, unique across jobs
    pub table_name: String,
    /// Destination write policy
    pub load_mode: LoadMode,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Validated source definition: exactly the fields its kind needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    /// CSV file on local disk
    Csv {
        /// Path of the (staged) CSV file
        file_path: String,
    },
    /// HTTP API fetched with GET
    Api {
        /// Endpoint URL
        url: String,
        /// Body format
        format: ApiFormat,
    },
}

impl SourceSpec {
    /// Stored `source_type` value
    pub fn kind(&self) -> &'static str {
        match self {
            SourceSpec::Csv { .. } => "csv",
            SourceSpec::Api { .. } => "api",
        }
    }

    /// Check URL syntax for API sources
    pub fn validate(&self) -> Result<()> {
        match self {
            SourceSpec::Csv { file_path } if file_path.trim().is_empty() => {
                Err(Error::InvalidSource {
                    message: "CSV source requires a file path".to_string(),
                })
            }
            SourceSpec::Api { url, .. } if !naming::is_valid_url(url) => Err(Error::InvalidSource {
                message: format!("Invalid API URL: {}", url),
            }),
            _ => Ok(()),
        }
    }
}

/// A job's data source as persisted in the ledger
///
/// The stored columns are kept raw so that a row written by an older or
/// foreign writer still loads; [`DataSource::spec`] is where the kind and
/// its fields are checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    /// Ledger id
    pub id: i64,
    /// Owning job
    pub job_id: i64,
    /// `csv` or `api`
    pub source_type: String,
    /// CSV file path
    pub file_path: Option<String>,
    /// API URL
    pub api_url: Option<String>,
    /// API body format
    pub api_format: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl DataSource {
    /// Resolve the stored columns into a [`SourceSpec`]
    pub fn spec(&self) -> Result<SourceSpec> {
        match self.source_type.as_str() {
            "csv" => {
                let file_path = self.file_path.clone().ok_or_else(|| Error::InvalidSource {
                    message: "CSV source has no file path".to_string(),
                })?;
                Ok(SourceSpec::Csv { file_path })
            }
            "api" => {
                let url = self.api_url.clone().ok_or_else(|| Error::InvalidSource {
                    message: "API source has no URL".to_string(),
                })?;
                let raw_format = self.api_format.as_deref().unwrap_or_default();
                let format = raw_format.parse().map_err(|_| Error::InvalidSource {
                    message: format!("Unsupported API format: {}", raw_format),
                })?;
                Ok(SourceSpec::Api { url, format })
            }
            other => Err(Error::InvalidSource {
                message: format!("Unknown source type: {}", other),
            }),
        }
    }
}

/// Input for registering a new job
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Owning user reference
    pub owner: String,
    /// Destination write policy
    pub load_mode: LoadMode,
    /// Data source definition
    pub source: SourceSpec,
}

impl NewJob {
    /// Check the name and source before anything is persisted
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidJob {
                message: "job name is required".to_string(),
            });
        }
        self.source.validate()
    }
}

/// One execution attempt of a job's pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Ledger id
    pub id: i64,
    /// Owning job
    pub job_id: i64,
    /// Current state
    pub status: RunStatus,
    /// When the run was created
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Rows produced by the extract stage
    pub rows_extracted: Option<i64>,
    /// Rows left after the transform stage
    pub rows_transformed: Option<i64>,
    /// Rows written by the load stage
    pub rows_loaded: Option<i64>,
    /// Failure description for failed runs
    pub error_message: Option<String>,
}

impl Run {
    /// Whether a `running` run started before `now - window`
    pub fn is_stale(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return false;
        };
        self.status == RunStatus::Running && self.started_at < now - window
    }
}

/// Caller-facing outcome of a pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Run id, for fetching logs
    pub run_id: i64,
    /// Terminal status
    pub status: RunStatus,
    /// Rows produced by the extract stage
    pub rows_extracted: Option<i64>,
    /// Rows left after the transform stage
    pub rows_transformed: Option<i64>,
    /// Rows written by the load stage
    pub rows_loaded: Option<i64>,
    /// Failure description
    pub error_message: Option<String>,
}

impl From<&Run> for RunResult {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            rows_extracted: run.rows_extracted,
            rows_transformed: run.rows_transformed,
            rows_loaded: run.rows_loaded,
            error_message: run.error_message.clone(),
        }
    }
}

/// An append-only entry in a run's log trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Ledger id
    pub id: i64,
    /// Owning run
    pub run_id: i64,
    /// Stage that wrote the entry
    pub stage: Stage,
    /// Free-text message
    pub message: String,
    /// Severity
    pub level: LogLevel,
    /// When the entry was written
    pub timestamp: DateTime<Utc>,
}
