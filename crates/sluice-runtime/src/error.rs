//! Runtime error types

use thiserror::Error;

/// Result type for application-level runtime operations
pub type Result<T> = anyhow::Result<T>;

/// Runtime error (re-export anyhow for application-level errors)
pub type Error = anyhow::Error;

/// Why a pipeline run failed
///
/// Each stage logs its own failure before returning one of the stage
/// variants; the message is what ends up in the run's `error_message`.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source could not be read or parsed
    #[error("{0}")]
    Extraction(String),

    /// Extracted table could not be cleaned
    #[error("{0}")]
    Transformation(String),

    /// Destination write failed
    #[error("{0}")]
    Load(String),

    /// Anything outside the three stages, including ledger failures
    #[error("{0}")]
    Orchestration(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Orchestration(format!("run ledger error: {}", err))
    }
}

/// Outcome of a single pipeline stage
pub type StageResult<T> = std::result::Result<T, PipelineError>;
