//! Error types for sluice-core

use thiserror::Error;

/// Result type alias for sluice-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sluice-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse YAML configuration
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// Data source definition does not match its kind
    #[error("{message}")]
    InvalidSource {
        /// Description of the problem
        message: String,
    },

    /// Job definition rejected before it reached the ledger
    #[error("invalid job: {message}")]
    InvalidJob {
        /// Description of the problem
        message: String,
    },

    /// Rows could not be assembled into a rectangular table
    #[error("table error: {message}")]
    Table {
        /// Description of the shape problem
        message: String,
    },

    /// API response body had a shape that maps to no row collection
    #[error("unsupported JSON response shape: {message}")]
    ResponseShape {
        /// What was found instead
        message: String,
    },

    /// Destination store error
    #[error("destination table '{table}': {message}")]
    Destination {
        /// Destination table name
        table: String,
        /// Description of the error
        message: String,
    },

    /// CSV parse error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::Table`] error
    pub fn table(message: impl Into<String>) -> Self {
        Self::Table {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::Destination`] error
    pub fn destination(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Destination {
            table: table.into(),
            message: message.to_string(),
        }
    }
}
