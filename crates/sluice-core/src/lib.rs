//! Sluice Core Library
//!
//! This crate provides the pure building blocks of a Sluice pipeline:
//! - Configuration parsing and validation
//! - The job / data source / run / log entry data model
//! - The in-memory [`Table`] and the transform primitives applied to it
//! - API response shape classification
//! - The [`DestinationStore`] trait that loaders write through
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Extract   │────▶│  Transform  │────▶│    Load     │
//! │ (CSV / API) │     │  (Table)    │     │ Destination │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_core::{Table, transforms};
//!
//! let table = Table::from_csv_reader("First Name,Age\nAda,36\n".as_bytes())?;
//! let cleaned = transforms::normalize_columns(&table)?;
//! assert_eq!(cleaned.columns(), &["first_name", "age"]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod destination;
pub mod error;
pub mod model;
pub mod naming;
pub mod response;
pub mod table;
pub mod transforms;

pub use config::Config;
pub use destination::DestinationStore;
pub use error::{Error, Result};
pub use model::{
    ApiFormat, DataSource, Job, LoadMode, LogEntry, LogLevel, NewJob, Run, RunResult, RunStatus,
    SourceSpec, Stage,
};
pub use table::Table;
