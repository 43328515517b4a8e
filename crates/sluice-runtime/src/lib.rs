//! Sluice Runtime
//!
//! This crate executes Sluice pipelines against real stores.
//!
//! # Features
//!
//! - Run ledger on SQLite via sqlx, with embedded migrations
//! - SQLite destination store
//! - Retrying HTTP fetcher for API sources
//! - Extract, transform and load stages that log to the ledger
//! - The [`Pipeline`] orchestrator
//!
//! # Usage
//!
//! ```rust,ignore
//! use sluice_core::Config;
//! use sluice_runtime::Pipeline;
//!
//! let config = Config::load(".")?;
//! let pipeline = Pipeline::from_config(&config).await?;
//! let result = pipeline.run_job(job_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod db;
pub mod destination;
pub mod error;
pub mod extract;
pub mod http;
pub mod ledger;
pub mod load;
pub mod pipeline;
pub mod transform;

pub use destination::SqliteDestination;
pub use error::{Error, PipelineError, Result};
pub use http::HttpFetcher;
pub use ledger::{Ledger, LogsOverview, OverviewFilter};
pub use pipeline::{DataView, JobDetails, Pipeline};
