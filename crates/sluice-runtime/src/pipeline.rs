//! Pipeline orchestrator
//!
//! [`Pipeline`] is the caller-facing entry point. It registers jobs, runs
//! extract, transform and load in sequence for one job, finalizes the run,
//! and answers read queries over the ledger and destination store.
//!
//! Runs of the same job are serialized in-process; runs of different jobs
//! proceed independently.

use anyhow::{Context, anyhow, bail};
use chrono::Utc;
use sluice_core::{
    Config, DataSource, DestinationStore, Job, LogEntry, LogLevel, NewJob, Run, RunResult,
    RunStatus, SourceSpec, Stage, Table, naming,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::destination::SqliteDestination;
use crate::error::{PipelineError, Result, StageResult};
use crate::extract::extract;
use crate::http::HttpFetcher;
use crate::ledger::{Ledger, LogsOverview, OverviewFilter};
use crate::load::load;
use crate::transform::transform;

/// Rows returned by [`Pipeline::view_data`] when no limit is given
pub const DEFAULT_PREVIEW_ROWS: usize = 100;

/// Default staleness window for `running` runs
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// A job with its source and run history
#[derive(Debug, Clone)]
pub struct JobDetails {
    /// The job
    pub job: Job,
    /// Its data source
    pub source: Option<DataSource>,
    /// Runs, newest first
    pub runs: Vec<Run>,
    /// Runs reclaimed as stale while inspecting
    pub reclaimed: Vec<i64>,
}

/// Destination table contents for a job
#[derive(Debug, Clone)]
pub struct DataView {
    /// Destination table name
    pub table_name: String,
    /// Whether the table has been created yet
    pub exists: bool,
    /// Rows in the whole table
    pub total_rows: u64,
    /// Leading rows, with the table's columns
    pub preview: Table,
}

/// Runs jobs and records their history
pub struct Pipeline {
    ledger: Ledger,
    destination: Arc<dyn DestinationStore>,
    fetcher: HttpFetcher,
    stale_after: Duration,
    upload_dir: PathBuf,
    job_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Pipeline {
    /// Create a pipeline over explicit store handles
    pub fn new(ledger: Ledger, destination: Arc<dyn DestinationStore>, fetcher: HttpFetcher) -> Self {
        Self {
            ledger,
            destination,
            fetcher,
            stale_after: DEFAULT_STALE_AFTER,
            upload_dir: PathBuf::from(".sluice/uploads"),
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open the ledger, destination and HTTP client described by `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        let ledger = Ledger::open(&config.ledger_url()).await?;
        let destination: Arc<dyn DestinationStore> = match config.destination_url() {
            Some(url) => Arc::new(
                SqliteDestination::connect(&url)
                    .await
                    .with_context(|| format!("Failed to open destination store at {}", url))?,
            ),
            None => Arc::new(SqliteDestination::from_pool(ledger.pool().clone())),
        };
        let fetcher = HttpFetcher::new(&config.project.http).context("Failed to build HTTP client")?;

        Ok(Self::new(ledger, destination, fetcher)
            .with_stale_after(config.project.runs.stale_after())
            .with_upload_dir(config.upload_dir()))
    }

    /// Set the staleness window
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after = window;
        self
    }

    /// Set the directory CSV sources are staged into
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// The run ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Register a job
    ///
    /// A CSV source file is copied into the upload directory as
    /// `job_<id>_<name>` and the job points at the copy.
    pub async fn create_job(&self, new: NewJob) -> Result<Job> {
        new.validate()?;

        let upload = match &new.source {
            SourceSpec::Csv { file_path } => {
                let path = PathBuf::from(file_path);
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !naming::is_allowed_upload(&file_name) {
                    bail!(
                        "Invalid file type. Only {} files are allowed.",
                        naming::ALLOWED_UPLOAD_EXTENSIONS.join(", ")
                    );
                }
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    bail!("CSV file not found: {}", path.display());
                }
                Some((path, file_name))
            }
            SourceSpec::Api { .. } => None,
        };

        let job = self.ledger.create_job(&new).await.context("Failed to register job")?;

        if let Some((path, file_name)) = upload {
            if let Err(e) = self.stage_upload(job.id, &path, &file_name).await {
                self.ledger.delete_job(job.id).await?;
                return Err(e);
            }
        }

        info!(job_id = job.id, table = %job.table_name, "Job registered");
        Ok(job)
    }

    async fn stage_upload(&self, job_id: i64, source: &Path, file_name: &str) -> Result<PathBuf> {
        let staged_name = naming::upload_file_name(job_id, file_name)
            .ok_or_else(|| anyhow!("Upload file name '{}' has no usable characters", file_name))?;
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .with_context(|| format!("Failed to create upload directory {}", self.upload_dir.display()))?;

        let target = self.upload_dir.join(staged_name);
        tokio::fs::copy(source, &target)
            .await
            .with_context(|| format!("Failed to stage {} as {}", source.display(), target.display()))?;
        self.ledger
            .set_source_file(job_id, &target.display().to_string())
            .await?;

        info!(job_id, path = %target.display(), "Staged CSV upload");
        Ok(target)
    }

    /// All jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.ledger.list_jobs().await?)
    }

    /// Load a job with its history, reclaiming its stale runs first
    pub async fn inspect_job(&self, job_id: i64) -> Result<JobDetails> {
        let job = self.require_job(job_id).await?;
        let reclaimed = self
            .ledger
            .reclaim_stale_runs(Some(job_id), Utc::now(), self.stale_after)
            .await?;
        if !reclaimed.is_empty() {
            info!(job_id, count = reclaimed.len(), "Cleaned up stuck runs");
        }

        Ok(JobDetails {
            source: self.ledger.data_source_for_job(job_id).await?,
            runs: self.ledger.runs_for_job(job_id).await?,
            job,
            reclaimed,
        })
    }

    /// Delete a job, its staged upload, and its run history
    ///
    /// The destination table is left in place. Returns `false` when the job
    /// does not exist.
    pub async fn delete_job(&self, job_id: i64) -> Result<bool> {
        if let Some(path) = self
            .ledger
            .data_source_for_job(job_id)
            .await?
            .and_then(|source| source.file_path)
        {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!(job_id, path = %path, "Removed staged upload"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id, path = %path, "Error deleting file: {}", e),
            }
        }

        self.job_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&job_id);

        let deleted = self.ledger.delete_job(job_id).await?;
        if deleted {
            info!(job_id, "Job deleted");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Run the job's pipeline and return the terminal run state
    ///
    /// A stage failure is not an `Err`: it ends the run as `failed` and is
    /// reported in the result. `Err` means the run could not be recorded.
    pub async fn run_job(&self, job_id: i64) -> Result<RunResult> {
        let job = self.require_job(job_id).await?;

        let lock = self.job_lock(job_id);
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(&job).await
        };
        self.release_job_lock(job_id, lock);
        result
    }

    async fn run_locked(&self, job: &Job) -> Result<RunResult> {
        let job_id = job.id;
        let run = self.ledger.create_run(job_id).await?;
        info!(job_id, run_id = run.id, "Starting pipeline run");

        let run = match self.execute(job, run.id).await {
            Ok(()) => self.ledger.finish_run(run.id, RunStatus::Success, None).await?,
            Err(PipelineError::Orchestration(message)) => {
                let run = self
                    .ledger
                    .finish_run(run.id, RunStatus::Failed, Some(&message))
                    .await?;
                self.ledger
                    .log(
                        run.id,
                        Stage::General,
                        LogLevel::Error,
                        &format!("Unexpected error: {}", message),
                    )
                    .await?;
                run
            }
            Err(stage_error) => {
                self.ledger
                    .finish_run(run.id, RunStatus::Failed, Some(&stage_error.to_string()))
                    .await?
            }
        };

        match run.status {
            RunStatus::Success => info!(
                job_id,
                run_id = run.id,
                rows = run.rows_loaded.unwrap_or_default(),
                "Pipeline completed"
            ),
            _ => warn!(
                job_id,
                run_id = run.id,
                error = run.error_message.as_deref().unwrap_or_default(),
                "Pipeline failed"
            ),
        }
        Ok(RunResult::from(&run))
    }

    async fn execute(&self, job: &Job, run_id: i64) -> StageResult<()> {
        let source = self
            .ledger
            .data_source_for_job(job.id)
            .await?
            .ok_or_else(|| PipelineError::Orchestration(format!("Job {} has no data source", job.id)))?;

        let extracted = extract(&self.ledger, &self.fetcher, &source, run_id).await?;
        let cleaned = transform(&self.ledger, &extracted, run_id).await?;
        load(
            &self.ledger,
            self.destination.as_ref(),
            &cleaned,
            &job.table_name,
            job.load_mode,
            run_id,
        )
        .await
    }

    fn job_lock(&self, job_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.job_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(job_id).or_default().clone()
    }

    /// Drop the job's lock entry once no other run holds or awaits it
    fn release_job_lock(&self, job_id: i64, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.job_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = locks
            .get(&job_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(&job_id);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.job_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// A run's log trail, oldest first
    pub async fn logs(&self, run_id: i64) -> Result<Vec<LogEntry>> {
        if self.ledger.run(run_id).await?.is_none() {
            bail!("Run {} not found", run_id);
        }
        Ok(self.ledger.logs_for_run(run_id).await?)
    }

    /// A job's runs, newest first
    pub async fn history(&self, job_id: i64) -> Result<Vec<Run>> {
        self.require_job(job_id).await?;
        Ok(self.ledger.runs_for_job(job_id).await?)
    }

    /// Reclaim stale runs across all jobs
    pub async fn cleanup_stale(&self) -> Result<Vec<i64>> {
        let reclaimed = self
            .ledger
            .reclaim_stale_runs(None, Utc::now(), self.stale_after)
            .await?;
        info!(count = reclaimed.len(), "Stale run cleanup finished");
        Ok(reclaimed)
    }

    /// Runs and recent log activity
    pub async fn overview(&self, filter: &OverviewFilter) -> Result<LogsOverview> {
        Ok(self.ledger.overview(filter).await?)
    }

    // =========================================================================
    // Destination data
    // =========================================================================

    /// Read back a job's destination table, at most `limit` rows
    pub async fn view_data(&self, job_id: i64, limit: usize) -> Result<DataView> {
        let job = self.require_job(job_id).await?;
        let table_name = job.table_name;

        let Some(preview) = self.destination.read(&table_name, Some(limit)).await? else {
            return Ok(DataView {
                table_name,
                exists: false,
                total_rows: 0,
                preview: Table::default(),
            });
        };
        let total_rows = self.destination.row_count(&table_name).await?;

        Ok(DataView {
            table_name,
            exists: true,
            total_rows,
            preview,
        })
    }

    async fn require_job(&self, job_id: i64) -> Result<Job> {
        self.ledger
            .job(job_id)
            .await?
            .ok_or_else(|| anyhow!("Job {} not found", job_id))
    }
}
