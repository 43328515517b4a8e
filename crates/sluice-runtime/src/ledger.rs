//! Run ledger backed by SQLite
//!
//! Persists jobs, their data sources, runs, and each run's log trail. Every
//! log entry written through [`Ledger::log`] or [`Ledger::record_rows`] is
//! mirrored as a `tracing` event at the matching level.

use anyhow::Context;
use chrono::{DateTime, Utc};
use sluice_core::naming;
use sluice_core::{DataSource, Job, LoadMode, LogEntry, LogLevel, NewJob, Run, RunStatus, SourceSpec, Stage};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use std::time::Duration;

use crate::db;
use crate::error::Result;

/// Number of log entries returned by [`Ledger::overview`]
pub const RECENT_LOG_LIMIT: i64 = 50;

/// Run counter written by a stage on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCounter {
    /// `rows_extracted`
    Extracted,
    /// `rows_transformed`
    Transformed,
    /// `rows_loaded`
    Loaded,
}

impl RowCounter {
    /// Stage that owns this counter
    pub fn stage(&self) -> Stage {
        match self {
            RowCounter::Extracted => Stage::Extract,
            RowCounter::Transformed => Stage::Transform,
            RowCounter::Loaded => Stage::Load,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            RowCounter::Extracted => "rows_extracted",
            RowCounter::Transformed => "rows_transformed",
            RowCounter::Loaded => "rows_loaded",
        }
    }
}

/// Filters for [`Ledger::overview`]
#[derive(Debug, Clone, Default)]
pub struct OverviewFilter {
    /// Only runs of this job
    pub job_id: Option<i64>,
    /// Only runs in this state
    pub status: Option<RunStatus>,
    /// Only log entries from this stage
    pub stage: Option<Stage>,
}

/// Runs and recent log activity across jobs
#[derive(Debug, Clone)]
pub struct LogsOverview {
    /// Matching runs, newest first
    pub runs: Vec<Run>,
    /// Number of matching runs
    pub total_runs: usize,
    /// Matching runs that succeeded
    pub successful_runs: usize,
    /// Matching runs that failed
    pub failed_runs: usize,
    /// Most recent matching log entries, newest first
    pub recent_logs: Vec<LogEntry>,
    /// Number of log entries matching the stage filter
    pub total_logs: i64,
}

/// Handle on the run ledger database
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (or create) the ledger at `url` and apply migrations
    pub async fn open(url: &str) -> Result<Self> {
        let pool = db::connect(url)
            .await
            .with_context(|| format!("Failed to open run ledger at {}", url))?;
        db::migrate(&pool)
            .await
            .context("Failed to migrate run ledger")?;
        Ok(Self { pool })
    }

    /// Wrap an already migrated pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Jobs and data sources
    // =========================================================================

    /// Register a job and its data source
    ///
    /// The destination table name depends on the job id, so the job row is
    /// inserted first and named inside the same transaction.
    pub async fn create_job(&self, new: &NewJob) -> sqlx::Result<Job> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let job_id = sqlx::query(
            r#"
            INSERT INTO jobs (name, description, owner, load_mode, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.owner)
        .bind(new.load_mode.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE jobs SET table_name = ?1 WHERE id = ?2")
            .bind(naming::table_name(&new.name, job_id))
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        let (file_path, api_url, api_format) = match &new.source {
            SourceSpec::Csv { file_path } => (Some(file_path.as_str()), None, None),
            SourceSpec::Api { url, format } => (None, Some(url.as_str()), Some(format.as_str())),
        };
        sqlx::query(
            r#"
            INSERT INTO data_sources (job_id, source_type, file_path, api_url, api_format, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(job_id)
        .bind(new.source.kind())
        .bind(file_path)
        .bind(api_url)
        .bind(api_format)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(job_id, name = %new.name, source = new.source.kind(), "Created job");

        self.job(job_id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Point a CSV source at a new file
    pub async fn set_source_file(&self, job_id: i64, file_path: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE data_sources SET file_path = ?1 WHERE job_id = ?2 AND source_type = 'csv'")
            .bind(file_path)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE jobs SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a job by id
    pub async fn job(&self, job_id: i64) -> sqlx::Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// All jobs, newest first
    pub async fn list_jobs(&self) -> sqlx::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// The data source owned by a job
    pub async fn data_source_for_job(&self, job_id: i64) -> sqlx::Result<Option<DataSource>> {
        let row = sqlx::query("SELECT * FROM data_sources WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(data_source_from_row).transpose()
    }

    /// Delete a job with its data source, runs and log entries
    ///
    /// Returns `false` when no such job exists.
    pub async fn delete_job(&self, job_id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Start a new run in the `running` state
    pub async fn create_run(&self, job_id: i64) -> sqlx::Result<Run> {
        let run_id = sqlx::query("INSERT INTO runs (job_id, status, started_at) VALUES (?1, ?2, ?3)")
            .bind(job_id)
            .bind(RunStatus::Running.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.run(run_id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Fetch a run by id
    pub async fn run(&self, run_id: i64) -> sqlx::Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Runs of a job, most recently started first
    pub async fn runs_for_job(&self, job_id: i64) -> sqlx::Result<Vec<Run>> {
        let rows = sqlx::query("SELECT * FROM runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    /// Set a stage counter and write the log entry reporting it, atomically
    pub async fn record_rows(
        &self,
        run_id: i64,
        counter: RowCounter,
        count: usize,
        message: &str,
    ) -> sqlx::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "UPDATE runs SET {} = ?1 WHERE id = ?2 AND status = ?3",
            counter.column()
        ))
        .bind(count as i64)
        .bind(run_id)
        .bind(RunStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;
        insert_log(&mut tx, run_id, counter.stage(), LogLevel::Info, message).await?;
        tx.commit().await?;

        mirror(run_id, counter.stage(), LogLevel::Info, message);
        Ok(())
    }

    /// Move a `running` run to a terminal state
    ///
    /// A run that is already terminal (for example reclaimed as stale while
    /// it was still working) keeps its stored state, which is returned as is.
    pub async fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> sqlx::Result<Run> {
        let updated = sqlx::query(
            r#"
            UPDATE runs SET status = ?1, completed_at = ?2, error_message = ?3
            WHERE id = ?4 AND status = ?5
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error_message)
        .bind(run_id)
        .bind(RunStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        let run = self.run(run_id).await?.ok_or(sqlx::Error::RowNotFound)?;
        if updated.rows_affected() == 0 {
            tracing::warn!(
                run_id,
                stored = %run.status,
                attempted = %status,
                "Run already terminal, keeping stored state"
            );
        }
        Ok(run)
    }

    /// Fail every `running` run older than `window`, optionally for one job
    ///
    /// Each reclaimed run gets exactly one `general` log entry. A run that
    /// reached a terminal state after it was scanned is left alone. Returns
    /// the ids of the runs that were reclaimed.
    pub async fn reclaim_stale_runs(
        &self,
        job_id: Option<i64>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> sqlx::Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE status = ?1 AND (?2 IS NULL OR job_id = ?2) ORDER BY id",
        )
        .bind(RunStatus::Running.as_str())
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let error_message = format!("Job timed out after {} (auto-cancelled)", describe_window(window));
        let log_message = format!(
            "Job automatically cancelled due to timeout (exceeded {})",
            describe_window(window)
        );

        let mut reclaimed = Vec::new();
        for row in &rows {
            let run = run_from_row(row)?;
            if !run.is_stale(now, window) {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            let updated = sqlx::query(
                r#"
                UPDATE runs SET status = ?1, completed_at = ?2, error_message = ?3
                WHERE id = ?4 AND status = ?5
                "#,
            )
            .bind(RunStatus::Failed.as_str())
            .bind(now)
            .bind(&error_message)
            .bind(run.id)
            .bind(RunStatus::Running.as_str())
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 1 {
                insert_log(&mut tx, run.id, Stage::General, LogLevel::Error, &log_message).await?;
                tx.commit().await?;
                mirror(run.id, Stage::General, LogLevel::Error, &log_message);
                reclaimed.push(run.id);
            } else {
                tx.rollback().await?;
            }
        }

        Ok(reclaimed)
    }

    // =========================================================================
    // Log entries
    // =========================================================================

    /// Append a log entry to a run's trail
    pub async fn log(&self, run_id: i64, stage: Stage, level: LogLevel, message: &str) -> sqlx::Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_log(&mut conn, run_id, stage, level, message).await?;
        mirror(run_id, stage, level, message);
        Ok(())
    }

    /// A run's log trail, oldest first
    pub async fn logs_for_run(&self, run_id: i64) -> sqlx::Result<Vec<LogEntry>> {
        let rows = sqlx::query("SELECT * FROM log_entries WHERE run_id = ?1 ORDER BY timestamp ASC, id ASC")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    /// Runs, their outcome counts, and recent log activity
    pub async fn overview(&self, filter: &OverviewFilter) -> sqlx::Result<LogsOverview> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE (?1 IS NULL OR job_id = ?1) AND (?2 IS NULL OR status = ?2)
            ORDER BY started_at DESC, id DESC
            "#,
        )
        .bind(filter.job_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        let runs = rows.iter().map(run_from_row).collect::<sqlx::Result<Vec<_>>>()?;

        let stage = filter.stage.map(|s| s.as_str());
        let log_rows = sqlx::query(
            r#"
            SELECT * FROM log_entries
            WHERE (?1 IS NULL OR stage = ?1)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(stage)
        .bind(RECENT_LOG_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        let recent_logs = log_rows.iter().map(log_from_row).collect::<sqlx::Result<Vec<_>>>()?;

        let total_logs: i64 = sqlx::query("SELECT COUNT(*) AS count FROM log_entries WHERE (?1 IS NULL OR stage = ?1)")
            .bind(stage)
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;

        Ok(LogsOverview {
            total_runs: runs.len(),
            successful_runs: runs.iter().filter(|r| r.status == RunStatus::Success).count(),
            failed_runs: runs.iter().filter(|r| r.status == RunStatus::Failed).count(),
            runs,
            recent_logs,
            total_logs,
        })
    }
}

async fn insert_log(
    conn: &mut SqliteConnection,
    run_id: i64,
    stage: Stage,
    level: LogLevel,
    message: &str,
) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO log_entries (run_id, stage, message, level, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)")
        .bind(run_id)
        .bind(stage.as_str())
        .bind(message)
        .bind(level.as_str())
        .bind(Utc::now())
        .execute(conn)
        .await?;
    Ok(())
}

fn mirror(run_id: i64, stage: Stage, level: LogLevel, message: &str) {
    let stage = stage.as_str();
    match level {
        LogLevel::Info => tracing::info!(run_id, stage, "{}", message),
        LogLevel::Warning => tracing::warn!(run_id, stage, "{}", message),
        LogLevel::Error => tracing::error!(run_id, stage, "{}", message),
    }
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s >= 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{} seconds", s),
    }
}

fn parse_column<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> sqlx::Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

fn job_from_row(row: &SqliteRow) -> sqlx::Result<Job> {
    let id: i64 = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let table_name: Option<String> = row.try_get("table_name")?;
    let load_mode: String = row.try_get("load_mode")?;
    Ok(Job {
        table_name: table_name.unwrap_or_else(|| naming::table_name(&name, id)),
        id,
        name,
        description: row.try_get("description")?,
        owner: row.try_get("owner")?,
        load_mode: LoadMode::parse_lossy(&load_mode),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn data_source_from_row(row: &SqliteRow) -> sqlx::Result<DataSource> {
    Ok(DataSource {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        source_type: row.try_get("source_type")?,
        file_path: row.try_get("file_path")?,
        api_url: row.try_get("api_url")?,
        api_format: row.try_get("api_format")?,
        created_at: row.try_get("created_at")?,
    })
}

fn run_from_row(row: &SqliteRow) -> sqlx::Result<Run> {
    Ok(Run {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        status: parse_column(row, "status")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        rows_extracted: row.try_get("rows_extracted")?,
        rows_transformed: row.try_get("rows_transformed")?,
        rows_loaded: row.try_get("rows_loaded")?,
        error_message: row.try_get("error_message")?,
    })
}

fn log_from_row(row: &SqliteRow) -> sqlx::Result<LogEntry> {
    Ok(LogEntry {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        stage: parse_column(row, "stage")?,
        level: parse_column(row, "level")?,
        message: row.try_get("message")?,
        timestamp: row.try_get("timestamp")?,
    })
}
