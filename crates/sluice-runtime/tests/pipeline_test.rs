//! End-to-end pipeline tests
//!
//! Each test drives a [`Pipeline`] over an in-memory ledger (or a project
//! directory) and checks the run ledger and destination table afterwards:
//! - Load modes across consecutive runs
//! - Stage failures and the counters they leave behind
//! - Stale run reclamation
//! - API sources with retries

use chrono::Utc;
use rstest::rstest;
use serde_json::{Value, json};
use sluice_core::{
    ApiFormat, Config, LoadMode, LogLevel, NewJob, RunStatus, SourceSpec, Stage,
};
use sluice_runtime::http::RetryPolicy;
use sluice_runtime::{HttpFetcher, Ledger, OverviewFilter, Pipeline, SqliteDestination};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn pipeline(upload_dir: &Path) -> Pipeline {
    let ledger = Ledger::open("sqlite::memory:").await.unwrap();
    let destination = Arc::new(SqliteDestination::from_pool(ledger.pool().clone()));
    let fetcher = HttpFetcher::with_policy(RetryPolicy {
        max_retries: 3,
        backoff_base: Duration::from_millis(5),
        retry_statuses: vec![429, 500, 502, 503, 504],
        timeout: Duration::from_secs(2),
    })
    .unwrap();
    Pipeline::new(ledger, destination, fetcher).with_upload_dir(upload_dir)
}

fn csv_job(path: &Path, mode: LoadMode) -> NewJob {
    NewJob {
        name: "Customer Export".to_string(),
        description: Some("test job".to_string()),
        owner: "tester".to_string(),
        load_mode: mode,
        source: SourceSpec::Csv {
            file_path: path.display().to_string(),
        },
    }
}

fn api_job(url: String) -> NewJob {
    NewJob {
        name: "Users API".to_string(),
        description: None,
        owner: "tester".to_string(),
        load_mode: LoadMode::Replace,
        source: SourceSpec::Api {
            url,
            format: ApiFormat::Json,
        },
    }
}

/// Path the pipeline actually reads for a CSV job
async fn staged_path(pipeline: &Pipeline, job_id: i64) -> String {
    pipeline
        .ledger()
        .data_source_for_job(job_id)
        .await
        .unwrap()
        .unwrap()
        .file_path
        .unwrap()
}

// =============================================================================
// Load Modes
// =============================================================================

#[tokio::test]
async fn test_replace_leaves_only_latest_rows_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("customers.csv");
    std::fs::write(&file, "Customer ID,Name\n1,Ada\n2,Grace\n3,Linus\n").unwrap();
    let pipeline = pipeline(&dir.path().join("uploads")).await;
    let job = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();

    let first = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.rows_loaded, Some(3));

    std::fs::write(staged_path(&pipeline, job.id).await, "Email,Active\na@x.io,true\nb@x.io,false\n").unwrap();
    let second = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(second.status, RunStatus::Success);

    let view = pipeline.view_data(job.id, 100).await.unwrap();
    assert_eq!(view.total_rows, 2);
    assert_eq!(view.preview.columns(), &["email", "active"]);
    assert_eq!(view.preview.rows()[0], vec![json!("a@x.io"), json!(true)]);
}

#[tokio::test]
async fn test_append_accumulates_rows() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("events.csv");
    std::fs::write(&file, "id,kind\n1,click\n2,view\n").unwrap();
    let pipeline = pipeline(&dir.path().join("uploads")).await;
    let job = pipeline.create_job(csv_job(&file, LoadMode::Append)).await.unwrap();

    pipeline.run_job(job.id).await.unwrap();
    std::fs::write(staged_path(&pipeline, job.id).await, "id,kind\n3,click\n4,view\n5,view\n").unwrap();
    let second = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.rows_loaded, Some(3));

    let view = pipeline.view_data(job.id, 100).await.unwrap();
    assert_eq!(view.total_rows, 5);
    assert_eq!(view.preview.rows()[0], vec![json!(1), json!("click")]);
    assert_eq!(view.preview.rows()[1], vec![json!(2), json!("view")]);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_transform_failure_leaves_only_extract_counter() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("orders.csv");
    std::fs::write(&file, "Order Id,order-id\n1,2\n").unwrap();
    let pipeline = pipeline(&dir.path().join("uploads")).await;
    let job = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();

    let result = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.rows_extracted, Some(1));
    assert_eq!(result.rows_transformed, None);
    assert_eq!(result.rows_loaded, None);
    assert!(result.error_message.unwrap().starts_with("Transformation failed"));

    let logs = pipeline.logs(result.run_id).await.unwrap();
    assert!(
        logs.iter()
            .any(|l| l.stage == Stage::Transform && l.level == LogLevel::Error)
    );
    assert!(!logs.iter().any(|l| l.stage == Stage::Load));

    let view = pipeline.view_data(job.id, 10).await.unwrap();
    assert!(!view.exists);
}

#[tokio::test]
async fn test_repeated_csv_header_loads() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("pairs.csv");
    std::fs::write(&file, "a,a\n1,2\n").unwrap();
    let pipeline = pipeline(&dir.path().join("uploads")).await;
    let job = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();

    let result = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.rows_loaded, Some(1));

    let view = pipeline.view_data(job.id, 10).await.unwrap();
    assert_eq!(view.preview.columns(), &["a", "a1"]);
    assert_eq!(view.preview.rows()[0], vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_extract_failure_skips_later_stages() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.csv");
    std::fs::write(&file, "a\n1\n").unwrap();
    let pipeline = pipeline(&dir.path().join("uploads")).await;
    let job = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();
    std::fs::remove_file(staged_path(&pipeline, job.id).await).unwrap();

    let result = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.rows_extracted, None);

    let logs = pipeline.logs(result.run_id).await.unwrap();
    assert!(logs.iter().all(|l| l.stage == Stage::Extract));
    let run = pipeline.ledger().run(result.run_id).await.unwrap().unwrap();
    assert!(run.completed_at.is_some());
}

// =============================================================================
// Stale Runs
// =============================================================================

#[tokio::test]
async fn test_stale_run_reclaimed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.csv");
    std::fs::write(&file, "a\n1\n").unwrap();
    let pipeline = pipeline(&dir.path().join("uploads")).await;
    let job = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();

    let run = pipeline.ledger().create_run(job.id).await.unwrap();
    sqlx::query("UPDATE runs SET started_at = ?1 WHERE id = ?2")
        .bind(Utc::now() - chrono::Duration::minutes(10))
        .bind(run.id)
        .execute(pipeline.ledger().pool())
        .await
        .unwrap();

    let details = pipeline.inspect_job(job.id).await.unwrap();
    assert_eq!(details.reclaimed, vec![run.id]);
    assert_eq!(details.runs[0].status, RunStatus::Failed);

    assert!(pipeline.cleanup_stale().await.unwrap().is_empty());
    assert!(pipeline.inspect_job(job.id).await.unwrap().reclaimed.is_empty());

    let logs = pipeline.logs(run.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].stage, Stage::General);
    assert_eq!(logs[0].level, LogLevel::Error);
}

#[tokio::test]
async fn test_cleanup_spans_jobs_and_spares_fresh_runs() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.csv");
    std::fs::write(&file, "a\n1\n").unwrap();
    let pipeline = pipeline(&dir.path().join("uploads")).await;
    let a = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();
    let b = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();

    let old_a = pipeline.ledger().create_run(a.id).await.unwrap();
    let old_b = pipeline.ledger().create_run(b.id).await.unwrap();
    let fresh = pipeline.ledger().create_run(b.id).await.unwrap();
    sqlx::query("UPDATE runs SET started_at = ?1 WHERE id IN (?2, ?3)")
        .bind(Utc::now() - chrono::Duration::hours(1))
        .bind(old_a.id)
        .bind(old_b.id)
        .execute(pipeline.ledger().pool())
        .await
        .unwrap();

    let reclaimed = pipeline.cleanup_stale().await.unwrap();
    assert_eq!(reclaimed, vec![old_a.id, old_b.id]);
    let fresh = pipeline.ledger().run(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, RunStatus::Running);
}

#[tokio::test]
async fn test_run_reclaimed_mid_flight_stays_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"a": 1}]))
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path())
        .await
        .with_stale_after(Duration::from_millis(100));
    let job = pipeline.create_job(api_job(server.uri())).await.unwrap();

    let (result, reclaimed) = tokio::join!(pipeline.run_job(job.id), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        pipeline.cleanup_stale().await
    });
    let result = result.unwrap();
    let reclaimed = reclaimed.unwrap();

    assert_eq!(reclaimed, vec![result.run_id]);
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error_message.unwrap().contains("auto-cancelled"));
    assert!(result.rows_loaded.is_none());

    let run = pipeline.ledger().run(result.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let timeouts = pipeline
        .logs(result.run_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|l| l.stage == Stage::General && l.message.contains("timeout"))
        .count();
    assert_eq!(timeouts, 1);
}

// =============================================================================
// API Sources
// =============================================================================

#[tokio::test]
async fn test_api_source_survives_two_503s() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"User Id": 1}, {"User Id": 2}]})))
        .with_priority(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path()).await;
    let job = pipeline.create_job(api_job(format!("{}/users", server.uri()))).await.unwrap();

    let result = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.rows_loaded, Some(2));

    let view = pipeline.view_data(job.id, 10).await.unwrap();
    assert_eq!(view.preview.columns(), &["user_id"]);
}

#[tokio::test]
async fn test_api_source_fails_after_four_503s() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path()).await;
    let job = pipeline.create_job(api_job(format!("{}/users", server.uri()))).await.unwrap();

    let result = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error_message.unwrap().starts_with("API request failed"));
}

#[rstest]
#[case(json!({"a": 1}), 1)]
#[case(json!({"results": [{"a": 1}, {"a": 2}]}), 2)]
#[case(json!([{"a": 1}]), 1)]
#[case(json!({"items": [{"a": 1}, {"a": null}, {"a": 3}], "total": 3}), 3)]
#[tokio::test]
async fn test_json_shapes_end_to_end(#[case] body: Value, #[case] rows: i64) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path()).await;
    let job = pipeline.create_job(api_job(server.uri())).await.unwrap();

    let result = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.rows_extracted, Some(rows));
}

// =============================================================================
// Project Configuration
// =============================================================================

#[tokio::test]
async fn test_pipeline_from_project_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("sluice.yaml"),
        "name: e2e\nhttp:\n  backoff_base_ms: 1\n",
    )
    .unwrap();
    let file = dir.path().join("input.csv");
    std::fs::write(&file, "Name,Score\nada,9.5\n,\nlinus,7\n").unwrap();

    let config = Config::load(dir.path()).unwrap();
    let pipeline = Pipeline::from_config(&config).await.unwrap();
    let job = pipeline.create_job(csv_job(&file, LoadMode::Replace)).await.unwrap();

    let result = pipeline.run_job(job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.rows_extracted, Some(3));
    assert_eq!(result.rows_transformed, Some(2));
    assert!(dir.path().join(".sluice/sluice.db").exists());
    assert!(
        dir.path()
            .join(".sluice/uploads")
            .join(format!("job_{}_input.csv", job.id))
            .exists()
    );

    let overview = pipeline.overview(&OverviewFilter::default()).await.unwrap();
    assert_eq!(overview.total_runs, 1);
    assert_eq!(overview.successful_runs, 1);
    assert!(overview.total_logs > 0);
}
