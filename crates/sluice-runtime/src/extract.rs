//! Extract stage: read a job's data source into a [`Table`]

use sluice_core::response::classify;
use sluice_core::{ApiFormat, DataSource, LogLevel, SourceSpec, Stage, Table};

use crate::error::{PipelineError, StageResult};
use crate::http::HttpFetcher;
use crate::ledger::{Ledger, RowCounter};

/// Pull rows from `source`, logging each step to the run's trail
///
/// On success `rows_extracted` is set on the run.
pub async fn extract(
    ledger: &Ledger,
    fetcher: &HttpFetcher,
    source: &DataSource,
    run_id: i64,
) -> StageResult<Table> {
    match source.spec() {
        Ok(SourceSpec::Csv { file_path }) => extract_csv(ledger, &file_path, run_id).await,
        Ok(SourceSpec::Api { url, format }) => {
            extract_api(ledger, fetcher, &url, format, run_id).await
        }
        Err(e) => fail(ledger, run_id, e.to_string()).await,
    }
}

async fn extract_csv(ledger: &Ledger, file_path: &str, run_id: i64) -> StageResult<Table> {
    ledger
        .log(
            run_id,
            Stage::Extract,
            LogLevel::Info,
            &format!("Starting CSV extraction from {}", file_path),
        )
        .await?;

    let parsed = match tokio::fs::read(file_path).await {
        Ok(bytes) => Table::from_csv_reader(bytes.as_slice()),
        Err(e) => Err(e.into()),
    };
    let table = match parsed {
        Ok(table) => table,
        Err(e) => return fail(ledger, run_id, format!("CSV extraction failed: {}", e)).await,
    };

    ledger
        .record_rows(
            run_id,
            RowCounter::Extracted,
            table.len(),
            &format!("Successfully extracted {} rows from CSV", table.len()),
        )
        .await?;
    Ok(table)
}

async fn extract_api(
    ledger: &Ledger,
    fetcher: &HttpFetcher,
    url: &str,
    format: ApiFormat,
    run_id: i64,
) -> StageResult<Table> {
    ledger
        .log(
            run_id,
            Stage::Extract,
            LogLevel::Info,
            &format!("Starting API extraction from {}", url),
        )
        .await?;
    ledger
        .log(
            run_id,
            Stage::Extract,
            LogLevel::Info,
            &format!(
                "Attempting API request with retry strategy ({})",
                fetcher.policy().describe()
            ),
        )
        .await?;

    let body = match fetcher.get_text(url).await {
        Ok(body) => body,
        Err(e) => return fail(ledger, run_id, format!("API request failed: {}", e)).await,
    };

    let parsed = match format {
        ApiFormat::Json => parse_json(ledger, &body, run_id).await?,
        ApiFormat::Csv => Table::from_csv_reader(body.as_bytes()),
    };
    let table = match parsed {
        Ok(table) => table,
        Err(e) => return fail(ledger, run_id, format!("API extraction failed: {}", e)).await,
    };

    ledger
        .record_rows(
            run_id,
            RowCounter::Extracted,
            table.len(),
            &format!("Successfully extracted {} rows from API", table.len()),
        )
        .await?;
    Ok(table)
}

/// Decode and classify a JSON body; the outer error is a ledger failure
async fn parse_json(
    ledger: &Ledger,
    body: &str,
    run_id: i64,
) -> StageResult<sluice_core::Result<Table>> {
    let shape = match serde_json::from_str::<serde_json::Value>(body)
        .map_err(sluice_core::Error::from)
        .and_then(classify)
    {
        Ok(shape) => shape,
        Err(e) => return Ok(Err(e)),
    };

    if let Some(decision) = shape.describe() {
        ledger
            .log(run_id, Stage::Extract, LogLevel::Info, &decision)
            .await?;
    }
    Ok(Table::from_records(shape.into_records()))
}

async fn fail(ledger: &Ledger, run_id: i64, message: String) -> StageResult<Table> {
    ledger
        .log(run_id, Stage::Extract, LogLevel::Error, &message)
        .await?;
    Err(PipelineError::Extraction(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use serde_json::json;
    use sluice_core::{LoadMode, NewJob};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        ledger: Ledger,
        fetcher: HttpFetcher,
        run_id: i64,
    }

    async fn fixture(source: SourceSpec) -> (Fixture, DataSource) {
        let ledger = Ledger::open("sqlite::memory:").await.unwrap();
        let job = ledger
            .create_job(&NewJob {
                name: "extract test".to_string(),
                description: None,
                owner: "tester".to_string(),
                load_mode: LoadMode::Replace,
                source,
            })
            .await
            .unwrap();
        let source = ledger.data_source_for_job(job.id).await.unwrap().unwrap();
        let run = ledger.create_run(job.id).await.unwrap();
        let fetcher = HttpFetcher::with_policy(RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(5),
            retry_statuses: vec![429, 500, 502, 503, 504],
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        (
            Fixture {
                ledger,
                fetcher,
                run_id: run.id,
            },
            source,
        )
    }

    async fn json_server(body: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    fn api(server: &MockServer, format: ApiFormat) -> SourceSpec {
        SourceSpec::Api {
            url: format!("{}/export", server.uri()),
            format,
        }
    }

    async fn messages(fx: &Fixture) -> Vec<String> {
        fx.ledger
            .logs_for_run(fx.run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.message)
            .collect()
    }

    #[tokio::test]
    async fn test_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "name,age\nada,36\ngrace,85\n").unwrap();
        let (fx, source) = fixture(SourceSpec::Csv {
            file_path: path.display().to_string(),
        })
        .await;

        let table = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap();
        assert_eq!(table.len(), 2);

        let run = fx.ledger.run(fx.run_id).await.unwrap().unwrap();
        assert_eq!(run.rows_extracted, Some(2));
        let logs = messages(&fx).await;
        assert!(logs[0].starts_with("Starting CSV extraction from"));
        assert_eq!(logs[1], "Successfully extracted 2 rows from CSV");
    }

    #[tokio::test]
    async fn test_missing_csv_file() {
        let (fx, source) = fixture(SourceSpec::Csv {
            file_path: "/definitely/not/here.csv".to_string(),
        })
        .await;

        let err = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ref m) if m.starts_with("CSV extraction failed")));

        let logs = fx.ledger.logs_for_run(fx.run_id).await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.stage, Stage::Extract);
        let run = fx.ledger.run(fx.run_id).await.unwrap().unwrap();
        assert!(run.rows_extracted.is_none());
    }

    #[tokio::test]
    async fn test_ragged_csv_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        std::fs::write(&path, "a,b\n1,2\n3\n").unwrap();
        let (fx, source) = fixture(SourceSpec::Csv {
            file_path: path.display().to_string(),
        })
        .await;

        let err = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_json_single_object() {
        let server = json_server(json!({"a": 1})).await;
        let (fx, source) = fixture(api(&server, ApiFormat::Json)).await;

        let table = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap();
        assert_eq!(table.len(), 1);
        assert!(
            messages(&fx)
                .await
                .contains(&"API returned single object, converted to list with 1 record".to_string())
        );
    }

    #[tokio::test]
    async fn test_json_wrapped_results() {
        let server = json_server(json!({"results": [{"a": 1}, {"a": 2}]})).await;
        let (fx, source) = fixture(api(&server, ApiFormat::Json)).await;

        let table = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap();
        assert_eq!(table.len(), 2);
        let logs = messages(&fx).await;
        assert!(logs.contains(&"Extracted data from \"results\" field in response".to_string()));
        assert_eq!(logs.last().unwrap(), "Successfully extracted 2 rows from API");
    }

    #[tokio::test]
    async fn test_json_bare_list() {
        let server = json_server(json!([{"a": 1}])).await;
        let (fx, source) = fixture(api(&server, ApiFormat::Json)).await;

        let table = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap();
        assert_eq!(table.len(), 1);
        let run = fx.ledger.run(fx.run_id).await.unwrap().unwrap();
        assert_eq!(run.rows_extracted, Some(1));
    }

    #[tokio::test]
    async fn test_json_unsupported_shape() {
        let server = json_server(json!({"values": [1, 2, 3]})).await;
        let (fx, source) = fixture(api(&server, ApiFormat::Json)).await;

        let err = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap_err();
        match err {
            PipelineError::Extraction(message) => {
                assert!(message.starts_with("API extraction failed"));
                assert!(message.contains("unsupported JSON response shape"));
            }
            other => panic!("Expected extraction error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_csv_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("id,city\n1,Oslo\n2,Lima\n3,Pune\n"))
            .mount(&server)
            .await;
        let (fx, source) = fixture(api(&server, ApiFormat::Csv)).await;

        let table = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap();
        assert_eq!(table.columns(), &["id", "city"]);
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn test_api_logs_retry_strategy() {
        let server = json_server(json!([])).await;
        let (fx, source) = fixture(api(&server, ApiFormat::Json)).await;

        extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap();
        let logs = messages(&fx).await;
        assert_eq!(logs[1], "Attempting API request with retry strategy (3 retries, 2s timeout)");
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_an_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;
        let (fx, source) = fixture(api(&server, ApiFormat::Json)).await;

        let err = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ref m) if m.starts_with("API request failed")));
    }

    #[tokio::test]
    async fn test_unknown_source_type() {
        let (fx, mut source) = fixture(SourceSpec::Csv {
            file_path: "unused.csv".to_string(),
        })
        .await;
        source.source_type = "ftp".to_string();

        let err = extract(&fx.ledger, &fx.fetcher, &source, fx.run_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ref m) if m == "Unknown source type: ftp"));
        let logs = fx.ledger.logs_for_run(fx.run_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
    }
}
