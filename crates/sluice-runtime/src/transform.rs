//! Transform stage: clean an extracted table
//!
//! Works on a copy. Column names are normalized, structured cells are
//! flattened to JSON strings, and all-null rows are dropped.

use sluice_core::transforms::{drop_empty_rows, flatten_nested, normalize_columns};
use sluice_core::{LogLevel, Stage, Table};

use crate::error::{PipelineError, StageResult};
use crate::ledger::{Ledger, RowCounter};

/// Clean `table`, logging each step to the run's trail
///
/// On success `rows_transformed` is set on the run.
pub async fn transform(ledger: &Ledger, table: &Table, run_id: i64) -> StageResult<Table> {
    ledger
        .log(run_id, Stage::Transform, LogLevel::Info, "Starting data transformation")
        .await?;
    let initial_rows = table.len();

    let normalized = match normalize_columns(table) {
        Ok(normalized) => normalized,
        Err(e) => {
            let message = format!("Transformation failed: {}", e);
            ledger
                .log(run_id, Stage::Transform, LogLevel::Error, &message)
                .await?;
            return Err(PipelineError::Transformation(message));
        }
    };
    ledger
        .log(
            run_id,
            Stage::Transform,
            LogLevel::Info,
            &format!(
                "Cleaned column names: {} columns processed",
                normalized.columns().len()
            ),
        )
        .await?;

    let (flattened, nested) = flatten_nested(&normalized);
    if !nested.is_empty() {
        ledger
            .log(
                run_id,
                Stage::Transform,
                LogLevel::Info,
                &format!(
                    "Flattened {} nested columns to JSON strings: {}",
                    nested.len(),
                    nested.join(", ")
                ),
            )
            .await?;
    }

    let (cleaned, dropped) = drop_empty_rows(flattened);
    if dropped > 0 {
        ledger
            .log(
                run_id,
                Stage::Transform,
                LogLevel::Info,
                &format!("Dropped {} completely empty rows", dropped),
            )
            .await?;
    }

    ledger
        .record_rows(
            run_id,
            RowCounter::Transformed,
            cleaned.len(),
            &format!(
                "Transformation completed: {} -> {} rows",
                initial_rows,
                cleaned.len()
            ),
        )
        .await?;
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use sluice_core::{LoadMode, NewJob, SourceSpec};

    async fn setup() -> (Ledger, i64) {
        let ledger = Ledger::open("sqlite::memory:").await.unwrap();
        let job = ledger
            .create_job(&NewJob {
                name: "transform test".to_string(),
                description: None,
                owner: "tester".to_string(),
                load_mode: LoadMode::Replace,
                source: SourceSpec::Csv {
                    file_path: "in.csv".to_string(),
                },
            })
            .await
            .unwrap();
        let run = ledger.create_run(job.id).await.unwrap();
        (ledger, run.id)
    }

    #[tokio::test]
    async fn test_transform_logs_each_step() {
        let (ledger, run_id) = setup().await;
        let table = Table::from_rows(
            vec!["First Name".into(), "Meta".into()],
            vec![
                vec![json!("ada"), json!({"team": "core"})],
                vec![Value::Null, Value::Null],
                vec![json!("grace"), Value::Null],
            ],
        )
        .unwrap();

        let cleaned = transform(&ledger, &table, run_id).await.unwrap();
        assert_eq!(cleaned.columns(), &["first_name", "meta"]);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(table.columns(), &["First Name", "Meta"]);

        let messages: Vec<String> = ledger
            .logs_for_run(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Starting data transformation",
                "Cleaned column names: 2 columns processed",
                "Flattened 1 nested columns to JSON strings: meta",
                "Dropped 1 completely empty rows",
                "Transformation completed: 3 -> 2 rows",
            ]
        );

        let run = ledger.run(run_id).await.unwrap().unwrap();
        assert_eq!(run.rows_transformed, Some(2));
    }

    #[tokio::test]
    async fn test_transform_skips_optional_logs() {
        let (ledger, run_id) = setup().await;
        let table = Table::from_rows(vec!["a".into()], vec![vec![json!(1)]]).unwrap();

        transform(&ledger, &table, run_id).await.unwrap();
        let logs = ledger.logs_for_run(run_id).await.unwrap();
        assert_eq!(logs.len(), 3);
    }

    #[tokio::test]
    async fn test_column_collision_fails_transform() {
        let (ledger, run_id) = setup().await;
        let table =
            Table::from_rows(vec!["Order Id".into(), "order-id".into()], vec![vec![json!(1), json!(2)]])
                .unwrap();

        let err = transform(&ledger, &table, run_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transformation(ref m) if m.contains("order_id")));

        let logs = ledger.logs_for_run(run_id).await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.stage, Stage::Transform);
        assert_eq!(last.level, LogLevel::Error);
        let run = ledger.run(run_id).await.unwrap().unwrap();
        assert!(run.rows_transformed.is_none());
    }
}
