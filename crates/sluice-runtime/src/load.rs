//! Load stage: write a cleaned table to the destination store

use sluice_core::{DestinationStore, LoadMode, LogLevel, Stage, Table};

use crate::error::{PipelineError, StageResult};
use crate::ledger::{Ledger, RowCounter};

/// Write `table` to `table_name` under `mode`
///
/// `replace` drops any existing table before creating it from `table`.
/// `append` inserts into an existing table and creates it when absent. On
/// success `rows_loaded` is set on the run; on failure it stays unset.
pub async fn load(
    ledger: &Ledger,
    store: &dyn DestinationStore,
    table: &Table,
    table_name: &str,
    mode: LoadMode,
    run_id: i64,
) -> StageResult<()> {
    ledger
        .log(
            run_id,
            Stage::Load,
            LogLevel::Info,
            &format!("Starting data load to table: {} (mode: {})", table_name, mode),
        )
        .await?;

    if let Err(e) = write(ledger, store, table, table_name, mode, run_id).await? {
        let message = format!("Load failed: {}", e);
        ledger
            .log(run_id, Stage::Load, LogLevel::Error, &message)
            .await?;
        return Err(PipelineError::Load(message));
    }

    ledger
        .record_rows(
            run_id,
            RowCounter::Loaded,
            table.len(),
            &format!("Successfully loaded {} rows to table: {}", table.len(), table_name),
        )
        .await?;
    Ok(())
}

/// Store operations for one load; the outer error is a ledger failure
async fn write(
    ledger: &Ledger,
    store: &dyn DestinationStore,
    table: &Table,
    table_name: &str,
    mode: LoadMode,
    run_id: i64,
) -> StageResult<sluice_core::Result<()>> {
    let exists = match store.exists(table_name).await {
        Ok(exists) => exists,
        Err(e) => return Ok(Err(e)),
    };

    match (mode, exists) {
        (LoadMode::Replace, true) => {
            if let Err(e) = store.drop_table(table_name).await {
                return Ok(Err(e));
            }
            ledger
                .log(
                    run_id,
                    Stage::Load,
                    LogLevel::Info,
                    &format!("Dropped existing table: {}", table_name),
                )
                .await?;
            Ok(store.create(table_name, table).await)
        }
        (LoadMode::Append, true) => {
            let existing = match store.row_count(table_name).await {
                Ok(count) => count,
                Err(e) => return Ok(Err(e)),
            };
            ledger
                .log(
                    run_id,
                    Stage::Load,
                    LogLevel::Info,
                    &format!(
                        "Table {} exists with {} rows, appending new data",
                        table_name, existing
                    ),
                )
                .await?;
            Ok(store.append(table_name, table).await)
        }
        (_, false) => {
            ledger
                .log(
                    run_id,
                    Stage::Load,
                    LogLevel::Info,
                    &format!("Creating new table: {}", table_name),
                )
                .await?;
            Ok(store.create(table_name, table).await)
        }
    }
}
