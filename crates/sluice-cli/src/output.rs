//! Terminal tables

use chrono::{DateTime, Utc};
use comfy_table::{Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use serde_json::Value;
use sluice_core::{LogEntry, Run};

/// Empty table with the house style
pub fn table<I, S>(header: I) -> Table
where
    I: IntoIterator<Item = S>,
    S: Into<comfy_table::Cell>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

/// Runs as a table
pub fn runs(runs: &[Run]) -> Table {
    let mut out = table([
        "Run", "Job", "Status", "Started", "Completed", "Extracted", "Transformed", "Loaded",
        "Error",
    ]);
    for run in runs {
        out.add_row(vec![
            run.id.to_string(),
            run.job_id.to_string(),
            run.status.to_string(),
            timestamp(&run.started_at),
            run.completed_at.as_ref().map(timestamp).unwrap_or_default(),
            count(run.rows_extracted),
            count(run.rows_transformed),
            count(run.rows_loaded),
            run.error_message.clone().unwrap_or_default(),
        ]);
    }
    out
}

/// Log entries as a table
pub fn logs(entries: &[LogEntry]) -> Table {
    let mut out = table(["Time", "Run", "Stage", "Level", "Message"]);
    for entry in entries {
        out.add_row(vec![
            timestamp(&entry.timestamp),
            entry.run_id.to_string(),
            entry.stage.to_string(),
            entry.level.to_string(),
            entry.message.clone(),
        ]);
    }
    out
}

/// Render a timestamp for display
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render an optional counter, `-` when unset
pub fn count(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |n| n.to_string())
}

/// Render a destination cell
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
