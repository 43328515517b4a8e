//! Table transforms
//!
//! The pure half of the transform stage. Each function takes a table by
//! reference or value and returns a new one; logging and run bookkeeping are
//! layered on top by the runtime.
//!
//! # Built-in Transforms
//!
//! - [`normalize_column_name`] / [`normalize_columns`] - identifier-safe column names
//! - [`flatten_nested`] - structured cells become JSON strings
//! - [`drop_empty_rows`] - rows with only null cells are removed

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::table::Table;

static SEPARATOR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-]+").expect("valid regex"));
static UNDERSCORE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("valid regex"));

/// Turn an arbitrary column label into an identifier-like name
///
/// Lowercases, turns whitespace/hyphen runs into `_`, removes everything
/// that is not alphanumeric or `_`, trims `_` from both ends and collapses
/// repeated `_`. The result may be empty.
///
/// ```
/// use sluice_core::transforms::normalize_column_name;
///
/// assert_eq!(normalize_column_name("AGE (years)"), "age_years");
/// ```
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let separated = SEPARATOR_RUN.replace_all(&lowered, "_");
    let kept: String = separated
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    UNDERSCORE_RUN
        .replace_all(kept.trim_matches('_'), "_")
        .into_owned()
}

/// Normalize every column name of a table
///
/// Two columns that normalize to the same name cannot both be loaded, so a
/// collision is an error naming the shared result.
pub fn normalize_columns(table: &Table) -> Result<Table> {
    let names: Vec<String> = table
        .columns()
        .iter()
        .map(|c| normalize_column_name(c))
        .collect();

    let mut seen = HashSet::new();
    if let Some(duplicate) = names.iter().find(|n| !seen.insert(n.as_str())) {
        return Err(Error::table(format!(
            "column names collide after cleaning: '{}'",
            duplicate
        )));
    }

    table.clone().with_columns(names)
}

/// Serialize structured cells (objects and arrays) to JSON strings
///
/// Only columns holding at least one structured cell are touched, and
/// within them scalars and nulls are kept as they are. Returns the new table
/// and the names of the columns that were flattened.
pub fn flatten_nested(table: &Table) -> (Table, Vec<String>) {
    let nested: Vec<usize> = (0..table.columns().len())
        .filter(|&i| table.column(i).any(is_structured))
        .collect();

    let (columns, mut rows) = table.clone().into_parts();
    for &index in &nested {
        let encoded: std::result::Result<Vec<Value>, serde_json::Error> = rows
            .iter()
            .map(|row| encode_cell(&row[index]))
            .collect();
        match encoded {
            Ok(cells) => {
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row[index] = cell;
                }
            }
            Err(e) => {
                tracing::debug!(column = %columns[index], error = %e, "JSON encoding failed, using plain strings");
                for row in rows.iter_mut() {
                    row[index] = Value::String(plain_string(&row[index]));
                }
            }
        }
    }

    let names = nested.iter().map(|&i| columns[i].clone()).collect();
    let flattened = Table::from_rows(columns, rows).unwrap_or_default();
    (flattened, names)
}

/// Remove rows whose cells are all null, returning the table and the count removed
pub fn drop_empty_rows(table: Table) -> (Table, usize) {
    let before = table.len();
    let (columns, rows) = table.into_parts();
    let kept: Vec<Vec<Value>> = rows
        .into_iter()
        .filter(|row| !row.iter().all(Value::is_null))
        .collect();
    let dropped = before - kept.len();
    let table = Table::from_rows(columns, kept).unwrap_or_default();
    (table, dropped)
}

fn is_structured(cell: &Value) -> bool {
    matches!(cell, Value::Object(_) | Value::Array(_))
}

fn encode_cell(cell: &Value) -> serde_json::Result<Value> {
    if is_structured(cell) {
        serde_json::to_string(cell).map(Value::String)
    } else {
        Ok(cell.clone())
    }
}

fn plain_string(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
