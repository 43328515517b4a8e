//! In-memory tabular data
//!
//! A [`Table`] is an ordered list of column names plus rows of JSON cells.
//! Every row has exactly one cell per column; a missing value is
//! [`Value::Null`].

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Read;

use crate::error::{Error, Result};

/// Storage type inferred for a column from its non-null cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Every non-null cell is an integer
    Integer,
    /// Every non-null cell is a number, at least one is not an integer
    Real,
    /// Every non-null cell is a boolean
    Boolean,
    /// Anything else, including all-null columns
    Text,
}

/// Rows-by-columns table of JSON cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table from rows, checking every row has one cell per column
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(Error::table(format!(
                "row {} has {} cells, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from a collection of JSON records
    ///
    /// Objects contribute their keys as columns, in order of first
    /// appearance; keys a record lacks are null. Arrays are positional, with
    /// columns named `0`, `1`, ... and a bare scalar becomes a single column
    /// `0`. Objects cannot be mixed with arrays or scalars.
    pub fn from_records(records: Vec<Value>) -> Result<Self> {
        let objects = records.iter().filter(|r| r.is_object()).count();
        if objects == records.len() {
            return Ok(Self::from_objects(records));
        }
        if objects > 0 {
            return Err(Error::table(
                "records mix objects with arrays or scalar values",
            ));
        }

        let width = records
            .iter()
            .map(|r| r.as_array().map_or(1, Vec::len))
            .max()
            .unwrap_or(0);
        let columns = (0..width).map(|i| i.to_string()).collect();
        let rows = records
            .into_iter()
            .map(|record| {
                let mut cells = match record {
                    Value::Array(items) => items,
                    scalar => vec![scalar],
                };
                cells.resize(width, Value::Null);
                cells
            })
            .collect();
        Ok(Self { columns, rows })
    }

    fn from_objects(records: Vec<Value>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in &records {
            if let Value::Object(map) = record {
                for key in map.keys() {
                    if !positions.contains_key(key) {
                        positions.insert(key.clone(), columns.len());
                        columns.push(key.clone());
                    }
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|record| {
                let mut cells = vec![Value::Null; columns.len()];
                if let Value::Object(map) = record {
                    for (key, value) in map {
                        cells[positions[&key]] = value;
                    }
                }
                cells
            })
            .collect();

        Self { columns, rows }
    }

    /// Parse CSV text with a header row
    ///
    /// A repeated header gets a `.N` suffix on its 2nd and later occurrences
    /// (`a, a` reads as `a, a.1`). Empty fields are null. Each column is then typed as a whole: integers
    /// if every non-null field parses as one, likewise floats, then booleans,
    /// otherwise text. Rows with a different field count than the header are
    /// an error.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
            return Err(Error::table("no columns to parse from CSV input"));
        }
        let columns = dedupe_headers(columns);

        let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            raw_rows.push(
                record
                    .iter()
                    .map(|field| (!field.is_empty()).then(|| field.to_string()))
                    .collect(),
            );
        }

        let parsers: Vec<CsvColumnKind> = (0..columns.len())
            .map(|i| CsvColumnKind::infer(raw_rows.iter().filter_map(|r| r[i].as_deref())))
            .collect();

        let rows = raw_rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&parsers)
                    .map(|(field, kind)| match field {
                        Some(text) => kind.parse(text),
                        None => Value::Null,
                    })
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    /// Column names, in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows, in order
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of one column, top to bottom
    pub fn column(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[index])
    }

    /// Infer the storage type of one column
    pub fn column_type(&self, index: usize) -> ColumnType {
        let mut kind: Option<ColumnType> = None;
        for cell in self.column(index) {
            let cell_kind = match cell {
                Value::Null => continue,
                Value::Bool(_) => ColumnType::Boolean,
                Value::Number(n) if n.is_i64() => ColumnType::Integer,
                // Beyond i64 neither INTEGER nor REAL holds the value exactly
                Value::Number(n) if n.is_u64() => return ColumnType::Text,
                Value::Number(_) => ColumnType::Real,
                _ => return ColumnType::Text,
            };
            kind = Some(match (kind, cell_kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnType::Integer), ColumnType::Real)
                | (Some(ColumnType::Real), ColumnType::Integer) => ColumnType::Real,
                _ => return ColumnType::Text,
            });
        }
        kind.unwrap_or(ColumnType::Text)
    }

    /// Replace the column names; the count must not change
    pub fn with_columns(self, columns: Vec<String>) -> Result<Self> {
        if columns.len() != self.columns.len() {
            return Err(Error::table(format!(
                "cannot rename {} columns with {} names",
                self.columns.len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            rows: self.rows,
        })
    }

    /// Split into column names and rows
    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.columns, self.rows)
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(map)
            })
            .collect()
    }
}

/// Parser chosen for a whole CSV column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl CsvColumnKind {
    fn infer<'a>(mut fields: impl Iterator<Item = &'a str> + Clone) -> Self {
        if fields.clone().all(|f| f.parse::<i64>().is_ok()) {
            CsvColumnKind::Integer
        } else if fields
            .clone()
            .all(|f| f.parse::<f64>().is_ok_and(f64::is_finite))
        {
            CsvColumnKind::Float
        } else if fields.all(|f| parse_bool(f).is_some()) {
            CsvColumnKind::Boolean
        } else {
            CsvColumnKind::Text
        }
    }

    fn parse(&self, field: String) -> Value {
        match self {
            CsvColumnKind::Integer => field.parse::<i64>().map_or(Value::String(field), Value::from),
            CsvColumnKind::Float => field
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::Null, Value::Number),
            CsvColumnKind::Boolean => parse_bool(&field).map_or(Value::String(field), Value::Bool),
            CsvColumnKind::Text => Value::String(field),
        }
    }
}

fn parse_bool(field: &str) -> Option<bool> {
    match field {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Suffix repeated header names with `.1`, `.2`, ... in order of appearance
///
/// A generated name that is itself already taken is suffixed again, so the
/// result never repeats.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|header| {
            let mut name = header;
            let mut seen = counts.get(&name).copied().unwrap_or(0);
            while seen > 0 {
                counts.insert(name.clone(), seen + 1);
                name = format!("{}.{}", name, seen);
                seen = counts.get(&name).copied().unwrap_or(0);
            }
            counts.insert(name.clone(), seen + 1);
            name
        })
        .collect()
}
