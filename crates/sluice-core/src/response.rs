//! JSON API response shapes
//!
//! APIs wrap their records in different ways. [`classify`] maps a decoded
//! body onto one of a few known shapes, checked in a fixed order:
//!
//! 1. a bare array is the record list
//! 2. an object with no array-valued fields is a single record
//! 3. an object with an array under `data`, `results`, `items` or `records`
//!    (first match in that order) wraps the record list
//!
//! Anything else is rejected.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Keys searched for a wrapped record list, in priority order
pub const WRAPPER_KEYS: [&str; 4] = ["data", "results", "items", "records"];

/// Recognized shape of a JSON response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// Body was an array of records
    List(Vec<Value>),
    /// Body was one record
    SingleObject(Map<String, Value>),
    /// Body held the record list under a known key
    Wrapped {
        /// Key the records were found under
        key: &'static str,
        /// The records
        records: Vec<Value>,
    },
}

impl ResponseShape {
    /// The record collection this shape stands for
    pub fn into_records(self) -> Vec<Value> {
        match self {
            ResponseShape::List(records) => records,
            ResponseShape::SingleObject(map) => vec![Value::Object(map)],
            ResponseShape::Wrapped { records, .. } => records,
        }
    }

    /// What was decided, phrased for a run log
    pub fn describe(&self) -> Option<String> {
        match self {
            ResponseShape::List(_) => None,
            ResponseShape::SingleObject(_) => {
                Some("API returned single object, converted to list with 1 record".to_string())
            }
            ResponseShape::Wrapped { key, .. } => {
                Some(format!("Extracted data from \"{}\" field in response", key))
            }
        }
    }
}

/// Classify a decoded JSON body
pub fn classify(body: Value) -> Result<ResponseShape> {
    match body {
        Value::Array(records) => Ok(ResponseShape::List(records)),
        Value::Object(map) if !map.values().any(Value::is_array) => {
            Ok(ResponseShape::SingleObject(map))
        }
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if map.get(key).is_some_and(Value::is_array) {
                    if let Some(Value::Array(records)) = map.remove(key) {
                        return Ok(ResponseShape::Wrapped { key, records });
                    }
                }
            }
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            Err(Error::ResponseShape {
                message: format!(
                    "object with list fields but none of {} (keys: {})",
                    WRAPPER_KEYS.join(", "),
                    keys.join(", ")
                ),
            })
        }
        other => Err(Error::ResponseShape {
            message: format!("expected an array or object, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
