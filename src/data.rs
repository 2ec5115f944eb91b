//! Record loading for `for x in $cat("file") -> ...` loops.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a data file.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("read file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse JSON")]
    Json(#[from] serde_json::Error),
    #[error("parse YAML")]
    Yaml(#[from] serde_yml::Error),
    /// Structured files must hold a top-level array of records.
    #[error("{0} must be an array")]
    NotAnArray(&'static str),
    #[error("unsupported file type: {0:?} (use .txt, .json, .yaml, .yml)")]
    UnsupportedType(String),
}

/// One item produced by a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A plain value, substituted for `$var` / `${var}`.
    Scalar(String),
    /// A field mapping, read through `$(var->field)` placeholders.
    Fields(HashMap<String, String>),
}

impl Record {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Record::Fields(
                map.into_iter()
                    .map(|(k, v)| (k, value_to_text(v)))
                    .collect(),
            ),
            other => Record::Scalar(value_to_text(other)),
        }
    }
}

/// Renders a JSON/YAML value the way it reads in a command line: strings unquoted,
/// everything else in its compact JSON form.
fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn records_from_array(value: Value, format: &'static str) -> Result<Vec<Record>, DataError> {
    match value {
        Value::Array(items) => Ok(items.into_iter().map(Record::from_value).collect()),
        _ => Err(DataError::NotAnArray(format)),
    }
}

/// Loads the records of a data file, choosing the format from its extension.
///
/// - `.txt`: one scalar per non-blank line (lines are trimmed).
/// - `.json`, `.yaml`, `.yml`: a top-level array; objects become [`Record::Fields`],
///   anything else becomes [`Record::Scalar`].
pub fn load_records(path: &Path) -> Result<Vec<Record>, DataError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if !matches!(ext.as_str(), "txt" | "json" | "yaml" | "yml") {
        return Err(DataError::UnsupportedType(format!(".{ext}")));
    }

    let text = fs::read_to_string(path).map_err(|source| DataError::Read {
        path: path.display().to_string(),
        source,
    })?;

    match ext.as_str() {
        "txt" => Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| Record::Scalar(l.to_string()))
            .collect()),
        "json" => records_from_array(serde_json::from_str(&text)?, "JSON"),
        _ => records_from_array(serde_yml::from_str(&text)?, "YAML"),
    }
}
