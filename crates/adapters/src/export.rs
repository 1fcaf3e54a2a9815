use std::fs;
use std::path::Path;

use bpfq_core::row_buffer::Record;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cell text for a scalar: strings unquoted, `null` as empty.
#[must_use]
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn export_records_to_csv(
    path: &Path,
    headers: &[String],
    records: &[Record],
) -> Result<usize, ExportError> {
    let mut content = String::new();
    content.push_str(
        &headers
            .iter()
            .map(|header| csv_escape(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for record in records {
        let values = headers
            .iter()
            .map(|header| csv_escape(&record.get(header).map(scalar_text).unwrap_or_default()))
            .collect::<Vec<_>>();
        content.push_str(&values.join(","));
        content.push('\n');
    }

    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(records.len())
}

/// Writes an array of objects keyed by `headers`, keeping scalar types.
pub fn export_records_to_json(
    path: &Path,
    headers: &[String],
    records: &[Record],
) -> Result<usize, ExportError> {
    let mut objects = Vec::with_capacity(records.len());
    for record in records {
        let mut object = Map::with_capacity(headers.len());
        for header in headers {
            object.insert(
                header.clone(),
                record.get(header).cloned().unwrap_or(Value::Null),
            );
        }
        objects.push(Value::Object(object));
    }

    let payload = serde_json::to_string_pretty(&objects)?;
    fs::write(path, payload).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(records.len())
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
