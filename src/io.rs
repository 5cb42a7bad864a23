//! Loading and saving rows as CSV or JSON records.
//!
//! CSV values load as strings; casting them is the column layer's job. Row numbers
//! travel in the data under [`crate::records::ROW_NUM_FIELD`] and are re-adopted when
//! the rows are wrapped with [`crate::records::Numbering::Preserve`].

use crate::error::IoError;
use crate::flatten::{flatten_fields, has_nested_data};
use crate::records::{fields_from_value, Fields};
use indexmap::IndexSet;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
}

impl Format {
    /// Guess the format from a file extension, defaulting to CSV
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Csv,
        }
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "json" => Ok(Format::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Load rows from `path` in the format its extension suggests
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Fields>, IoError> {
    let path = path.as_ref();
    match Format::from_path(path) {
        Format::Csv => read_csv(path),
        Format::Json => read_json(path),
    }
}

/// Save rows to `path` in the format its extension suggests
pub fn save(path: impl AsRef<Path>, rows: &[Fields]) -> Result<(), IoError> {
    let path = path.as_ref();
    match Format::from_path(path) {
        Format::Csv => write_csv(path, rows),
        Format::Json => write_json(path, rows),
    }
}

pub fn read_csv(path: impl AsRef<Path>) -> Result<Vec<Fields>, IoError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    read_csv_from(BufReader::new(file), &path.display().to_string())
}

/// Read CSV with a header row. Duplicate column names and rows with a different
/// number of fields than the header are rejected; rows that are empty or nothing but
/// commas (common at the end of spreadsheet exports) are skipped.
pub fn read_csv_from<R: Read>(input: R, source_name: &str) -> Result<Vec<Fields>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let unique: HashSet<&String> = headers.iter().collect();
    if unique.len() != headers.len() {
        return Err(IoError::DuplicateHeaders {
            path: source_name.to_string(),
        });
    }

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() != headers.len() {
            return Err(IoError::InconsistentFields {
                record: index + 1,
                found: record.len(),
                expected: headers.len(),
            });
        }
        let fields: Fields = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.clone(), Value::String(value.to_string())))
            .collect();
        rows.push(fields);
    }

    tracing::debug!(source = source_name, rows = rows.len(), "loaded CSV");
    Ok(rows)
}

pub fn write_csv(path: impl AsRef<Path>, rows: &[Fields]) -> Result<(), IoError> {
    let file = File::create(path.as_ref())?;
    write_csv_to(BufWriter::new(file), rows)
}

/// Write rows as CSV. Nested values are flattened to dotted column names; the header is
/// every column in first-seen order, and missing or null values are written empty.
pub fn write_csv_to<W: Write>(output: W, rows: &[Fields]) -> Result<(), IoError> {
    if rows.is_empty() {
        return Ok(());
    }

    let flat_rows: Vec<Fields> = rows
        .iter()
        .map(|row| {
            if has_nested_data(row) {
                flatten_fields(row)
            } else {
                row.clone()
            }
        })
        .collect();
    let mut headers: IndexSet<&str> = IndexSet::new();
    for row in &flat_rows {
        for key in row.keys() {
            headers.insert(key.as_str());
        }
    }

    let mut writer = csv::WriterBuilder::new().from_writer(output);
    writer.write_record(&headers)?;
    for row in &flat_rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|header| row.get(*header).map(cell_text).unwrap_or_default())
            .collect();
        writer.write_record(&cells)?;
    }
    writer.flush()?;
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn read_json(path: impl AsRef<Path>) -> Result<Vec<Fields>, IoError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let value: Value = serde_json::from_reader(BufReader::new(file))?;
    rows_from_json(value, &path.display().to_string())
}

/// Convert a JSON array of objects into rows
pub fn rows_from_json(value: Value, source_name: &str) -> Result<Vec<Fields>, IoError> {
    let not_records = || IoError::NotRecords {
        path: source_name.to_string(),
    };
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| fields_from_value(item).ok_or_else(not_records))
            .collect(),
        _ => Err(not_records()),
    }
}

pub fn write_json(path: impl AsRef<Path>, rows: &[Fields]) -> Result<(), IoError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writer.flush()?;
    Ok(())
}

/// Values that persisted data commonly uses to stand for null
pub fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.as_str(), "NULL" | "None" | "NaN" | "nan"),
        _ => false,
    }
}

/// Strings made only of whitespace
pub fn is_blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}
