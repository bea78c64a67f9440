//! Column projection for tabular telemetry.
//!
//! GNSS/INS telemetry arrives as columnar tables. Any table backend that
//! implements [`TableSource`] can be projected to CSV with a chosen column
//! order; requested columns that the source lacks are skipped with a warning
//! rather than failing the export.

use log::warn;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Errors that can occur while projecting a table.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table source error: {0}")]
    Source(String),
}

/// A read-only columnar table.
pub trait TableSource {
    /// Column names in schema order.
    fn column_names(&self) -> Vec<String>;

    fn num_rows(&self) -> usize;

    /// Cell rendered as text; nulls render as an empty string.
    fn cell(&self, column: usize, row: usize) -> Result<String, TableError>;
}

/// Outcome of a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionReport {
    /// Columns written, in output order
    pub columns: Vec<String>,
    /// Requested columns absent from the source
    pub missing: Vec<String>,
    pub rows: usize,
}

/// Resolves requested column names against a schema.
///
/// Returns `(schema index, name)` pairs in request order plus the names that
/// were not found. `None` selects every column in schema order.
pub fn resolve_columns(
    schema: &[String],
    selected: Option<&[String]>,
) -> (Vec<(usize, String)>, Vec<String>) {
    let Some(selected) = selected else {
        return (schema.iter().cloned().enumerate().collect(), Vec::new());
    };

    let mut found = Vec::new();
    let mut missing = Vec::new();
    for name in selected {
        match schema.iter().position(|c| c == name) {
            Some(i) => found.push((i, name.clone())),
            None => missing.push(name.clone()),
        }
    }
    (found, missing)
}

/// Quotes a CSV field when it contains a delimiter, quote or line break.
pub fn escape_csv(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        std::borrow::Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}

/// Writes the selected columns of `source` as CSV, header first.
pub fn project_columns<T, W>(
    source: &T,
    selected: Option<&[String]>,
    writer: W,
) -> Result<ProjectionReport, TableError>
where
    T: TableSource + ?Sized,
    W: Write,
{
    let schema = source.column_names();
    let (columns, missing) = resolve_columns(&schema, selected);
    if !missing.is_empty() {
        warn!("missing columns skipped: {:?}", missing);
    }

    let mut writer = BufWriter::new(writer);
    let header: Vec<_> = columns.iter().map(|(_, name)| escape_csv(name)).collect();
    writeln!(writer, "{}", header.join(","))?;

    let rows = source.num_rows();
    for row in 0..rows {
        for (i, (column, _)) in columns.iter().enumerate() {
            if i > 0 {
                writer.write_all(b",")?;
            }
            let value = source.cell(*column, row)?;
            writer.write_all(escape_csv(&value).as_bytes())?;
        }
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    Ok(ProjectionReport {
        columns: columns.into_iter().map(|(_, name)| name).collect(),
        missing,
        rows,
    })
}

/// Row-major in-memory table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MemoryTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row; it must have one value per column.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::Source(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }
}

impl TableSource for MemoryTable {
    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn cell(&self, column: usize, row: usize) -> Result<String, TableError> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .cloned()
            .ok_or_else(|| TableError::Source(format!("no cell at ({}, {})", column, row)))
    }
}
