//! Parquet-backed telemetry table.
//!
//! Struct columns are flattened into dotted names (`gnss.lat`); a null
//! struct row reads as empty in every column it was flattened into. Lists
//! and maps are rendered as JSON, binary values as (lossy) UTF-8 text and
//! everything else with Arrow's display formatting.

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, AsArray, StructArray};
use arrow::datatypes::{DataType, Field, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use pc5_core::table::{TableError, TableSource};
use serde_json::{Map, Number, Value};
use std::fs::File;
use std::path::Path;

/// One leaf column plus the struct arrays it was nested in.
struct FlatColumn {
    array: ArrayRef,
    parents: Vec<ArrayRef>,
}

impl FlatColumn {
    fn is_null(&self, row: usize) -> bool {
        self.array.is_null(row) || self.parents.iter().any(|p| p.is_null(row))
    }
}

pub struct ParquetTable {
    columns: Vec<String>,
    /// Flattened columns per record batch
    batches: Vec<Vec<FlatColumn>>,
    /// First row of each batch
    batch_starts: Vec<usize>,
    rows: usize,
}

impl ParquetTable {
    /// Reads a whole Parquet file into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("Failed to read Parquet metadata from {:?}", path))?;
        let schema = builder.schema().clone();

        let mut batches = Vec::new();
        for batch in builder.build()? {
            batches.push(batch.context("Failed to decode Parquet record batch")?);
        }
        Ok(Self::from_batches(&schema, &batches))
    }

    /// Builds a table from already decoded record batches.
    pub fn from_batches(schema: &SchemaRef, batches: &[RecordBatch]) -> Self {
        let mut columns = Vec::new();
        for field in schema.fields() {
            flatten_names(field.name(), field, &mut columns);
        }

        let mut flat_batches = Vec::with_capacity(batches.len());
        let mut batch_starts = Vec::with_capacity(batches.len());
        let mut rows = 0;
        for batch in batches {
            let mut flat = Vec::with_capacity(columns.len());
            for column in batch.columns() {
                flatten_arrays(column, &mut Vec::new(), &mut flat);
            }
            batch_starts.push(rows);
            rows += batch.num_rows();
            flat_batches.push(flat);
        }

        Self {
            columns,
            batches: flat_batches,
            batch_starts,
            rows,
        }
    }
}

fn flatten_names(name: &str, field: &Field, out: &mut Vec<String>) {
    match field.data_type() {
        DataType::Struct(children) => {
            for child in children.iter() {
                flatten_names(&format!("{}.{}", name, child.name()), child, out);
            }
        }
        _ => out.push(name.to_string()),
    }
}

fn flatten_arrays(array: &ArrayRef, parents: &mut Vec<ArrayRef>, out: &mut Vec<FlatColumn>) {
    match array.as_any().downcast_ref::<StructArray>() {
        Some(parent) => {
            parents.push(array.clone());
            for child in parent.columns() {
                flatten_arrays(child, parents, out);
            }
            parents.pop();
        }
        None => out.push(FlatColumn {
            array: array.clone(),
            parents: parents.clone(),
        }),
    }
}

/// Renders one non-null cell of a flattened column.
fn render_cell(array: &dyn Array, row: usize) -> Result<String, ArrowError> {
    match array.data_type() {
        DataType::List(_)
        | DataType::LargeList(_)
        | DataType::FixedSizeList(..)
        | DataType::Map(..)
        | DataType::Struct(_) => Ok(json_value(array, row)?.to_string()),
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            Ok(String::from_utf8_lossy(binary_value(array, row)).into_owned())
        }
        _ => array_value_to_string(array, row),
    }
}

fn binary_value(array: &dyn Array, row: usize) -> &[u8] {
    match array.data_type() {
        DataType::LargeBinary => array.as_binary::<i64>().value(row),
        DataType::FixedSizeBinary(_) => array.as_fixed_size_binary().value(row),
        _ => array.as_binary::<i32>().value(row),
    }
}

fn json_list(values: &dyn Array) -> Result<Value, ArrowError> {
    (0..values.len())
        .map(|i| json_value(values, i))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Converts one cell of a (possibly nested) array into JSON.
fn json_value(array: &dyn Array, row: usize) -> Result<Value, ArrowError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::List(_) => json_list(array.as_list::<i32>().value(row).as_ref())?,
        DataType::LargeList(_) => json_list(array.as_list::<i64>().value(row).as_ref())?,
        DataType::FixedSizeList(..) => {
            json_list(array.as_fixed_size_list().value(row).as_ref())?
        }
        DataType::Struct(fields) => {
            let parent = array.as_struct();
            let mut object = Map::new();
            for (field, column) in fields.iter().zip(parent.columns()) {
                object.insert(field.name().clone(), json_value(column.as_ref(), row)?);
            }
            Value::Object(object)
        }
        DataType::Map(..) => {
            let entries = array.as_map().value(row);
            let (keys, values) = (entries.column(0), entries.column(1));
            let mut object = Map::new();
            for i in 0..entries.len() {
                object.insert(
                    render_cell(keys.as_ref(), i)?,
                    json_value(values.as_ref(), i)?,
                );
            }
            Value::Object(object)
        }
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            Value::String(String::from_utf8_lossy(binary_value(array, row)).into_owned())
        }
        dt if dt.is_numeric() => {
            let text = array_value_to_string(array, row)?;
            // NaN and infinities have no JSON number form
            match text.parse::<Number>() {
                Ok(n) => Value::Number(n),
                Err(_) => Value::String(text),
            }
        }
        _ => Value::String(array_value_to_string(array, row)?),
    };
    Ok(value)
}

impl TableSource for ParquetTable {
    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn num_rows(&self) -> usize {
        self.rows
    }

    fn cell(&self, column: usize, row: usize) -> Result<String, TableError> {
        if row >= self.rows {
            return Err(TableError::Source(format!("row {} out of range", row)));
        }
        let batch = self.batch_starts.partition_point(|&start| start <= row) - 1;
        let local = row - self.batch_starts[batch];
        let flat = self.batches[batch]
            .get(column)
            .ok_or_else(|| TableError::Source(format!("column {} out of range", column)))?;

        if flat.is_null(local) {
            return Ok(String::new());
        }
        render_cell(flat.array.as_ref(), local).map_err(|e| TableError::Source(e.to_string()))
    }
}
