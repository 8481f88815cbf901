//! Flat tabular batches.
//!
//! A batch is what one bulk step sends to the store: a fixed column list
//! and rows of values. The loader turns chunks of it into `UNWIND $rows`
//! parameters; the same batch can be written as CSV for an external
//! bulk-import tool, or converted to Arrow with the `arrow-batches` feature.

use std::collections::HashMap;
use std::io::Write;

use crate::model::Value;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Batch {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self { name: name.into(), columns, rows: Vec::new() }
    }

    pub fn push(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::ExecutionError(format!(
                "batch '{}' expects {} columns, row has {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows in chunks of at most `size`.
    pub fn chunks(&self, size: usize) -> std::slice::Chunks<'_, Vec<Value>> {
        self.rows.chunks(size.max(1))
    }

    /// One chunk as an `UNWIND` parameter: a list of column-keyed maps.
    pub fn to_param(&self, chunk: &[Vec<Value>]) -> Value {
        Value::List(
            chunk
                .iter()
                .map(|row| {
                    let map: HashMap<String, Value> =
                        self.columns.iter().cloned().zip(row.iter().cloned()).collect();
                    Value::Map(map)
                })
                .collect(),
        )
    }

    /// Header line plus one line per row. Nulls are empty fields.
    pub fn write_csv(&self, mut out: impl Write) -> Result<()> {
        let header: Vec<String> = self.columns.iter().map(|c| csv_field(c)).collect();
        writeln!(out, "{}", header.join(","))?;
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(csv_value).collect();
            writeln!(out, "{}", fields.join(","))?;
        }
        Ok(())
    }

    /// Convert to an Arrow `RecordBatch`. Column types are taken from the
    /// values: integers, floats (integers widen), booleans, and strings for
    /// everything else.
    #[cfg(feature = "arrow-batches")]
    pub fn to_record_batch(&self) -> Result<arrow_array::RecordBatch> {
        use std::sync::Arc;

        use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
        use arrow_schema::{DataType, Field, Schema};

        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());
        for (i, name) in self.columns.iter().enumerate() {
            let column = self.rows.iter().map(|r| &r[i]);
            let data_type = arrow_type(column.clone());
            let array: ArrayRef = match data_type {
                DataType::Int64 => Arc::new(Int64Array::from(column.map(Value::as_int).collect::<Vec<_>>())),
                DataType::Float64 => {
                    Arc::new(Float64Array::from(column.map(Value::as_float).collect::<Vec<_>>()))
                }
                DataType::Boolean => {
                    Arc::new(BooleanArray::from(column.map(Value::as_bool).collect::<Vec<_>>()))
                }
                _ => Arc::new(StringArray::from(
                    column
                        .map(|v| match v {
                            Value::Null => None,
                            Value::String(s) => Some(s.clone()),
                            other => Some(other.to_string()),
                        })
                        .collect::<Vec<_>>(),
                )),
            };
            fields.push(Field::new(name, data_type, true));
            arrays.push(array);
        }
        arrow_array::RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .map_err(|e| Error::ExecutionError(format!("batch '{}' to arrow: {e}", self.name)))
    }
}

#[cfg(feature = "arrow-batches")]
fn arrow_type<'a>(values: impl Iterator<Item = &'a Value>) -> arrow_schema::DataType {
    use arrow_schema::DataType;

    let mut seen: Option<DataType> = None;
    for v in values {
        let t = match v {
            Value::Null => continue,
            Value::Int(_) => DataType::Int64,
            Value::Float(_) => DataType::Float64,
            Value::Bool(_) => DataType::Boolean,
            _ => return DataType::Utf8,
        };
        seen = Some(match (seen, t) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
                DataType::Float64
            }
            _ => return DataType::Utf8,
        });
    }
    seen.unwrap_or(DataType::Utf8)
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

fn csv_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => csv_field(s),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        other => csv_field(&other.to_string()),
    }
}
