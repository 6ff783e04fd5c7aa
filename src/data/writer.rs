use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use parquet::arrow::ArrowWriter;
use serde_json::{Map, Value as JsonValue};

use super::collection::RunVariableCollection;
use super::model::{Table, Value};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Write a table to a file. Dispatch by extension:
///
/// * `.parquet` / `.pq` – one Arrow record batch
/// * `.json`    – records: `[{ "onset": 0.0, ... }, ...]`
/// * `.csv`     – header row, nulls as empty cells
pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let written = match ext.as_str() {
        "parquet" | "pq" => write_parquet(table, path),
        "json" => write_json(table, path),
        "csv" => write_csv(table, path),
        other => bail!("Unsupported file extension: .{other}"),
    };
    written.with_context(|| format!("writing {}", path.display()))
}

/// Save a collection as JSON, readable by [`super::loader::load_collection`].
pub fn save_collection(collection: &RunVariableCollection, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, collection).context("serializing collection")?;
    out.flush().context("flushing collection file")?;
    Ok(())
}

/// Render a table as an ASCII grid.
pub fn format_table(table: &Table) -> Result<String> {
    let batch = to_record_batch(table)?;
    Ok(pretty_format_batches(&[batch])
        .context("formatting table")?
        .to_string())
}

// ---------------------------------------------------------------------------
// CSV / JSON
// ---------------------------------------------------------------------------

fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    writer
        .write_record(table.column_names())
        .context("writing CSV header")?;
    for i in 0..table.n_rows() {
        let cells = table.row(i).unwrap_or_default();
        writer
            .write_record(cells.iter().map(|v| v.to_string()))
            .with_context(|| format!("writing CSV row {i}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

fn write_json(table: &Table, path: &Path) -> Result<()> {
    let records: Vec<JsonValue> = (0..table.n_rows())
        .map(|i| {
            let record: Map<String, JsonValue> = table
                .columns()
                .map(|(name, col)| (name.to_string(), col[i].to_json()))
                .collect();
            JsonValue::Object(record)
        })
        .collect();
    let file = File::create(path).context("creating JSON file")?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &records).context("serializing records")?;
    out.flush().context("flushing JSON file")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Arrow / Parquet
// ---------------------------------------------------------------------------

/// Narrowest Arrow type holding every non-null cell of a column.
fn infer_type(cells: &[Value]) -> DataType {
    let mut inferred: Option<DataType> = None;
    for cell in cells {
        let next = match (cell, &inferred) {
            (Value::Null, _) => continue,
            (Value::String(_), _) => return DataType::Utf8,
            (Value::Integer(_), None | Some(DataType::Int64)) => DataType::Int64,
            (Value::Integer(_) | Value::Float(_), Some(DataType::Int64 | DataType::Float64))
            | (Value::Float(_), None) => DataType::Float64,
            (Value::Bool(_), None | Some(DataType::Boolean)) => DataType::Boolean,
            _ => return DataType::Utf8,
        };
        inferred = Some(next);
    }
    inferred.unwrap_or(DataType::Float64)
}

fn to_array(cells: &[Value], data_type: &DataType) -> ArrayRef {
    match data_type {
        DataType::Int64 => Arc::new(Int64Array::from(
            cells
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            cells.iter().map(Value::as_f64).collect::<Vec<_>>(),
        )),
        DataType::Boolean => Arc::new(BooleanArray::from(
            cells
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        _ => Arc::new(StringArray::from(
            cells
                .iter()
                .map(|v| (!v.is_null()).then(|| v.to_string()))
                .collect::<Vec<_>>(),
        )),
    }
}

/// Convert a table into a single Arrow record batch.
pub fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.n_cols());
    let mut arrays = Vec::with_capacity(table.n_cols());
    for (name, cells) in table.columns() {
        let data_type = infer_type(cells);
        arrays.push(to_array(cells, &data_type));
        fields.push(Field::new(name, data_type, true));
    }
    let schema = Arc::new(Schema::new(fields));
    RecordBatch::try_new(schema, arrays).context("building record batch")
}

fn write_parquet(table: &Table, path: &Path) -> Result<()> {
    let batch = to_record_batch(table)?;
    let file = File::create(path).context("creating parquet file")?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
