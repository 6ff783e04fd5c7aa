use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use indexmap::{IndexMap, IndexSet};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::collection::RunVariableCollection;
use super::model::{Table, Value};

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Load a collection saved by [`super::writer::save_collection`] (or built
/// by an external indexer in the same JSON form) and check its invariants.
pub fn load_collection(path: &Path) -> Result<RunVariableCollection> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let coll: RunVariableCollection =
        serde_json::from_reader(BufReader::new(file)).context("parsing collection JSON")?;
    coll.validate()
        .with_context(|| format!("invalid collection in {}", path.display()))?;
    Ok(coll)
}

// ---------------------------------------------------------------------------
// Exported tables
// ---------------------------------------------------------------------------

/// Read an exported table back. Dispatch by extension:
///
/// * `.parquet` / `.pq` – column types preserved
/// * `.json`    – `[{ "onset": 0.0, "subject": "01", ... }, ...]`
/// * `.csv`     – header row; cell types are guessed, so a label such as
///   run `"1"` comes back as an integer. Zero-padded labels (`"01"`) stay
///   strings. Use Parquet or JSON when cell types must survive exactly.
pub fn load_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

fn load_json(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut names: IndexSet<String> = IndexSet::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            names.insert(key.clone());
        }
    }

    let rows = records
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|obj| {
            names
                .iter()
                .map(|k| obj.get(k).map(Value::from_json).unwrap_or_default())
                .collect()
        })
        .collect();
    Ok(Table::from_rows(names.into_iter().collect(), rows)?)
}

fn load_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        rows.push(record.iter().map(guess_value_type).collect());
    }
    Table::from_rows(headers, rows).context("CSV header repeats a column name")
}

fn guess_value_type(s: &str) -> Value {
    if s.is_empty() {
        return Value::Null;
    }
    if is_zero_padded(s) {
        return Value::String(s.to_string());
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::Float(f);
    }
    if s == "true" || s == "false" {
        return Value::Bool(s == "true");
    }
    Value::String(s.to_string())
}

/// `"01"`, `"-007"`: identifiers, not numbers.
fn is_zero_padded(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    let bytes = digits.as_bytes();
    bytes.len() > 1 && bytes[0] == b'0' && bytes[1].is_ascii_digit()
}

fn load_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut columns: IndexMap<String, Vec<Value>> =
        names.into_iter().map(|n| (n, Vec::new())).collect();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (col, cells) in batch.columns().iter().zip(columns.values_mut()) {
            cells.extend((0..batch.num_rows()).map(|row| extract_value(col, row)));
        }
    }
    Ok(Table::from_columns(columns))
}

/// A single cell of an Arrow column.
fn extract_value(col: &ArrayRef, row: usize) -> Value {
    if col.is_null(row) {
        return Value::Null;
    }
    match col.data_type() {
        DataType::Utf8 => Value::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => Value::Integer(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => Value::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => Value::Float(col.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => Value::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => Value::Bool(col.as_boolean().value(row)),
        other => Value::String(format!("{other:?}")),
    }
}
