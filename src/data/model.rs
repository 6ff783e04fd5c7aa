use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Result, VariableError};

// ---------------------------------------------------------------------------
// Value – a single cell of an exported table / one event amplitude
// ---------------------------------------------------------------------------

/// A dynamically-typed scalar mirroring the dtypes found in event files.
///
/// Tables are keyed and sorted by `Value`, so it carries a total order:
/// nulls first, then booleans, integers, floats and strings. Floats compare
/// with `total_cmp`, which makes `NaN == NaN` for table comparisons.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    #[default]
    Null,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        fn discriminant(v: &Value) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Null => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => Ok(()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl Value {
    /// Interpret the value as an `f64` when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Nulls count as numeric: they densify to NaN.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Value::String(_))
    }

    /// Convert a JSON sidecar value. Arrays and objects are kept as their
    /// JSON text.
    pub fn from_json(val: &JsonValue) -> Self {
        match val {
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Null => Value::Null,
            other => Value::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Integer(i) => JsonValue::from(*i),
            // Non-finite floats have no JSON representation.
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Null => JsonValue::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Table – the rectangular export
// ---------------------------------------------------------------------------

/// A column-ordered rectangular table of [`Value`]s.
///
/// Every column holds exactly `n_rows` cells. Equality compares the column
/// set (regardless of column order) and the cells row by row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: IndexMap<String, Vec<Value>>,
    n_rows: usize,
}

impl Table {
    /// Build from named columns. Short columns are padded with nulls.
    pub fn from_columns(mut columns: IndexMap<String, Vec<Value>>) -> Self {
        let n_rows = columns.values().map(Vec::len).max().unwrap_or(0);
        for col in columns.values_mut() {
            col.resize(n_rows, Value::Null);
        }
        Table { columns, n_rows }
    }

    /// Build from row records. Missing trailing cells become nulls and
    /// surplus cells are dropped. Cells are placed by position, so every
    /// name must be distinct.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let n_rows = rows.len();
        let mut columns: IndexMap<String, Vec<Value>> = IndexMap::with_capacity(names.len());
        for name in names {
            if columns.contains_key(&name) {
                return Err(VariableError::DuplicateColumn(name));
            }
            columns.insert(name, Vec::with_capacity(n_rows));
        }
        for mut row in rows {
            row.resize(columns.len(), Value::Null);
            for (col, cell) in columns.values_mut().zip(row) {
                col.push(cell);
            }
        }
        Ok(Table { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, columns)`, like a DataFrame shape.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.n_rows {
            return None;
        }
        Some(self.columns.values().map(|col| &col[index]).collect())
    }

    /// Stable sort by the given columns, in priority order. Unknown column
    /// names are ignored.
    pub fn sort_by(&self, keys: &[&str]) -> Table {
        let key_cols: Vec<&Vec<Value>> = keys
            .iter()
            .filter_map(|k| self.columns.get(*k))
            .collect();
        let mut order: Vec<usize> = (0..self.n_rows).collect();
        order.sort_by(|&a, &b| {
            key_cols
                .iter()
                .map(|col| col[a].cmp(&col[b]))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        self.take(&order)
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Table {
        let order: Vec<usize> = (0..self.n_rows.min(n)).collect();
        self.take(&order)
    }

    fn take(&self, order: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| (name.clone(), order.iter().map(|&i| col[i].clone()).collect()))
            .collect();
        Table {
            columns,
            n_rows: order.len(),
        }
    }
}
