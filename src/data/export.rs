use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::collection::{ResampleOptions, RunVariableCollection, SamplingRate};
use super::model::{Table, Value};
use super::run_info::RunInfo;
use super::variable::Variable;
use crate::error::{Result, VariableError};

const ONSET: &str = "onset";
const DURATION: &str = "duration";
const CONDITION: &str = "condition";
const AMPLITUDE: &str = "amplitude";

// ---------------------------------------------------------------------------
// Export options
// ---------------------------------------------------------------------------

/// Table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    /// One column per variable, one row per distinct onset/duration/run.
    #[default]
    Wide,
    /// One row per variable observation, with `condition` and `amplitude`.
    Long,
}

impl FromStr for TableFormat {
    type Err = VariableError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wide" => Ok(TableFormat::Wide),
            "long" => Ok(TableFormat::Long),
            _ => Err(VariableError::InvalidSpecification(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: TableFormat,
    /// Export events as they are when every selected variable is sparse.
    /// When false, or when any selected variable is dense, everything is
    /// densified at `sampling_rate` first.
    pub sparse: bool,
    pub sampling_rate: SamplingRate,
    /// Variables to export; `None` selects all.
    pub variables: Option<Vec<String>>,
    pub include_sparse: bool,
    pub include_dense: bool,
    /// Cell value where a row has no data for a column.
    pub fill_value: Value,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: TableFormat::Wide,
            sparse: true,
            sampling_rate: SamplingRate::Default,
            variables: None,
            include_sparse: true,
            include_dense: true,
            fill_value: Value::Null,
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: TableFormat) -> Self {
        self.format = format;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn sampling_rate(mut self, rate: impl Into<SamplingRate>) -> Self {
        self.sampling_rate = rate.into();
        self
    }

    pub fn variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn include_sparse(mut self, include: bool) -> Self {
        self.include_sparse = include;
        self
    }

    pub fn include_dense(mut self, include: bool) -> Self {
        self.include_dense = include;
        self
    }

    pub fn fill_value(mut self, value: impl Into<Value>) -> Self {
        self.fill_value = value.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Per-variable observations
// ---------------------------------------------------------------------------

struct Row {
    onset: f64,
    duration: f64,
    amplitude: Value,
    run: usize,
}

/// One variable's observations plus the descriptor cells of each run.
struct Block<'a> {
    condition: &'a str,
    runs: Vec<BTreeMap<String, Value>>,
    rows: Vec<Row>,
}

fn run_descriptors(run: &RunInfo, with_image: bool) -> BTreeMap<String, Value> {
    let mut cells: BTreeMap<String, Value> = run
        .entities
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    if with_image {
        if let Some(meta) = &run.image_metadata {
            for (k, v) in meta {
                cells.entry(k.clone()).or_insert_with(|| Value::from_json(v));
            }
        }
    }
    cells.retain(|k, _| ![ONSET, DURATION, CONDITION, AMPLITUDE].contains(&k.as_str()));
    cells
}

fn block(var: &Variable) -> Block<'_> {
    match var {
        Variable::Sparse(v) => Block {
            condition: v.name(),
            runs: v.run_info().iter().map(|r| run_descriptors(r, false)).collect(),
            rows: v
                .events()
                .iter()
                .map(|ev| Row {
                    onset: ev.onset,
                    duration: ev.duration,
                    amplitude: ev.amplitude.clone(),
                    run: ev.run,
                })
                .collect(),
        },
        Variable::Dense(v) => {
            let rate = v.sampling_rate();
            let mut rows = Vec::with_capacity(v.n_rows());
            for (run, (_, segment)) in v.segments().enumerate() {
                rows.extend(segment.iter().enumerate().map(|(j, &value)| Row {
                    onset: j as f64 / rate,
                    duration: 1.0 / rate,
                    amplitude: Value::Float(value),
                    run,
                }));
            }
            Block {
                condition: v.name(),
                runs: v.run_info().iter().map(|r| run_descriptors(r, true)).collect(),
                rows,
            }
        }
    }
}

/// Union of descriptor column names, sorted.
fn descriptor_columns(blocks: &[Block<'_>]) -> Vec<String> {
    let names: BTreeSet<&String> = blocks
        .iter()
        .flat_map(|b| b.runs.iter().flat_map(|r| r.keys()))
        .collect();
    names.into_iter().cloned().collect()
}

fn long_table(blocks: &[Block<'_>], fill: &Value) -> Table {
    let descriptors = descriptor_columns(blocks);
    let n_rows: usize = blocks.iter().map(|b| b.rows.len()).sum();

    let mut columns: IndexMap<String, Vec<Value>> = [ONSET, DURATION, CONDITION, AMPLITUDE]
        .iter()
        .map(|c| c.to_string())
        .chain(descriptors.iter().cloned())
        .map(|c| (c, Vec::with_capacity(n_rows)))
        .collect();

    for b in blocks {
        for row in &b.rows {
            let cells = &b.runs[row.run];
            let mut cols = columns.values_mut();
            // Fixed leading columns, in the order they were created.
            for value in [
                Value::Float(row.onset),
                Value::Float(row.duration),
                Value::String(b.condition.to_string()),
                row.amplitude.clone(),
            ] {
                if let Some(col) = cols.next() {
                    col.push(value);
                }
            }
            for (name, col) in descriptors.iter().zip(cols) {
                col.push(cells.get(name).cloned().unwrap_or_else(|| fill.clone()));
            }
        }
    }
    Table::from_columns(columns)
}

fn wide_table(blocks: &[Block<'_>], fill: &Value) -> Result<Table> {
    let descriptors = descriptor_columns(blocks);
    let n_vars = blocks.len();

    // Row key: onset, duration, then every descriptor cell.
    let mut rows: IndexMap<Vec<Value>, Vec<Option<Value>>> = IndexMap::new();
    for (i, b) in blocks.iter().enumerate() {
        for row in &b.rows {
            let cells = &b.runs[row.run];
            let mut key = Vec::with_capacity(descriptors.len() + 2);
            key.push(Value::Float(row.onset));
            key.push(Value::Float(row.duration));
            key.extend(
                descriptors
                    .iter()
                    .map(|name| cells.get(name).cloned().unwrap_or_else(|| fill.clone())),
            );
            let slots = rows.entry(key).or_insert_with(|| vec![None; n_vars]);
            if slots[i].is_none() {
                slots[i] = Some(row.amplitude.clone());
            }
        }
    }

    let mut names: Vec<String> = vec![ONSET.to_string(), DURATION.to_string()];
    names.extend(descriptors);
    names.extend(blocks.iter().map(|b| b.condition.to_string()));

    let records = rows
        .into_iter()
        .map(|(mut key, slots)| {
            key.extend(slots.into_iter().map(|s| s.unwrap_or_else(|| fill.clone())));
            key
        })
        .collect();
    Table::from_rows(names, records)
}

// ---------------------------------------------------------------------------
// Collection export
// ---------------------------------------------------------------------------

impl RunVariableCollection {
    /// Export the collection as one rectangular table.
    ///
    /// The column set depends only on the options and the runs involved:
    /// `onset`, `duration`, the run entities (plus image metadata for dense
    /// data), then either one column per variable (wide) or `condition` and
    /// `amplitude` (long).
    pub fn to_df(&self, options: &ExportOptions) -> Result<Table> {
        if !options.include_sparse && !options.include_dense {
            return Err(VariableError::NothingToExport);
        }

        let mut selected: Vec<&Variable> = match &options.variables {
            None => self.variables().values().collect(),
            Some(names) => names
                .iter()
                .map(|n| {
                    self.get(n)
                        .ok_or_else(|| VariableError::UnknownVariable(n.clone()))
                })
                .collect::<Result<_>>()?,
        };
        selected.retain(|v| {
            (v.is_sparse() && options.include_sparse) || (v.is_dense() && options.include_dense)
        });
        if selected.is_empty() {
            debug!("to_df: no variables selected");
            return Ok(Table::default());
        }

        let densified;
        let variables: Vec<&Variable> = if options.sparse && selected.iter().all(|v| v.is_sparse())
        {
            selected
        } else {
            let resample = ResampleOptions::new()
                .sampling_rate(options.sampling_rate.clone())
                .variables(selected.iter().map(|v| v.name().to_string()))
                .force_dense(true);
            densified = self.resample(&resample)?;
            densified.variables().values().collect()
        };

        let blocks: Vec<Block<'_>> = variables.into_iter().map(block).collect();
        let table = match options.format {
            TableFormat::Long => long_table(&blocks, &options.fill_value),
            TableFormat::Wide => wide_table(&blocks, &options.fill_value)?,
        };
        debug!(
            "to_df: {} variables -> {:?} table of shape {:?}",
            blocks.len(),
            options.format,
            table.shape()
        );
        Ok(table)
    }
}
