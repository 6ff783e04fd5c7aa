use std::ops::Index;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::filter::{name_matcher, EntityFilter, MatchType};
use super::run_info::{intersect_entities, Entities};
use super::variable::{
    check_rate, merge_variables, DenseRunVariable, Interpolation, SparseRunVariable, Variable,
};
use crate::error::{Result, VariableError};

/// Rate used to densify sparse variables when nothing else decides it.
pub const DEFAULT_SAMPLING_RATE: f64 = 10.0;

// ---------------------------------------------------------------------------
// SamplingRate – how a caller asks for a rate
// ---------------------------------------------------------------------------

/// A sampling-rate request, resolved against a collection by
/// [`RunVariableCollection::get_sampling_rate`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SamplingRate {
    /// The collection's own rate.
    #[default]
    Default,
    /// An explicit rate in Hz, used verbatim.
    Hz(f64),
    /// The highest rate among the dense variables, if any.
    Highest,
    /// One over the repetition time shared by every run.
    Tr,
    /// The rate of a named variable.
    Variable(String),
}

impl From<f64> for SamplingRate {
    fn from(rate: f64) -> Self {
        SamplingRate::Hz(rate)
    }
}

impl From<Option<f64>> for SamplingRate {
    fn from(rate: Option<f64>) -> Self {
        rate.map_or(SamplingRate::Default, SamplingRate::Hz)
    }
}

/// `"highest"` (any case), `"TR"`, a number, or else a variable name.
impl From<&str> for SamplingRate {
    fn from(token: &str) -> Self {
        if token.eq_ignore_ascii_case("highest") {
            SamplingRate::Highest
        } else if token == "TR" {
            SamplingRate::Tr
        } else if let Ok(rate) = token.trim().parse::<f64>() {
            SamplingRate::Hz(rate)
        } else {
            SamplingRate::Variable(token.to_string())
        }
    }
}

/// Distinct rates in `rates`: none → `None`, one → that rate, more → error.
fn unique_rate(rates: impl IntoIterator<Item = f64>) -> Result<Option<f64>> {
    let mut distinct: Vec<f64> = rates.into_iter().collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    match distinct.len() {
        0 => Ok(None),
        1 => Ok(Some(distinct[0])),
        _ => Err(VariableError::NonUniqueRate { rates: distinct }),
    }
}

// ---------------------------------------------------------------------------
// Resample options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ResampleOptions {
    pub sampling_rate: SamplingRate,
    /// Variables to resample; `None` selects all.
    pub variables: Option<Vec<String>>,
    /// Densify numeric sparse variables too.
    pub force_dense: bool,
    pub kind: Interpolation,
}

impl ResampleOptions {
    pub fn new() -> Self {
        Self::default()
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

    pub fn force_dense(mut self, force: bool) -> Self {
        self.force_dense = force;
        self
    }

    pub fn kind(mut self, kind: Interpolation) -> Self {
        self.kind = kind;
        self
    }
}

// ---------------------------------------------------------------------------
// RunVariableCollection
// ---------------------------------------------------------------------------

/// Named run-level variables, sparse and dense, for one or more runs.
///
/// Entities and the default sampling rate are derived from the variables
/// on every read, so no mutation path can leave them stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunVariableCollection {
    variables: IndexMap<String, Variable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sampling_rate: Option<f64>,
}

impl RunVariableCollection {
    /// Key the variables by name; a later duplicate replaces an earlier one.
    pub fn new<I>(variables: I) -> Self
    where
        I: IntoIterator<Item = Variable>,
    {
        let variables = variables
            .into_iter()
            .map(|v| (v.name().to_string(), v))
            .collect();
        RunVariableCollection {
            variables,
            sampling_rate: None,
        }
    }

    /// Fix the collection's rate instead of deriving it.
    pub fn with_sampling_rate(mut self, rate: f64) -> Result<Self> {
        self.sampling_rate = Some(check_rate(rate)?);
        Ok(self)
    }

    /// Check every variable's invariants and that keys match names.
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.sampling_rate {
            check_rate(rate)?;
        }
        for (key, var) in &self.variables {
            var.validate()?;
            if key != var.name() {
                return Err(VariableError::UnknownVariable(key.clone()));
            }
        }
        Ok(())
    }

    pub fn variables(&self) -> &IndexMap<String, Variable> {
        &self.variables
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.get_mut(name)
    }

    /// Insert under the variable's own name, returning any replaced entry.
    /// A replaced entry keeps its position.
    pub fn insert(&mut self, variable: impl Into<Variable>) -> Option<Variable> {
        let variable = variable.into();
        self.variables.insert(variable.name().to_string(), variable)
    }

    /// Insert under `name`, renaming the variable.
    pub fn insert_as(&mut self, name: &str, variable: impl Into<Variable>) -> Option<Variable> {
        let mut variable = variable.into();
        variable.set_name(name.to_string());
        self.variables.insert(name.to_string(), variable)
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.variables.shift_remove(name)
    }

    pub fn get_sparse_variables(&self) -> Vec<&SparseRunVariable> {
        self.variables.values().filter_map(Variable::as_sparse).collect()
    }

    pub fn get_dense_variables(&self) -> Vec<&DenseRunVariable> {
        self.variables.values().filter_map(Variable::as_dense).collect()
    }

    pub fn all_sparse(&self) -> bool {
        self.variables.values().all(Variable::is_sparse)
    }

    pub fn all_dense(&self) -> bool {
        self.variables.values().all(Variable::is_dense)
    }

    /// Variables whose names match `pattern`, in collection order.
    pub fn match_variables(&self, pattern: &str, match_type: MatchType) -> Result<Vec<&Variable>> {
        let matcher = name_matcher(pattern, match_type)?;
        Ok(self
            .variables
            .values()
            .filter(|v| matcher.is_match(v.name()))
            .collect())
    }

    pub fn match_variable_names(&self, pattern: &str, match_type: MatchType) -> Result<Vec<&str>> {
        Ok(self
            .match_variables(pattern, match_type)?
            .into_iter()
            .map(Variable::name)
            .collect())
    }

    /// Entity pairs shared by every run of every variable.
    pub fn entities(&self) -> Entities {
        intersect_entities(self.variables.values().flat_map(Variable::run_info))
    }

    /// The rate used when none is requested: the explicit rate if set,
    /// else the single rate shared by all dense variables, else
    /// [`DEFAULT_SAMPLING_RATE`].
    pub fn sampling_rate(&self) -> Result<f64> {
        if let Some(rate) = self.sampling_rate {
            return Ok(rate);
        }
        let dense = unique_rate(self.get_dense_variables().iter().map(|v| v.sampling_rate()))?;
        Ok(dense.unwrap_or(DEFAULT_SAMPLING_RATE))
    }

    /// Resolve a rate request. Only `Highest` over a collection without
    /// dense variables yields `None`.
    pub fn get_sampling_rate(&self, spec: impl Into<SamplingRate>) -> Result<Option<f64>> {
        match spec.into() {
            SamplingRate::Default => self.sampling_rate().map(Some),
            SamplingRate::Hz(rate) => Ok(Some(rate)),
            SamplingRate::Highest => Ok(self
                .get_dense_variables()
                .iter()
                .map(|v| v.sampling_rate())
                .reduce(f64::max)),
            SamplingRate::Tr => {
                let runs = self.variables.values().flat_map(Variable::run_info);
                match unique_rate(runs.map(|r| r.sampling_rate))? {
                    Some(rate) => Ok(Some(rate)),
                    None => Err(VariableError::RateUnavailable),
                }
            }
            SamplingRate::Variable(name) => match self.variables.get(&name) {
                Some(Variable::Dense(v)) => Ok(Some(v.sampling_rate())),
                Some(Variable::Sparse(v)) => {
                    match unique_rate(v.run_info().iter().map(|r| r.sampling_rate))? {
                        Some(rate) => Ok(Some(rate)),
                        None => Err(VariableError::RateUnavailable),
                    }
                }
                None => Err(VariableError::InvalidSpecification(name)),
            },
        }
    }

    /// Resample the selected variables into a new collection.
    ///
    /// Dense variables are resampled to the resolved rate. Sparse ones are
    /// densified only under `force_dense`, and only when numeric; otherwise
    /// they are left out of the result.
    pub fn resample(&self, options: &ResampleOptions) -> Result<RunVariableCollection> {
        let (sampling_rate, variables) = self.resampled(options)?;
        Ok(RunVariableCollection {
            variables,
            sampling_rate,
        })
    }

    /// Resample in place: resampled entries replace their originals, all
    /// other entries stay. Nothing changes if resolution or conversion fails.
    pub fn resample_in_place(&mut self, options: &ResampleOptions) -> Result<&mut Self> {
        let (sampling_rate, variables) = self.resampled(options)?;
        self.variables.extend(variables);
        if sampling_rate.is_some() {
            self.sampling_rate = sampling_rate;
        }
        Ok(self)
    }

    fn resampled(
        &self,
        options: &ResampleOptions,
    ) -> Result<(Option<f64>, IndexMap<String, Variable>)> {
        if let Some(names) = &options.variables {
            if let Some(missing) = names.iter().find(|n| !self.variables.contains_key(*n)) {
                return Err(VariableError::UnknownVariable(missing.clone()));
            }
        }
        let selected = self.variables.values().filter(|v| {
            options
                .variables
                .as_ref()
                .map_or(true, |names| names.iter().any(|n| n == v.name()))
        });
        let targets: Vec<&Variable> = selected
            .filter(|v| match v {
                Variable::Dense(_) => true,
                Variable::Sparse(s) => options.force_dense && s.is_numeric(),
            })
            .collect();

        let rate = self.get_sampling_rate(options.sampling_rate.clone())?;
        if targets.is_empty() {
            debug!("resample: no dense or densifiable variables selected");
            return Ok((rate, IndexMap::new()));
        }
        let rate = check_rate(rate.ok_or(VariableError::RateUnavailable)?)?;

        let mut out = IndexMap::with_capacity(targets.len());
        for var in targets {
            let dense = match var {
                Variable::Dense(d) => d.resample(rate, options.kind)?,
                Variable::Sparse(s) => s.to_dense(rate)?,
            };
            out.insert(var.name().to_string(), Variable::Dense(dense));
        }
        debug!("resampled {} variables to {rate} Hz", out.len());
        Ok((Some(rate), out))
    }

    /// Keep only data from runs passing `filter`. Variables left without
    /// runs are dropped.
    pub fn filter_runs(&self, filter: &EntityFilter) -> RunVariableCollection {
        let variables = self
            .variables
            .iter()
            .filter_map(|(name, v)| v.filter_runs(filter).map(|v| (name.clone(), v)))
            .collect();
        RunVariableCollection {
            variables,
            sampling_rate: self.sampling_rate,
        }
    }

    /// One collection per distinct run (by entities), in first-appearance
    /// order. Merging the result reproduces this collection.
    pub fn split_by_run(&self) -> Vec<RunVariableCollection> {
        let mut groups: IndexMap<Entities, IndexMap<String, Variable>> = IndexMap::new();
        for (name, var) in &self.variables {
            let mut per_run: IndexMap<&Entities, Vec<usize>> = IndexMap::new();
            for (i, run) in var.run_info().iter().enumerate() {
                per_run.entry(&run.entities).or_default().push(i);
            }
            for (entities, runs) in per_run {
                groups
                    .entry(entities.clone())
                    .or_default()
                    .insert(name.clone(), var.select_runs(&runs));
            }
        }
        groups
            .into_values()
            .map(|variables| RunVariableCollection {
                variables,
                sampling_rate: self.sampling_rate,
            })
            .collect()
    }
}

impl Index<&str> for RunVariableCollection {
    type Output = Variable;

    fn index(&self, name: &str) -> &Variable {
        &self.variables[name]
    }
}

// ---------------------------------------------------------------------------
// Merge engine
// ---------------------------------------------------------------------------

/// Merge collections (typically one per run) into one.
///
/// Same-named variables are concatenated in input order; a variable only
/// carries the runs of the inputs it appeared in. The explicit rate of the
/// result is the highest explicit rate among the inputs.
pub fn merge_collections<I>(collections: I) -> Result<RunVariableCollection>
where
    I: IntoIterator<Item = RunVariableCollection>,
{
    let mut collections: Vec<RunVariableCollection> = collections.into_iter().collect();
    if collections.len() <= 1 {
        return Ok(collections.pop().unwrap_or_default());
    }

    let n_inputs = collections.len();
    let sampling_rate = collections
        .iter()
        .filter_map(|c| c.sampling_rate)
        .reduce(f64::max);

    let mut grouped: IndexMap<String, Vec<Variable>> = IndexMap::new();
    for coll in collections {
        for (name, var) in coll.variables {
            grouped.entry(name).or_default().push(var);
        }
    }
    let variables = grouped
        .into_iter()
        .map(|(name, vars)| Ok((name, merge_variables(vars)?)))
        .collect::<Result<IndexMap<_, _>>>()?;

    debug!("merged {n_inputs} collections into {} variables", variables.len());
    Ok(RunVariableCollection {
        variables,
        sampling_rate,
    })
}
