use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::filter::{run_passes, EntityFilter};
use super::model::Value;
use super::run_info::{intersect_entities, Entities, RunInfo};
use crate::error::{Result, VariableError};

// ---------------------------------------------------------------------------
// Interpolation kind for dense resampling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    Nearest,
    /// Zero-order hold: each new sample takes the preceding old sample.
    Previous,
}

impl FromStr for Interpolation {
    type Err = VariableError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Interpolation::Linear),
            "nearest" => Ok(Interpolation::Nearest),
            "previous" | "zero" => Ok(Interpolation::Previous),
            _ => Err(VariableError::InvalidSpecification(s.to_string())),
        }
    }
}

pub(crate) fn check_rate(rate: f64) -> Result<f64> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(VariableError::InvalidRate(rate))
    }
}

/// Start offset of every run segment at `rate`, plus the total length.
fn segment_offsets(run_info: &[RunInfo], rate: f64) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(run_info.len() + 1);
    let mut acc = 0;
    offsets.push(acc);
    for run in run_info {
        acc += run.n_samples(rate);
        offsets.push(acc);
    }
    offsets
}

// ---------------------------------------------------------------------------
// SparseRunVariable – onset / duration / amplitude events
// ---------------------------------------------------------------------------

/// One occurrence of a sparse variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds from the start of the run.
    pub onset: f64,
    pub duration: f64,
    pub amplitude: Value,
    /// Index into the owning variable's `run_info`.
    pub run: usize,
}

impl Event {
    pub fn new(onset: f64, duration: f64, amplitude: impl Into<Value>, run: usize) -> Self {
        Event {
            onset,
            duration,
            amplitude: amplitude.into(),
            run,
        }
    }
}

/// Event-like variable with no intrinsic sampling rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseRunVariable {
    name: String,
    source: String,
    events: Vec<Event>,
    run_info: Vec<RunInfo>,
}

impl SparseRunVariable {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        events: Vec<Event>,
        run_info: Vec<RunInfo>,
    ) -> Result<Self> {
        let var = SparseRunVariable {
            name: name.into(),
            source: source.into(),
            events,
            run_info,
        };
        var.validate()?;
        Ok(var)
    }

    pub fn validate(&self) -> Result<()> {
        let n_runs = self.run_info.len();
        match self.events.iter().position(|ev| ev.run >= n_runs) {
            Some(event) => Err(VariableError::RunOutOfRange {
                name: self.name.clone(),
                event,
                run: self.events[event].run,
                n_runs,
            }),
            None => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn run_info(&self) -> &[RunInfo] {
        &self.run_info
    }

    /// Run descriptors may be replaced in place; the run count is fixed.
    pub fn run_info_mut(&mut self) -> &mut [RunInfo] {
        &mut self.run_info
    }

    pub fn n_rows(&self) -> usize {
        self.events.len()
    }

    /// Total duration of all runs, in seconds.
    pub fn duration(&self) -> f64 {
        self.run_info.iter().map(|r| r.duration).sum()
    }

    pub fn entities(&self) -> Entities {
        intersect_entities(&self.run_info)
    }

    /// True when every amplitude can be densified (numbers, booleans, nulls).
    pub fn is_numeric(&self) -> bool {
        self.events.iter().all(|ev| ev.amplitude.is_numeric())
    }

    /// Expand the events onto a regular grid at `sampling_rate`.
    ///
    /// Each run contributes `ceil(duration * rate)` bins; an event covers
    /// `[round(onset * rate), round((onset + duration) * rate))` within its
    /// run. Bins no event covers stay at zero.
    pub fn to_dense(&self, sampling_rate: f64) -> Result<DenseRunVariable> {
        let rate = check_rate(sampling_rate)?;
        if !self.is_numeric() {
            return Err(VariableError::NonNumeric {
                name: self.name.clone(),
            });
        }

        let offsets = segment_offsets(&self.run_info, rate);
        let mut values = vec![0.0; offsets[offsets.len() - 1]];

        for ev in &self.events {
            let start = offsets[ev.run];
            let len = offsets[ev.run + 1] - start;
            let first = (ev.onset * rate).round().max(0.0) as usize;
            if first >= len {
                warn!(
                    "{}: event at onset {} lies beyond its run ({} s); skipped",
                    self.name, ev.onset, self.run_info[ev.run].duration
                );
                continue;
            }
            let last = (((ev.onset + ev.duration) * rate).round().max(0.0) as usize).min(len);
            if last > first {
                let amp = ev.amplitude.as_f64().unwrap_or(f64::NAN);
                values[start + first..start + last].fill(amp);
            }
        }

        Ok(DenseRunVariable {
            name: self.name.clone(),
            source: self.source.clone(),
            values,
            sampling_rate: rate,
            run_info: self.run_info.clone(),
        })
    }

    /// Keep the listed runs, in the given order.
    fn select_runs(&self, keep: &[usize]) -> Self {
        let mut remap = vec![None; self.run_info.len()];
        for (new, &old) in keep.iter().enumerate() {
            remap[old] = Some(new);
        }
        let events = self
            .events
            .iter()
            .filter_map(|ev| {
                remap[ev.run].map(|run| Event {
                    run,
                    ..ev.clone()
                })
            })
            .collect();
        SparseRunVariable {
            name: self.name.clone(),
            source: self.source.clone(),
            events,
            run_info: keep.iter().map(|&i| self.run_info[i].clone()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// DenseRunVariable – regularly sampled values
// ---------------------------------------------------------------------------

/// JSON has no NaN; missing samples travel as `null`. Infinities also
/// serialize as `null` and therefore come back as NaN.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

/// Fixed-rate variable. `values` is the concatenation of one segment per
/// run, each `ceil(duration * sampling_rate)` samples long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseRunVariable {
    name: String,
    source: String,
    #[serde(with = "nan_as_null")]
    values: Vec<f64>,
    sampling_rate: f64,
    run_info: Vec<RunInfo>,
}

impl DenseRunVariable {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        values: Vec<f64>,
        sampling_rate: f64,
        run_info: Vec<RunInfo>,
    ) -> Result<Self> {
        let var = DenseRunVariable {
            name: name.into(),
            source: source.into(),
            values,
            sampling_rate,
            run_info,
        };
        var.validate()?;
        Ok(var)
    }

    pub fn validate(&self) -> Result<()> {
        check_rate(self.sampling_rate)?;
        let expected = self.expected_len(self.sampling_rate);
        if expected != self.values.len() {
            return Err(VariableError::LengthMismatch {
                name: self.name.clone(),
                expected,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    fn expected_len(&self, rate: f64) -> usize {
        self.run_info.iter().map(|r| r.n_samples(rate)).sum()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn run_info(&self) -> &[RunInfo] {
        &self.run_info
    }

    pub fn n_rows(&self) -> usize {
        self.values.len()
    }

    pub fn entities(&self) -> Entities {
        intersect_entities(&self.run_info)
    }

    /// The values of each run, paired with its descriptor.
    pub fn segments(&self) -> impl Iterator<Item = (&RunInfo, &[f64])> {
        let offsets = segment_offsets(&self.run_info, self.sampling_rate);
        self.run_info
            .iter()
            .enumerate()
            .map(move |(i, run)| (run, &self.values[offsets[i]..offsets[i + 1]]))
    }

    /// Resample every run segment independently to `sampling_rate`.
    ///
    /// When downsampling, a centred moving average over `old / new` samples
    /// is applied before interpolating.
    pub fn resample(&self, sampling_rate: f64, kind: Interpolation) -> Result<DenseRunVariable> {
        let rate = check_rate(sampling_rate)?;
        if rate == self.sampling_rate {
            return Ok(self.clone());
        }

        let window = if rate < self.sampling_rate {
            (self.sampling_rate / rate).round() as usize
        } else {
            1
        };
        let mut values = Vec::with_capacity(self.expected_len(rate));
        for (run, segment) in self.segments() {
            let smoothed;
            let source = if window > 1 {
                smoothed = moving_average(segment, window);
                smoothed.as_slice()
            } else {
                segment
            };
            values.extend(interpolate(source, run.n_samples(rate), kind));
        }

        debug!(
            "resampled {} from {} Hz to {} Hz ({} -> {} samples)",
            self.name,
            self.sampling_rate,
            rate,
            self.values.len(),
            values.len()
        );

        Ok(DenseRunVariable {
            name: self.name.clone(),
            source: self.source.clone(),
            values,
            sampling_rate: rate,
            run_info: self.run_info.clone(),
        })
    }

    fn select_runs(&self, keep: &[usize]) -> Self {
        let segments: Vec<&[f64]> = self.segments().map(|(_, seg)| seg).collect();
        DenseRunVariable {
            name: self.name.clone(),
            source: self.source.clone(),
            values: keep.iter().flat_map(|&i| segments[i].iter().copied()).collect(),
            sampling_rate: self.sampling_rate,
            run_info: keep.iter().map(|&i| self.run_info[i].clone()).collect(),
        }
    }
}

/// Centred moving average; the window shrinks at the edges.
fn moving_average(y: &[f64], window: usize) -> Vec<f64> {
    let half_before = window / 2;
    let half_after = (window - 1) / 2;
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half_before);
            let hi = (i + half_after + 1).min(y.len());
            y[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// Sample `y` at `m` evenly spaced positions spanning `[0, n - 1]`.
fn interpolate(y: &[f64], m: usize, kind: Interpolation) -> Vec<f64> {
    let n = y.len();
    if m == 0 {
        return Vec::new();
    }
    if n == 0 {
        return vec![f64::NAN; m];
    }
    if n == 1 || m == 1 {
        return vec![y[0]; m];
    }
    let step = (n - 1) as f64 / (m - 1) as f64;
    (0..m)
        .map(|j| {
            let x = j as f64 * step;
            match kind {
                Interpolation::Nearest => y[(x.round() as usize).min(n - 1)],
                Interpolation::Previous => y[(x.floor() as usize).min(n - 1)],
                Interpolation::Linear => {
                    let i0 = (x.floor() as usize).min(n - 1);
                    let frac = x - i0 as f64;
                    if frac == 0.0 || i0 + 1 == n {
                        y[i0]
                    } else {
                        y[i0] * (1.0 - frac) + y[i0 + 1] * frac
                    }
                }
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Variable – the sparse / dense sum type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variable {
    Sparse(SparseRunVariable),
    Dense(DenseRunVariable),
}

impl From<SparseRunVariable> for Variable {
    fn from(v: SparseRunVariable) -> Self {
        Variable::Sparse(v)
    }
}

impl From<DenseRunVariable> for Variable {
    fn from(v: DenseRunVariable) -> Self {
        Variable::Dense(v)
    }
}

impl Variable {
    pub fn name(&self) -> &str {
        match self {
            Variable::Sparse(v) => &v.name,
            Variable::Dense(v) => &v.name,
        }
    }

    pub(crate) fn set_name(&mut self, name: String) {
        match self {
            Variable::Sparse(v) => v.name = name,
            Variable::Dense(v) => v.name = name,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Variable::Sparse(v) => &v.source,
            Variable::Dense(v) => &v.source,
        }
    }

    pub fn run_info(&self) -> &[RunInfo] {
        match self {
            Variable::Sparse(v) => &v.run_info,
            Variable::Dense(v) => &v.run_info,
        }
    }

    pub fn n_rows(&self) -> usize {
        match self {
            Variable::Sparse(v) => v.n_rows(),
            Variable::Dense(v) => v.n_rows(),
        }
    }

    pub fn entities(&self) -> Entities {
        intersect_entities(self.run_info())
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Variable::Sparse(v) => v.validate(),
            Variable::Dense(v) => v.validate(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Variable::Sparse(_))
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Variable::Dense(_))
    }

    pub fn as_sparse(&self) -> Option<&SparseRunVariable> {
        match self {
            Variable::Sparse(v) => Some(v),
            Variable::Dense(_) => None,
        }
    }

    pub fn as_sparse_mut(&mut self) -> Option<&mut SparseRunVariable> {
        match self {
            Variable::Sparse(v) => Some(v),
            Variable::Dense(_) => None,
        }
    }

    pub fn as_dense(&self) -> Option<&DenseRunVariable> {
        match self {
            Variable::Dense(v) => Some(v),
            Variable::Sparse(_) => None,
        }
    }

    /// Dense rendition at `sampling_rate`; dense inputs are resampled
    /// linearly.
    pub fn to_dense(&self, sampling_rate: f64) -> Result<DenseRunVariable> {
        match self {
            Variable::Sparse(v) => v.to_dense(sampling_rate),
            Variable::Dense(v) => v.resample(sampling_rate, Interpolation::Linear),
        }
    }

    /// Restrict to the given run indices, in that order.
    pub(crate) fn select_runs(&self, keep: &[usize]) -> Variable {
        match self {
            Variable::Sparse(v) => Variable::Sparse(v.select_runs(keep)),
            Variable::Dense(v) => Variable::Dense(v.select_runs(keep)),
        }
    }

    /// Keep only the runs whose entities pass `filter`; `None` when no run
    /// survives.
    pub fn filter_runs(&self, filter: &EntityFilter) -> Option<Variable> {
        let keep: Vec<usize> = self
            .run_info()
            .iter()
            .enumerate()
            .filter(|(_, run)| run_passes(&run.entities, filter))
            .map(|(i, _)| i)
            .collect();
        if keep.is_empty() {
            None
        } else {
            Some(self.select_runs(&keep))
        }
    }

    /// One single-run variable per run, in run order.
    pub fn split_runs(&self) -> Vec<Variable> {
        (0..self.run_info().len())
            .map(|i| self.select_runs(&[i]))
            .collect()
    }

    fn kind(&self) -> &'static str {
        match self {
            Variable::Sparse(_) => "sparse",
            Variable::Dense(_) => "dense",
        }
    }
}

// ---------------------------------------------------------------------------
// Merging same-named variables across runs
// ---------------------------------------------------------------------------

/// Concatenate same-named variables, in input order.
///
/// All inputs must share representation and source. Dense inputs sampled
/// at different rates are first resampled to the highest of them.
pub fn merge_variables(variables: Vec<Variable>) -> Result<Variable> {
    let Some(first) = variables.first() else {
        return Err(VariableError::UnknownVariable(String::new()));
    };
    let name = first.name().to_string();

    if variables.iter().any(|v| v.kind() != first.kind()) {
        return Err(VariableError::MixedKinds { name });
    }
    let mut sources: Vec<String> = Vec::new();
    for v in &variables {
        if !sources.iter().any(|s| s == v.source()) {
            sources.push(v.source().to_string());
        }
    }
    if sources.len() > 1 {
        return Err(VariableError::MixedSources { name, sources });
    }
    let source = sources.swap_remove(0);

    if first.is_sparse() {
        let mut events = Vec::new();
        let mut run_info = Vec::new();
        for v in variables.into_iter().filter_map(|v| match v {
            Variable::Sparse(s) => Some(s),
            Variable::Dense(_) => None,
        }) {
            let offset = run_info.len();
            events.extend(v.events.into_iter().map(|ev| Event {
                run: ev.run + offset,
                ..ev
            }));
            run_info.extend(v.run_info);
        }
        return Ok(Variable::Sparse(SparseRunVariable {
            name,
            source,
            events,
            run_info,
        }));
    }

    let dense: Vec<DenseRunVariable> = variables
        .into_iter()
        .filter_map(|v| match v {
            Variable::Dense(d) => Some(d),
            Variable::Sparse(_) => None,
        })
        .collect();
    let rate = dense
        .iter()
        .map(|d| d.sampling_rate)
        .fold(f64::NEG_INFINITY, f64::max);
    if dense.iter().any(|d| d.sampling_rate != rate) {
        debug!("merging {name}: resampling inputs to the highest rate ({rate} Hz)");
    }

    let mut values = Vec::new();
    let mut run_info = Vec::new();
    for d in dense {
        let d = if d.sampling_rate == rate {
            d
        } else {
            d.resample(rate, Interpolation::Linear)?
        };
        values.extend(d.values);
        run_info.extend(d.run_info);
    }
    Ok(Variable::Dense(DenseRunVariable {
        name,
        source,
        values,
        sampling_rate: rate,
        run_info,
    }))
}
