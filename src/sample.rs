//! Deterministic synthetic mixed-gambles dataset.
//!
//! Every run gets the same eight event variables (`PTval`, `RT`, `gain`,
//! `loss`, `parametric gain`, `respcat`, `respnum`, `trial_type`), one row
//! per trial. The dataset can be handed out either as one collection per run
//! or as a single collection built directly over all runs; both come from
//! the same draws, so they describe identical data.

use serde_json::json;

use crate::data::collection::RunVariableCollection;
use crate::data::model::Value;
use crate::data::run_info::{Entities, RunInfo};
use crate::data::variable::{Event, SparseRunVariable, Variable};
use crate::error::Result;

pub const VARIABLE_NAMES: [&str; 8] = [
    "PTval",
    "RT",
    "gain",
    "loss",
    "parametric gain",
    "respcat",
    "respnum",
    "trial_type",
];

const TASK: &str = "mixedgamblestask";
const TRIAL_DURATION: f64 = 3.0;
const MEAN_GAIN: f64 = 25.0;

/// Shape of the generated dataset.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub n_subjects: usize,
    pub n_runs: usize,
    /// Run length in seconds.
    pub scan_length: f64,
    pub repetition_time: f64,
    pub seed: u64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            n_subjects: 16,
            n_runs: 3,
            scan_length: 480.0,
            repetition_time: 2.0,
            seed: 42,
        }
    }
}

/// Deterministic trial draws (SplitMix64). Only uniform integers and
/// unit floats are needed here.
struct TrialRng(u64);

impl TrialRng {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform integer in `lo..=hi`.
    fn range(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next_u64() % (hi - lo + 1) as u64) as i64
    }

    /// Seconds until the next trial: a 4-8 s jittered inter-trial interval.
    fn jitter(&mut self) -> f64 {
        self.range(4, 8) as f64
    }
}

/// One trial: an amplitude per variable, in [`VARIABLE_NAMES`] order.
struct Trial {
    onset: f64,
    amplitudes: [Value; 8],
}

struct RunData {
    info: RunInfo,
    trials: Vec<Trial>,
}

fn run_info(spec: &SampleSpec, subject: usize, run: usize) -> RunInfo {
    let entities: Entities = [
        ("subject", format!("{subject:02}")),
        ("run", run.to_string()),
        ("task", TASK.to_string()),
        ("suffix", "bold".to_string()),
        ("datatype", "func".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let n_slices = 8;
    let slice_timing: Vec<f64> = (0..n_slices)
        .map(|i| i as f64 * spec.repetition_time / n_slices as f64)
        .collect();
    let image = json!({
        "TaskName": "mixed-gambles task",
        "RepetitionTime": spec.repetition_time,
        "SliceTiming": slice_timing,
        "extension": ".nii.gz",
    });
    RunInfo::new(
        entities,
        spec.scan_length,
        1.0 / spec.repetition_time,
        image.as_object().cloned(),
    )
}

fn generate_trials(spec: &SampleSpec, rng: &mut TrialRng) -> Vec<Trial> {
    let mut trials = Vec::new();
    let mut onset = rng.range(0, 4) as f64;
    while onset + TRIAL_DURATION <= spec.scan_length {
        let gain = rng.range(5, 20) * 2;
        let loss = rng.range(5, 20);
        let rt = ((0.5 + rng.unit() * 2.5) * 1000.0).round() / 1000.0;
        let respnum = rng.range(0, 4);
        let respcat = match respnum {
            0 => -1,
            1 | 2 => 1,
            _ => 0,
        };
        trials.push(Trial {
            onset,
            amplitudes: [
                Value::Float(gain as f64 - 1.5 * loss as f64),
                Value::Float(rt),
                Value::Integer(gain),
                Value::Integer(loss),
                Value::Float(gain as f64 - MEAN_GAIN),
                Value::Integer(respcat),
                Value::Integer(respnum),
                Value::String("parametric gain".to_string()),
            ],
        });
        onset += rng.jitter();
    }
    trials
}

fn generate(spec: &SampleSpec) -> Vec<RunData> {
    let mut rng = TrialRng(spec.seed);
    let mut runs = Vec::with_capacity(spec.n_subjects * spec.n_runs);
    for subject in 1..=spec.n_subjects {
        for run in 1..=spec.n_runs {
            runs.push(RunData {
                info: run_info(spec, subject, run),
                trials: generate_trials(spec, &mut rng),
            });
        }
    }
    runs
}

/// Build the eight variables over `runs`, in [`VARIABLE_NAMES`] order.
fn build_variables(runs: &[&RunData]) -> Result<Vec<Variable>> {
    let run_info: Vec<RunInfo> = runs.iter().map(|r| r.info.clone()).collect();
    VARIABLE_NAMES
        .iter()
        .enumerate()
        .map(|(k, name)| {
            let events = runs
                .iter()
                .enumerate()
                .flat_map(|(run, data)| {
                    data.trials.iter().map(move |t| {
                        Event::new(t.onset, TRIAL_DURATION, t.amplitudes[k].clone(), run)
                    })
                })
                .collect();
            Ok(SparseRunVariable::new(*name, "events", events, run_info.clone())?.into())
        })
        .collect()
}

/// One collection per run, subject-major.
pub fn run_collections(spec: &SampleSpec) -> Result<Vec<RunVariableCollection>> {
    generate(spec)
        .iter()
        .map(|run| Ok(RunVariableCollection::new(build_variables(&[run])?)))
        .collect()
}

/// All runs in a single collection, built without going through a merge.
pub fn merged_collection(spec: &SampleSpec) -> Result<RunVariableCollection> {
    let runs = generate(spec);
    let refs: Vec<&RunData> = runs.iter().collect();
    Ok(RunVariableCollection::new(build_variables(&refs)?))
}
