use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Entity key → value, e.g. `subject → "01"`, `run → "2"`.
///
/// Sorted so entity columns come out in a fixed order.
pub type Entities = BTreeMap<String, String>;

/// Immutable description of one acquisition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub entities: Entities,
    /// Run length in seconds.
    pub duration: f64,
    /// Acquisition rate in Hz (one over the repetition time).
    pub sampling_rate: f64,
    /// Image-level sidecar metadata (`RepetitionTime`, `SliceTiming`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_metadata: Option<Map<String, JsonValue>>,
}

impl RunInfo {
    pub fn new(
        entities: Entities,
        duration: f64,
        sampling_rate: f64,
        image_metadata: Option<Map<String, JsonValue>>,
    ) -> Self {
        RunInfo {
            entities,
            duration,
            sampling_rate,
            image_metadata,
        }
    }

    /// Repetition time in seconds.
    pub fn tr(&self) -> f64 {
        1.0 / self.sampling_rate
    }

    /// Number of samples covering this run at `rate`.
    pub fn n_samples(&self, rate: f64) -> usize {
        n_samples(self.duration, rate)
    }
}

/// `ceil(duration * rate)`, tolerant of float noise just above an integer.
pub fn n_samples(duration: f64, rate: f64) -> usize {
    let exact = duration * rate;
    if !exact.is_finite() || exact <= 0.0 {
        return 0;
    }
    (exact - 1e-9).ceil().max(0.0) as usize
}

/// Entity pairs shared by every run: a key survives only if all runs carry
/// it with the same value. No runs → no entities.
pub fn intersect_entities<'a, I>(runs: I) -> Entities
where
    I: IntoIterator<Item = &'a RunInfo>,
{
    let mut runs = runs.into_iter();
    let Some(first) = runs.next() else {
        return Entities::new();
    };
    let mut common = first.entities.clone();
    for run in runs {
        common.retain(|key, value| run.entities.get(key) == Some(value));
        if common.is_empty() {
            break;
        }
    }
    common
}
