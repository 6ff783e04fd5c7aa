//! Run-level variable collections for BIDS datasets.
//!
//! A [`RunVariableCollection`] holds event-based (sparse) and regularly
//! sampled (dense) variables over one or more runs. Collections can be
//! resampled to a common rate, merged across runs, and flattened into a
//! [`Table`] in wide or long layout.

pub mod data;
pub mod error;
pub mod sample;

pub use data::collection::{
    merge_collections, ResampleOptions, RunVariableCollection, SamplingRate,
    DEFAULT_SAMPLING_RATE,
};
pub use data::export::{ExportOptions, TableFormat};
pub use data::filter::MatchType;
pub use data::model::{Table, Value};
pub use data::run_info::{Entities, RunInfo};
pub use data::variable::{
    merge_variables, DenseRunVariable, Event, Interpolation, SparseRunVariable, Variable,
};
pub use error::{Result, VariableError};
