use thiserror::Error;

/// Errors raised by the collection, merge and export operations.
///
/// File I/O lives in [`crate::data::loader`] / [`crate::data::writer`] and
/// reports through `anyhow` instead.
#[derive(Debug, Error)]
pub enum VariableError {
    /// Rate resolution found more than one candidate rate.
    #[error("Non-unique sampling rates found ({rates:?}); specify a sampling rate explicitly")]
    NonUniqueRate { rates: Vec<f64> },

    /// An unrecognised sampling-rate token.
    #[error(
        "Invalid sampling rate value '{0}'; must be a number, 'TR', 'highest' or a variable name"
    )]
    InvalidSpecification(String),

    /// `highest` resolved to nothing and an operation needed a concrete rate.
    #[error("No sampling rate available (no dense variables); specify one explicitly")]
    RateUnavailable,

    #[error("Sampling rate must be positive and finite, got {0}")]
    InvalidRate(f64),

    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("Variable '{name}' has non-numeric amplitudes and cannot be made dense")]
    NonNumeric { name: String },

    #[error("Variable '{name}': expected {expected} samples for its runs but got {actual}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Variable '{name}': event {event} references run {run} but only {n_runs} runs are known")]
    RunOutOfRange {
        name: String,
        event: usize,
        run: usize,
        n_runs: usize,
    },

    #[error("Variables named '{name}' mix sparse and dense representations")]
    MixedKinds { name: String },

    #[error("Variables named '{name}' were extracted from different sources: {sources:?}")]
    MixedSources { name: String, sources: Vec<String> },

    /// A table would carry two columns with the same name, e.g. a variable
    /// named like a run entity.
    #[error("Column '{0}' appears more than once in the table")]
    DuplicateColumn(String),

    #[error("At least one of include_sparse or include_dense must be set")]
    NothingToExport,

    #[error("Invalid variable pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, VariableError>;
