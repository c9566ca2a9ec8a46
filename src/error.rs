//! Error types for the windowed LSTM forecaster.

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors raised while configuring, fitting or querying a predictor.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// One or more of the four recurrent hyperparameters was never set.
    #[error(
        "all of the following parameters must be set! hidden_units = {hidden_units}, \
         training_epochs = {training_epochs}, input_dropout = {input_dropout}, \
         recurrent_dropout = {recurrent_dropout}"
    )]
    MissingHyperParameters {
        hidden_units: String,
        training_epochs: String,
        input_dropout: String,
        recurrent_dropout: String,
    },

    /// A window width required for fitting was never set.
    #[error("window width `{0}` must be set before fitting")]
    MissingWindowWidth(&'static str),

    /// The output window cannot be folded out of the input window.
    #[error("width_input={input_width} is incompatible with width_output={output_width}: {reason}")]
    IncompatibleWidths {
        input_width: usize,
        output_width: usize,
        reason: &'static str,
    },

    /// A configuration value could not be coerced to the expected type.
    #[error("invalid value for parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A tensor did not have the shape the pipeline expects.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Layer assembly failed; `snapshot` is the architecture built so far.
    #[error("failed to assemble architecture: {reason}\n{snapshot}")]
    Architecture { reason: String, snapshot: String },

    /// Prediction was requested without a fitted model.
    #[error("predictor has no fitted model")]
    NotFitted,

    /// The numeric backend could not release its memory.
    #[error("could not release backend memory: {0}")]
    MemoryRelease(String),

    /// A curve contains a NaN or infinite value and missing values are not allowed.
    #[error("missing value in series {series} at time index {time_index}")]
    MissingValue { series: usize, time_index: usize },

    /// A tensor or data source contained no samples.
    #[error("empty input: {0}")]
    EmptyData(String),
}

impl ForecastError {
    pub(crate) fn shape(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        ForecastError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ForecastError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
