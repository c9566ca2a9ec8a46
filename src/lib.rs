//! # Multi-curve LSTM forecaster
//!
//! Forecasts the next window of several aligned curves from the preceding
//! window with a stacked LSTM whose hidden sequence is folded into the output
//! window length and projected per timestep.
//!
//! ## Core Components
//!
//! - **Predictor**: [`MultiCurveWindowedLstmPredictor`] owns configuration, scalers and the fitted model
//! - **Windowing**: [`WindowedEstimator`] fit/predict hooks over any [`MultiSeriesSource`] such as [`CurveSet`]
//! - **Architecture**: declarative [`LayerSpec`] stacks with shape tracking, built by a [`Backend`]
//! - **Backend**: [`NdarrayBackend`] trains with BPTT, Adam and MSE on mini-batches
//! - **Training**: [`Trainer`] drives epochs and reports to [`TrainingObserver`]s
//!
//! ## Quick Start
//!
//! ```rust
//! use multicurve_lstm::{MultiCurveWindowedLstmPredictor, WindowedEstimator};
//! use ndarray::Array3;
//! use serde_json::json;
//!
//! let mut predictor = MultiCurveWindowedLstmPredictor::new(false);
//! let parameters = json!({
//!     "hidden_units": 4,
//!     "training_epochs": 1,
//!     "input_dropout": 0.1,
//!     "recurrent_dropout": 0.1,
//!     "width_input": 6,
//!     "width_output": 3
//! });
//! predictor.set_parameters(parameters.as_object()).unwrap();
//!
//! let input = Array3::from_shape_fn((8, 6, 2), |(i, t, f)| (i + t + f) as f64);
//! let target = Array3::from_shape_fn((8, 3, 2), |(i, t, f)| (i + t + f + 6) as f64);
//! predictor.fit_windows(&input, &target).unwrap();
//!
//! let forecast = predictor.predict_windows(&input).unwrap();
//! assert_eq!(forecast.shape(), &[8, 3, 2]);
//! ```

pub mod architecture;
pub mod error;
pub mod layers;
pub mod loss;
pub mod models;
pub mod normalize;
pub mod optimizers;
pub mod params;
pub mod predictor;
pub mod training;
pub mod utils;
pub mod windowing;

// Re-export commonly used items
pub use architecture::{Architecture, ArchitectureBuilder, Backend, LayerSpec, SequenceModel};
pub use error::{ForecastError, Result};
pub use models::windowed_lstm::{NdarrayBackend, WindowedLstmModel};
pub use normalize::{MinMaxScaler, ScalerPair};
pub use params::{HyperParameters, LayerWidths, ResolvedHyperParameters};
pub use predictor::{InputScaling, MultiCurveWindowedLstmPredictor};
pub use training::{Trainer, TrainingConfig, TrainingHistory, TrainingLogger, TrainingObserver};
pub use windowing::{CurveSet, MultiSeriesSource, WindowSettings, WindowedEstimator};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_library_integration() {
        let mut predictor = MultiCurveWindowedLstmPredictor::new(false);
        let parameters = json!({
            "hidden_units": [3, 2],
            "training_epochs": 1,
            "input_dropout": 0.0,
            "recurrent_dropout": 0.0,
            "width_input": 4,
            "width_output": 2
        });
        predictor.set_parameters(parameters.as_object()).unwrap();

        let input = ndarray::Array3::from_elem((2, 4, 1), 1.0);
        let target = ndarray::Array3::from_elem((2, 2, 1), 3.0);
        predictor.fit_windows(&input, &target).unwrap();

        let architecture = predictor.model().unwrap().architecture();
        assert_eq!(architecture.layers().len(), 4);
        assert_eq!(architecture.output_shape(), (2, 1));
    }
}
