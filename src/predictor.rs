//! The windowed multi-curve LSTM predictor.
//!
//! Combines the windowing capability ([`WindowedEstimator`]) with the
//! recurrent hyperparameters ([`HyperParameters`]) and owns everything a fit
//! produces: the two scalers, the trained model and its training history.

use std::fmt;

use chrono::{DateTime, Utc};
use ndarray::Array3;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::architecture::{Architecture, ArchitectureBuilder, Backend, LayerSpec, SequenceModel};
use crate::error::{ForecastError, Result};
use crate::models::windowed_lstm::NdarrayBackend;
use crate::normalize::{MinMaxScaler, ScalerPair};
use crate::params::{HyperParameters, ResolvedHyperParameters};
use crate::training::{Trainer, TrainingHistory, TrainingLogger};
use crate::utils::display_option;
use crate::windowing::{WindowSettings, WindowedEstimator};

/// How the input side is scaled at prediction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputScaling {
    /// Fit a fresh scaler on the prediction input and keep it as the stored
    /// input scaler. Inference then depends on the statistics of the batch
    /// being predicted rather than on the training data.
    #[default]
    RecalibrateOnPredict,
    /// Scale the prediction input with the scaler fitted during training.
    ReuseTrained,
}

/// Fails unless `output_width` steps can be folded out of `input_width` steps.
pub fn check_width_compatibility(input_width: usize, output_width: usize) -> Result<()> {
    let reason = if output_width == 0 {
        "width_output must be positive"
    } else if output_width > input_width {
        "width_output is greater than width_input"
    } else if input_width % output_width != 0 {
        "width_input is not an exact multiple of width_output"
    } else {
        return Ok(());
    };
    Err(ForecastError::IncompatibleWidths {
        input_width,
        output_width,
        reason,
    })
}

/// Assembles `LSTM × depth → Reshape(output_width, -1) → TimeDistributed(Dense)`.
pub fn build_architecture(
    params: &ResolvedHyperParameters,
    input_width: usize,
    output_width: usize,
    input_features: usize,
    output_features: usize,
) -> Result<Architecture> {
    let mut builder = ArchitectureBuilder::new((input_width, input_features));
    for &units in &params.hidden_units {
        builder.add(LayerSpec::Recurrent {
            units,
            input_dropout: params.input_dropout,
            recurrent_dropout: params.recurrent_dropout,
        })?;
    }
    builder.add(LayerSpec::Reshape {
        timesteps: output_width,
    })?;
    builder.add(LayerSpec::TimeDistributedDense {
        units: output_features,
    })?;
    builder.build()
}

/// Stacked-LSTM forecaster mapping an input window of every curve to the
/// following output window.
pub struct MultiCurveWindowedLstmPredictor<B: Backend = NdarrayBackend> {
    hyperparameters: HyperParameters,
    windows: WindowSettings,
    allow_missing_values: bool,
    input_scaling: InputScaling,
    backend: B,
    scalers: Option<ScalerPair>,
    model: Option<B::Model>,
    history: Option<TrainingHistory>,
    fitted_at: Option<DateTime<Utc>>,
}

impl MultiCurveWindowedLstmPredictor<NdarrayBackend> {
    pub fn new(allow_missing_values: bool) -> Self {
        Self::with_backend(NdarrayBackend::default(), allow_missing_values)
    }
}

impl Default for MultiCurveWindowedLstmPredictor<NdarrayBackend> {
    fn default() -> Self {
        Self::new(false)
    }
}

impl<B: Backend + Clone> MultiCurveWindowedLstmPredictor<B> {
    pub fn with_backend(backend: B, allow_missing_values: bool) -> Self {
        MultiCurveWindowedLstmPredictor {
            hyperparameters: HyperParameters::default(),
            windows: WindowSettings::default(),
            allow_missing_values,
            input_scaling: InputScaling::default(),
            backend,
            scalers: None,
            model: None,
            history: None,
            fitted_at: None,
        }
    }

    pub fn with_input_scaling(mut self, input_scaling: InputScaling) -> Self {
        self.input_scaling = input_scaling;
        self
    }

    pub fn with_hyperparameters(mut self, hyperparameters: HyperParameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn with_window_settings(mut self, windows: WindowSettings) -> Self {
        self.windows = windows;
        self
    }

    pub fn hyperparameters(&self) -> &HyperParameters {
        &self.hyperparameters
    }

    pub fn hyperparameters_mut(&mut self) -> &mut HyperParameters {
        &mut self.hyperparameters
    }

    pub fn input_scaling(&self) -> InputScaling {
        self.input_scaling
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn model(&self) -> Option<&B::Model> {
        self.model.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn scalers(&self) -> Option<&ScalerPair> {
        self.scalers.as_ref()
    }

    /// History of the most recent successful fit.
    pub fn history(&self) -> Option<&TrainingHistory> {
        self.history.as_ref()
    }

    /// Applies `parameters` to the windowing settings, then to the recurrent
    /// hyperparameters. Unknown keys are ignored by both.
    pub fn set_parameters(&mut self, parameters: Option<&Map<String, Value>>) -> Result<()> {
        self.windows.set_parameters(parameters)?;
        self.hyperparameters.set_parameters(parameters)
    }

    /// A new, unfitted predictor with the same configuration.
    pub fn get_deep_copy(&self) -> Self {
        MultiCurveWindowedLstmPredictor {
            hyperparameters: self.hyperparameters.clone(),
            windows: self.windows.clone(),
            allow_missing_values: self.allow_missing_values,
            input_scaling: self.input_scaling,
            backend: self.backend.clone(),
            scalers: None,
            model: None,
            history: None,
            fitted_at: None,
        }
    }

    /// Drops the fitted model and asks the backend to free its memory.
    ///
    /// Scalers and configuration are kept. Backend failures are logged, not
    /// returned, and calling this without a model is harmless.
    pub fn compact(&mut self) {
        debug!("Started compacting");
        if let Some(model) = self.model.take() {
            debug!(parameters = model.architecture().total_parameters(), "Released fitted model");
        }
        if let Err(err) = self.backend.release_memory() {
            warn!(backend = self.backend.name(), error = %err, "Could not clear backend memory");
        }
        debug!("Done compacting");
    }

    fn build_and_fit(&mut self, input: &Array3<f64>, target: &Array3<f64>) -> Result<()> {
        let resolved = self.hyperparameters.resolve()?;
        debug!("Will build a {}-layer LSTM", resolved.hidden_units.len());

        let (input_width, output_width) = self.windows.require_widths()?;
        check_width_compatibility(input_width, output_width)?;

        let (samples, input_steps, input_features) = input.dim();
        let (target_samples, target_steps, output_features) = target.dim();
        debug!(
            input_shape = ?input.shape(),
            input_features,
            target_shape = ?target.shape(),
            output_features,
            "Inspected training tensors"
        );
        if input_steps != input_width {
            return Err(ForecastError::shape("training input", &[samples, input_width, input_features], input.shape()));
        }
        if target_samples != samples || target_steps != output_width {
            return Err(ForecastError::shape("training target", &[samples, output_width, output_features], target.shape()));
        }
        if samples == 0 {
            return Err(ForecastError::EmptyData("no training windows".into()));
        }

        // Scale into [0, 1] through the flattened (samples, timesteps * features) view
        let (input_scaler, scaled_input) = MinMaxScaler::fit_transform_3d(input)?;
        let (output_scaler, scaled_target) = MinMaxScaler::fit_transform_3d(target)?;

        let architecture = build_architecture(&resolved, input_width, output_width, input_features, output_features)?;
        let mut model = self.backend.build(&architecture).map_err(|err| {
            error!("Model architecture so far is:\n{}", architecture.summary());
            err
        })?;
        debug!("Built the following model:\n{}", architecture.summary());

        let logger = TrainingLogger::new().with_description(self.to_string());
        let history = Trainer::new(resolved.training_epochs)
            .with_observer(Box::new(logger))
            .fit(&mut model, &scaled_input, &scaled_target)?;

        self.fitted_at = Some(history.started_at);
        self.history = Some(history);
        self.scalers = Some(ScalerPair {
            input: input_scaler,
            output: output_scaler,
        });
        self.model = Some(model);
        debug!("Done building and fitting an LSTM model, and calibrating the scalers");
        Ok(())
    }

    fn predict_from_model(&mut self, input: &Array3<f64>) -> Result<Array3<f64>> {
        let (model, scalers) = match (self.model.as_ref(), self.scalers.as_ref()) {
            (Some(model), Some(scalers)) => (model, scalers),
            _ => return Err(ForecastError::NotFitted),
        };
        debug!(input_shape = ?input.shape(), "Predicting");

        let (timesteps, features) = model.architecture().input_shape();
        let (samples, input_steps, input_features) = input.dim();
        if input_steps != timesteps || input_features != features {
            return Err(ForecastError::shape("prediction input", &[samples, timesteps, features], input.shape()));
        }

        let (scaled_input, recalibrated) = match self.input_scaling {
            InputScaling::RecalibrateOnPredict => {
                let (scaler, scaled) = MinMaxScaler::fit_transform_3d(input)?;
                (scaled, Some(scaler))
            }
            InputScaling::ReuseTrained => (scalers.input.transform_3d(input)?, None),
        };

        let scaled_output = model.predict(&scaled_input)?;
        debug!(output_shape = ?scaled_output.shape(), "Predicted scaled output");
        let output = scalers.output.inverse_transform_3d(&scaled_output)?;

        if let (Some(scaler), Some(scalers)) = (recalibrated, self.scalers.as_mut()) {
            scalers.input = scaler;
        }
        Ok(output)
    }
}

impl<B: Backend + Clone> WindowedEstimator for MultiCurveWindowedLstmPredictor<B> {
    fn window_settings(&self) -> &WindowSettings {
        &self.windows
    }

    fn window_settings_mut(&mut self) -> &mut WindowSettings {
        &mut self.windows
    }

    fn allow_missing_values(&self) -> bool {
        self.allow_missing_values
    }

    fn fit_windows(&mut self, input: &Array3<f64>, target: &Array3<f64>) -> Result<()> {
        self.build_and_fit(input, target)
    }

    fn predict_windows(&mut self, input: &Array3<f64>) -> Result<Array3<f64>> {
        self.predict_from_model(input)
    }
}

impl<B: Backend> fmt::Display for MultiCurveWindowedLstmPredictor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = &self.hyperparameters;
        let model = self.model.as_ref().map(|m| m.architecture().to_string());
        let scalers = self
            .scalers
            .as_ref()
            .map(|s| format!("({}, {})", s.input, s.output));

        write!(
            f,
            "MultiCurveWindowedLstmPredictor(hidden_units = {}, training_epochs = {}, input_dropout = {}, \
             recurrent_dropout = {}, width_input = {}, width_output = {}, train_over_prediction_times = {}, \
             model = {}, scalers = {}, fitted_at = {}, input_scaling = {:?}, allow_missing_values = {})",
            display_option(params.hidden_units.as_ref()),
            display_option(params.training_epochs.as_ref()),
            display_option(params.input_dropout.as_ref()),
            display_option(params.recurrent_dropout.as_ref()),
            display_option(self.windows.input_width.as_ref()),
            display_option(self.windows.output_width.as_ref()),
            self.windows.train_over_prediction_times,
            display_option(model.as_ref()),
            display_option(scalers.as_ref()),
            display_option(self.fitted_at.map(|t| t.to_rfc3339()).as_ref()),
            self.input_scaling,
            self.allow_missing_values
        )
    }
}

impl<B: Backend> fmt::Debug for MultiCurveWindowedLstmPredictor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::LayerWidths;

    fn configured(input_width: usize, output_width: usize) -> MultiCurveWindowedLstmPredictor {
        MultiCurveWindowedLstmPredictor::new(false)
            .with_hyperparameters(
                HyperParameters::new()
                    .with_hidden_units(LayerWidths::Single(3))
                    .with_training_epochs(2)
                    .with_input_dropout(0.1)
                    .with_recurrent_dropout(0.1),
            )
            .with_window_settings(WindowSettings::new(input_width, output_width))
    }

    fn ramp(samples: usize, timesteps: usize, features: usize, offset: f64) -> Array3<f64> {
        Array3::from_shape_fn((samples, timesteps, features), |(i, t, f)| {
            offset + (i * 7 + t * 3 + f) as f64 % 11.0
        })
    }

    #[test]
    fn test_width_compatibility() {
        assert!(check_width_compatibility(100, 20).is_ok());
        assert!(check_width_compatibility(6, 6).is_ok());
        for (input_width, output_width) in [(100, 7), (5, 10), (4, 0)] {
            assert!(matches!(
                check_width_compatibility(input_width, output_width),
                Err(ForecastError::IncompatibleWidths { .. })
            ));
        }
    }

    #[test]
    fn test_build_architecture_shapes() {
        let params = ResolvedHyperParameters {
            hidden_units: vec![20, 10],
            training_epochs: 10,
            input_dropout: 0.2,
            recurrent_dropout: 0.12,
        };
        let architecture = build_architecture(&params, 100, 20, 2, 2).unwrap();
        assert_eq!(architecture.layers().len(), 4);
        assert_eq!(architecture.output_shape(), (20, 2));
    }

    #[test]
    fn test_fit_normalizes_scalar_width_and_predicts() {
        let mut predictor = configured(4, 2);
        let input = ramp(6, 4, 2, 0.0);
        let target = ramp(6, 2, 1, 5.0);

        predictor.fit_windows(&input, &target).unwrap();

        assert_eq!(
            predictor.hyperparameters().hidden_units,
            Some(LayerWidths::Stacked(vec![3]))
        );
        assert_eq!(predictor.history().map(|h| h.epochs()), Some(2));
        let output = predictor.predict_windows(&ramp(3, 4, 2, 1.0)).unwrap();
        assert_eq!(output.shape(), &[3, 2, 1]);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let mut predictor = configured(4, 2);
        assert!(matches!(
            predictor.predict_windows(&ramp(1, 4, 2, 0.0)),
            Err(ForecastError::NotFitted)
        ));
    }

    #[test]
    fn test_recalibration_replaces_input_scaler() {
        let mut predictor = configured(2, 1);
        predictor.fit_windows(&ramp(5, 2, 1, 0.0), &ramp(5, 1, 1, 0.0)).unwrap();
        let trained = predictor.scalers().unwrap().input.clone();

        let shifted = ramp(4, 2, 1, 100.0);
        predictor.predict_windows(&shifted).unwrap();

        let current = &predictor.scalers().unwrap().input;
        assert_ne!(current, &trained);
        assert!(current.data_min().iter().all(|&m| m >= 100.0));
    }

    #[test]
    fn test_reuse_trained_keeps_input_scaler() {
        let mut predictor = configured(2, 1).with_input_scaling(InputScaling::ReuseTrained);
        predictor.fit_windows(&ramp(5, 2, 1, 0.0), &ramp(5, 1, 1, 0.0)).unwrap();
        let trained = predictor.scalers().unwrap().input.clone();

        predictor.predict_windows(&ramp(4, 2, 1, 100.0)).unwrap();

        assert_eq!(&predictor.scalers().unwrap().input, &trained);
    }

    #[test]
    fn test_prediction_input_must_match_training_features() {
        let mut predictor = configured(2, 1);
        predictor.fit_windows(&ramp(5, 2, 2, 0.0), &ramp(5, 1, 1, 0.0)).unwrap();
        assert!(matches!(
            predictor.predict_windows(&ramp(3, 2, 3, 0.0)),
            Err(ForecastError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_display_renders_unset_fields() {
        let predictor = MultiCurveWindowedLstmPredictor::new(true);
        let text = predictor.to_string();
        assert!(text.contains("hidden_units = None"));
        assert!(text.contains("width_input = None"));
        assert!(text.contains("model = None"));
        assert!(text.contains("allow_missing_values = true"));
    }
}
