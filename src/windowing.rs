//! Windowed multi-curve orchestration.
//!
//! [`WindowedEstimator`] is the capability shared by every windowed
//! predictor: it owns the window widths, cuts a [`MultiSeriesSource`] into
//! paired input/target windows and hands the resulting tensors to the
//! estimator-specific fit and predict hooks.

use ndarray::{s, Array1, Array3};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::params::coerce_usize;

pub const PARAM_WIDTH_INPUT: &str = "width_input";
pub const PARAM_WIDTH_OUTPUT: &str = "width_output";
pub const PARAM_TRAIN_OVER_PREDICTION_TIMES: &str = "train_over_prediction_times";

/// Input and output window lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSettings {
    pub input_width: Option<usize>,
    pub output_width: Option<usize>,
    /// Passed through to the orchestration layer; not interpreted here.
    #[serde(default)]
    pub train_over_prediction_times: bool,
}

impl WindowSettings {
    pub fn new(input_width: usize, output_width: usize) -> Self {
        Self {
            input_width: Some(input_width),
            output_width: Some(output_width),
            train_over_prediction_times: false,
        }
    }

    pub fn with_train_over_prediction_times(mut self, enabled: bool) -> Self {
        self.train_over_prediction_times = enabled;
        self
    }

    /// Stores the recognised width keys present in `parameters`.
    pub fn set_parameters(&mut self, parameters: Option<&Map<String, Value>>) -> Result<()> {
        let parameters = match parameters {
            Some(parameters) => parameters,
            None => return Ok(()),
        };

        if let Some(value) = parameters.get(PARAM_WIDTH_INPUT) {
            let width = coerce_usize(PARAM_WIDTH_INPUT, value)?;
            debug!(width_input = width, "Set width_input");
            self.input_width = Some(width);
        }
        if let Some(value) = parameters.get(PARAM_WIDTH_OUTPUT) {
            let width = coerce_usize(PARAM_WIDTH_OUTPUT, value)?;
            debug!(width_output = width, "Set width_output");
            self.output_width = Some(width);
        }
        if let Some(value) = parameters.get(PARAM_TRAIN_OVER_PREDICTION_TIMES) {
            let enabled = coerce_bool(PARAM_TRAIN_OVER_PREDICTION_TIMES, value)?;
            debug!(train_over_prediction_times = enabled, "Set train_over_prediction_times");
            self.train_over_prediction_times = enabled;
        }
        Ok(())
    }

    /// Both widths, or an error naming the first one that is unset.
    pub fn require_widths(&self) -> Result<(usize, usize)> {
        let input_width = self
            .input_width
            .ok_or(ForecastError::MissingWindowWidth(PARAM_WIDTH_INPUT))?;
        let output_width = self
            .output_width
            .ok_or(ForecastError::MissingWindowWidth(PARAM_WIDTH_OUTPUT))?;
        Ok((input_width, output_width))
    }
}

fn coerce_bool(name: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|x| x != 0.0).unwrap_or(false)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ForecastError::invalid(name, format!("cannot parse {:?} as a boolean", s))),
        },
        other => Err(ForecastError::invalid(name, format!("expected a boolean, got {}", other))),
    }
}

/// A set of aligned curves that can be cut into windowed tensors.
pub trait MultiSeriesSource {
    /// Paired `(input, target)` windows, shaped `(samples, input_width, f_in)`
    /// and `(samples, output_width, f_out)`. Targets never include time.
    fn select_paired_windows(
        &self,
        include_time_as_feature: bool,
        value_columns: Option<&[&str]>,
        allow_missing_values: bool,
        input_width: usize,
        output_width: usize,
    ) -> Result<(Array3<f64>, Array3<f64>)>;

    /// Every series over its full time axis, `(series, times, f_in)`.
    fn select_merged(
        &self,
        include_time_as_feature: bool,
        value_columns: Option<&[&str]>,
        allow_missing_values: bool,
    ) -> Result<Array3<f64>>;
}

/// The windowing capability of a predictor.
pub trait WindowedEstimator {
    fn window_settings(&self) -> &WindowSettings;

    fn window_settings_mut(&mut self) -> &mut WindowSettings;

    fn allow_missing_values(&self) -> bool;

    /// Fits on already extracted windows.
    fn fit_windows(&mut self, input: &Array3<f64>, target: &Array3<f64>) -> Result<()>;

    /// Predicts output windows for already extracted input windows.
    fn predict_windows(&mut self, input: &Array3<f64>) -> Result<Array3<f64>>;

    fn fit_source<S: MultiSeriesSource + ?Sized>(
        &mut self,
        source: &S,
        include_time_as_feature: bool,
        value_columns: Option<&[&str]>,
    ) -> Result<()>
    where
        Self: Sized,
    {
        let (input_width, output_width) = self.window_settings().require_widths()?;
        let (input, target) = source.select_paired_windows(
            include_time_as_feature,
            value_columns,
            self.allow_missing_values(),
            input_width,
            output_width,
        )?;
        debug!(input_shape = ?input.shape(), target_shape = ?target.shape(), "Extracted training windows");
        self.fit_windows(&input, &target)
    }

    /// Predicts the window that follows the last `input_width` steps of each series.
    fn predict_source<S: MultiSeriesSource + ?Sized>(
        &mut self,
        source: &S,
        include_time_as_feature: bool,
        value_columns: Option<&[&str]>,
    ) -> Result<Array3<f64>>
    where
        Self: Sized,
    {
        let (input_width, _) = self.window_settings().require_widths()?;
        let merged = source.select_merged(include_time_as_feature, value_columns, self.allow_missing_values())?;
        let (series, timesteps, features) = merged.dim();
        if timesteps < input_width {
            return Err(ForecastError::shape(
                "merged series",
                &[series, input_width, features],
                merged.shape(),
            ));
        }
        let window = merged.slice(s![.., timesteps - input_width.., ..]).to_owned();
        self.predict_windows(&window)
    }
}

/// In-memory aligned curves: every series observed at the same times.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSet {
    times: Array1<f64>,
    values: Array3<f64>,
    feature_names: Vec<String>,
}

impl CurveSet {
    /// `values` is `(series, times, features)`.
    pub fn new(times: Array1<f64>, values: Array3<f64>, feature_names: Vec<String>) -> Result<Self> {
        let (_, timesteps, features) = values.dim();
        if times.len() != timesteps || feature_names.len() != features {
            return Err(ForecastError::shape(
                "curve set",
                &[values.dim().0, times.len(), feature_names.len()],
                values.shape(),
            ));
        }
        Ok(Self {
            times,
            values,
            feature_names,
        })
    }

    pub fn n_series(&self) -> usize {
        self.values.dim().0
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn column_indices(&self, value_columns: Option<&[&str]>) -> Result<Vec<usize>> {
        match value_columns {
            None => Ok((0..self.feature_names.len()).collect()),
            Some(columns) => columns
                .iter()
                .map(|name| {
                    self.feature_names
                        .iter()
                        .position(|known| known == name)
                        .ok_or_else(|| ForecastError::invalid("value_columns", format!("unknown column {:?}", name)))
                })
                .collect(),
        }
    }

    fn check_missing(&self, columns: &[usize]) -> Result<()> {
        for ((series, time_index, feature), value) in self.values.indexed_iter() {
            if columns.contains(&feature) && !value.is_finite() {
                return Err(ForecastError::MissingValue { series, time_index });
            }
        }
        Ok(())
    }

    /// Feature value of the (possibly time-augmented) input layout.
    fn input_value(&self, series: usize, time_index: usize, feature: usize, columns: &[usize]) -> f64 {
        match columns.get(feature) {
            Some(&column) => self.values[[series, time_index, column]],
            None => self.times[time_index],
        }
    }
}

impl MultiSeriesSource for CurveSet {
    fn select_paired_windows(
        &self,
        include_time_as_feature: bool,
        value_columns: Option<&[&str]>,
        allow_missing_values: bool,
        input_width: usize,
        output_width: usize,
    ) -> Result<(Array3<f64>, Array3<f64>)> {
        let columns = self.column_indices(value_columns)?;
        if !allow_missing_values {
            self.check_missing(&columns)?;
        }

        let span = input_width + output_width;
        if span == 0 || span > self.n_times() {
            return Err(ForecastError::EmptyData(format!(
                "{} time steps cannot hold an input window of {} and an output window of {}",
                self.n_times(),
                input_width,
                output_width
            )));
        }

        let starts_per_series = self.n_times() - span + 1;
        let windows: Vec<(usize, usize)> = (0..self.n_series())
            .flat_map(|series| (0..starts_per_series).map(move |start| (series, start)))
            .collect();
        if windows.is_empty() {
            return Err(ForecastError::EmptyData("curve set has no series".into()));
        }

        let input_features = columns.len() + usize::from(include_time_as_feature);
        let input = Array3::from_shape_fn((windows.len(), input_width, input_features), |(w, t, f)| {
            let (series, start) = windows[w];
            self.input_value(series, start + t, f, &columns)
        });
        let target = Array3::from_shape_fn((windows.len(), output_width, columns.len()), |(w, t, f)| {
            let (series, start) = windows[w];
            self.values[[series, start + input_width + t, columns[f]]]
        });
        Ok((input, target))
    }

    fn select_merged(
        &self,
        include_time_as_feature: bool,
        value_columns: Option<&[&str]>,
        allow_missing_values: bool,
    ) -> Result<Array3<f64>> {
        let columns = self.column_indices(value_columns)?;
        if !allow_missing_values {
            self.check_missing(&columns)?;
        }
        let input_features = columns.len() + usize::from(include_time_as_feature);
        Ok(Array3::from_shape_fn(
            (self.n_series(), self.n_times(), input_features),
            |(series, t, f)| self.input_value(series, t, f, &columns),
        ))
    }
}
