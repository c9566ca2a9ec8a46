//! Hyperparameters of the recurrent architecture.
//!
//! Values arrive as an untyped JSON-like map (the same shape a tuning
//! orchestrator produces) and are coerced into [`HyperParameters`]. Only
//! type coercion happens here; relationships between values are checked
//! when a fit starts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::utils::display_option;

pub const PARAM_HIDDEN_UNITS: &str = "hidden_units";
pub const PARAM_TRAINING_EPOCHS: &str = "training_epochs";
pub const PARAM_INPUT_DROPOUT: &str = "input_dropout";
pub const PARAM_RECURRENT_DROPOUT: &str = "recurrent_dropout";

/// Hidden units per recurrent layer, either a single width or one per layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerWidths {
    Single(usize),
    Stacked(Vec<usize>),
}

impl LayerWidths {
    /// Widths in network depth order.
    pub fn to_vec(&self) -> Vec<usize> {
        match self {
            LayerWidths::Single(width) => vec![*width],
            LayerWidths::Stacked(widths) => widths.clone(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            LayerWidths::Single(_) => 1,
            LayerWidths::Stacked(widths) => widths.len(),
        }
    }
}

impl fmt::Display for LayerWidths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerWidths::Single(width) => write!(f, "{}", width),
            LayerWidths::Stacked(widths) => write!(f, "{:?}", widths),
        }
    }
}

/// The four recurrent hyperparameters, each unset until configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    pub hidden_units: Option<LayerWidths>,
    pub training_epochs: Option<usize>,
    pub input_dropout: Option<f64>,
    pub recurrent_dropout: Option<f64>,
}

/// Hyperparameters after the completeness check, ready for assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHyperParameters {
    pub hidden_units: Vec<usize>,
    pub training_epochs: usize,
    pub input_dropout: f64,
    pub recurrent_dropout: f64,
}

impl HyperParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hidden_units(mut self, hidden_units: LayerWidths) -> Self {
        self.hidden_units = Some(hidden_units);
        self
    }

    pub fn with_training_epochs(mut self, epochs: usize) -> Self {
        self.training_epochs = Some(epochs);
        self
    }

    pub fn with_input_dropout(mut self, rate: f64) -> Self {
        self.input_dropout = Some(rate);
        self
    }

    pub fn with_recurrent_dropout(mut self, rate: f64) -> Self {
        self.recurrent_dropout = Some(rate);
        self
    }

    /// Stores every recognised key present in `parameters`.
    ///
    /// Unknown keys are ignored. A `None` map leaves everything unchanged.
    /// On a coercion error, keys processed before the failing one stay set.
    pub fn set_parameters(&mut self, parameters: Option<&Map<String, Value>>) -> Result<()> {
        let parameters = match parameters {
            Some(parameters) => parameters,
            None => {
                debug!("Passed a None parameter map");
                return Ok(());
            }
        };

        if let Some(value) = parameters.get(PARAM_HIDDEN_UNITS) {
            let widths = coerce_layer_widths(PARAM_HIDDEN_UNITS, value)?;
            debug!(hidden_units = %widths, "Set hidden_units");
            self.hidden_units = Some(widths);
        }
        if let Some(value) = parameters.get(PARAM_TRAINING_EPOCHS) {
            let epochs = coerce_usize(PARAM_TRAINING_EPOCHS, value)?;
            debug!(training_epochs = epochs, "Set training_epochs");
            self.training_epochs = Some(epochs);
        }
        if let Some(value) = parameters.get(PARAM_INPUT_DROPOUT) {
            let rate = coerce_f64(PARAM_INPUT_DROPOUT, value)?;
            debug!(input_dropout = rate, "Set input_dropout");
            self.input_dropout = Some(rate);
        }
        if let Some(value) = parameters.get(PARAM_RECURRENT_DROPOUT) {
            let rate = coerce_f64(PARAM_RECURRENT_DROPOUT, value)?;
            debug!(recurrent_dropout = rate, "Set recurrent_dropout");
            self.recurrent_dropout = Some(rate);
        }
        Ok(())
    }

    /// Checks all four values are set and normalizes a scalar width into a
    /// one-element stack, storing the normalized form.
    pub fn resolve(&mut self) -> Result<ResolvedHyperParameters> {
        let (hidden_units, training_epochs, input_dropout, recurrent_dropout) = match (
            &self.hidden_units,
            self.training_epochs,
            self.input_dropout,
            self.recurrent_dropout,
        ) {
            (Some(h), Some(e), Some(i), Some(r)) => (h.clone(), e, i, r),
            _ => {
                return Err(ForecastError::MissingHyperParameters {
                    hidden_units: display_option(self.hidden_units.as_ref()),
                    training_epochs: display_option(self.training_epochs.as_ref()),
                    input_dropout: display_option(self.input_dropout.as_ref()),
                    recurrent_dropout: display_option(self.recurrent_dropout.as_ref()),
                })
            }
        };

        if let LayerWidths::Single(width) = hidden_units {
            self.hidden_units = Some(LayerWidths::Stacked(vec![width]));
            debug!("After validation, hidden_units = [{}]", width);
        }

        Ok(ResolvedHyperParameters {
            hidden_units: hidden_units.to_vec(),
            training_epochs,
            input_dropout,
            recurrent_dropout,
        })
    }
}

fn coerce_layer_widths(name: &str, value: &Value) -> Result<LayerWidths> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| coerce_usize(name, item))
            .collect::<Result<Vec<_>>>()
            .map(LayerWidths::Stacked),
        scalar => coerce_usize(name, scalar).map(LayerWidths::Single),
    }
}

/// Integer cast: floats truncate toward zero, numeric strings are parsed.
pub(crate) fn coerce_usize(name: &str, value: &Value) -> Result<usize> {
    let number = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return usize::try_from(u).map_err(|_| ForecastError::invalid(name, "value too large"));
            }
            n.as_f64()
                .ok_or_else(|| ForecastError::invalid(name, "not representable as a number"))?
        }
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ForecastError::invalid(name, format!("cannot parse {:?} as an integer", s)))?,
        other => {
            return Err(ForecastError::invalid(
                name,
                format!("expected an integer, got {}", other),
            ))
        }
    };

    let truncated = number.trunc();
    if !truncated.is_finite() || truncated < 0.0 || truncated > usize::MAX as f64 {
        return Err(ForecastError::invalid(
            name,
            format!("{} is not a non-negative integer", number),
        ));
    }
    Ok(truncated as usize)
}

/// Float cast from a number or a numeric string.
pub(crate) fn coerce_f64(name: &str, value: &Value) -> Result<f64> {
    let number = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ForecastError::invalid(name, "not representable as a float"))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ForecastError::invalid(name, format!("cannot parse {:?} as a float", s)))?,
        other => {
            return Err(ForecastError::invalid(
                name,
                format!("expected a float, got {}", other),
            ))
        }
    };

    if !number.is_finite() {
        return Err(ForecastError::invalid(name, "value must be finite"));
    }
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_set_parameters_coerces_values() {
        let mut params = HyperParameters::new();
        let map = as_map(json!({
            "hidden_units": [20.7, "10"],
            "training_epochs": 10.9,
            "input_dropout": "0.2",
            "recurrent_dropout": 0.12,
        }));

        params.set_parameters(Some(&map)).unwrap();

        assert_eq!(params.hidden_units, Some(LayerWidths::Stacked(vec![20, 10])));
        assert_eq!(params.training_epochs, Some(10));
        assert_eq!(params.input_dropout, Some(0.2));
        assert_eq!(params.recurrent_dropout, Some(0.12));
    }

    #[test]
    fn test_scalar_width_stays_scalar_until_resolved() {
        let mut params = HyperParameters::new();
        let map = as_map(json!({ "hidden_units": 64 }));
        params.set_parameters(Some(&map)).unwrap();
        assert_eq!(params.hidden_units, Some(LayerWidths::Single(64)));

        params.training_epochs = Some(1);
        params.input_dropout = Some(0.0);
        params.recurrent_dropout = Some(0.0);
        let resolved = params.resolve().unwrap();

        assert_eq!(resolved.hidden_units, vec![64]);
        assert_eq!(params.hidden_units, Some(LayerWidths::Stacked(vec![64])));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut params = HyperParameters::new();
        let map = as_map(json!({ "width_input": 100, "learning_rate": 0.5 }));
        params.set_parameters(Some(&map)).unwrap();
        assert_eq!(params, HyperParameters::new());
    }

    #[test]
    fn test_none_map_is_noop() {
        let mut params = HyperParameters::new()
            .with_training_epochs(5)
            .with_input_dropout(0.1);
        let before = params.clone();
        params.set_parameters(None).unwrap();
        assert_eq!(params, before);
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let mut params = HyperParameters::new();
        let map = as_map(json!({ "training_epochs": "many" }));
        assert!(matches!(
            params.set_parameters(Some(&map)),
            Err(ForecastError::InvalidParameter { .. })
        ));

        let map = as_map(json!({ "hidden_units": [-3] }));
        assert!(params.set_parameters(Some(&map)).is_err());

        let map = as_map(json!({ "input_dropout": true }));
        assert!(params.set_parameters(Some(&map)).is_err());
    }

    #[test]
    fn test_resolve_reports_missing_values() {
        let mut params = HyperParameters::new().with_training_epochs(3);
        let err = params.resolve().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("hidden_units = None"));
        assert!(message.contains("training_epochs = 3"));
    }

    #[test]
    fn test_hyperparameters_from_json() {
        let params: HyperParameters = serde_json::from_str(
            r#"{"hidden_units": [8, 4], "training_epochs": 2, "input_dropout": 0.1, "recurrent_dropout": null}"#,
        )
        .unwrap();
        assert_eq!(params.hidden_units.as_ref().map(|w| w.depth()), Some(2));
        assert_eq!(params.recurrent_dropout, None);
    }
}
