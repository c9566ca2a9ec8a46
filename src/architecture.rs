//! Backend-independent description of the forecasting network.
//!
//! An [`Architecture`] is an ordered list of layer descriptors with their
//! shapes already resolved. [`ArchitectureBuilder`] tracks the running
//! `(timesteps, features)` shape as layers are added and rejects a layer
//! that cannot follow the current one, returning the partial architecture
//! as a diagnostic snapshot. A [`Backend`] turns the description into a
//! trainable [`SequenceModel`].

use std::fmt;

use ndarray::Array3;
use tracing::error;

use crate::error::{ForecastError, Result};

/// One layer of the network.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    /// Recurrent layer returning its full hidden-state sequence.
    Recurrent {
        units: usize,
        input_dropout: f64,
        recurrent_dropout: f64,
    },
    /// Element-preserving reshape to `(timesteps, -1)`.
    Reshape { timesteps: usize },
    /// Dense projection applied with shared weights at every time step.
    TimeDistributedDense { units: usize },
}

impl LayerSpec {
    fn kind(&self) -> &'static str {
        match self {
            LayerSpec::Recurrent { .. } => "LSTM",
            LayerSpec::Reshape { .. } => "Reshape",
            LayerSpec::TimeDistributedDense { .. } => "TimeDistributed(Dense)",
        }
    }
}

/// A layer together with its resolved shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayer {
    pub spec: LayerSpec,
    pub input_shape: (usize, usize),
    pub output_shape: (usize, usize),
    pub parameters: usize,
}

/// Validated, shape-resolved network description.
#[derive(Debug, Clone, PartialEq)]
pub struct Architecture {
    input_shape: (usize, usize),
    layers: Vec<ResolvedLayer>,
}

impl Architecture {
    /// `(timesteps, features)` expected by the first layer.
    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    pub fn output_shape(&self) -> (usize, usize) {
        self.layers
            .last()
            .map(|layer| layer.output_shape)
            .unwrap_or(self.input_shape)
    }

    pub fn layers(&self) -> &[ResolvedLayer] {
        &self.layers
    }

    pub fn total_parameters(&self) -> usize {
        self.layers.iter().map(|layer| layer.parameters).sum()
    }

    /// Tabular summary, one row per layer.
    pub fn summary(&self) -> String {
        render_summary(self.input_shape, &self.layers)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let depth = self
            .layers
            .iter()
            .filter(|layer| matches!(layer.spec, LayerSpec::Recurrent { .. }))
            .count();
        write!(
            f,
            "Architecture({}-layer LSTM, input = {:?}, output = {:?}, parameters = {})",
            depth,
            self.input_shape,
            self.output_shape(),
            self.total_parameters()
        )
    }
}

fn render_summary(input_shape: (usize, usize), layers: &[ResolvedLayer]) -> String {
    let mut lines = vec![
        format!("{:<32}{:<24}{}", "Layer (type)", "Output Shape", "Param #"),
        format!("{:<32}{:<24}{}", "input", format!("(None, {}, {})", input_shape.0, input_shape.1), 0),
    ];
    for (index, layer) in layers.iter().enumerate() {
        lines.push(format!(
            "{:<32}{:<24}{}",
            format!("layer_{} ({})", index, layer.spec.kind()),
            format!("(None, {}, {})", layer.output_shape.0, layer.output_shape.1),
            layer.parameters
        ));
    }
    lines.push(format!(
        "Total params: {}",
        layers.iter().map(|layer| layer.parameters).sum::<usize>()
    ));
    lines.join("\n")
}

/// Incrementally assembles an [`Architecture`].
#[derive(Debug, Clone)]
pub struct ArchitectureBuilder {
    input_shape: (usize, usize),
    layers: Vec<ResolvedLayer>,
}

impl ArchitectureBuilder {
    /// Starts a network whose first layer expects `(timesteps, features)`.
    pub fn new(input_shape: (usize, usize)) -> Self {
        Self {
            input_shape,
            layers: Vec::new(),
        }
    }

    fn current_shape(&self) -> (usize, usize) {
        self.layers
            .last()
            .map(|layer| layer.output_shape)
            .unwrap_or(self.input_shape)
    }

    /// Summary of the layers added so far.
    pub fn snapshot(&self) -> String {
        render_summary(self.input_shape, &self.layers)
    }

    fn fail(&self, reason: String) -> ForecastError {
        let snapshot = self.snapshot();
        error!("Model architecture so far is:\n{}", snapshot);
        ForecastError::Architecture { reason, snapshot }
    }

    pub fn add(&mut self, spec: LayerSpec) -> Result<&mut Self> {
        let (timesteps, features) = self.current_shape();
        if timesteps == 0 || features == 0 {
            return Err(self.fail(format!(
                "cannot add {} after a layer with empty output shape ({}, {})",
                spec.kind(),
                timesteps,
                features
            )));
        }

        let (output_shape, parameters) = match &spec {
            LayerSpec::Recurrent {
                units,
                input_dropout,
                recurrent_dropout,
            } => {
                if *units == 0 {
                    return Err(self.fail("recurrent layer must have at least one unit".into()));
                }
                for (name, rate) in [("dropout", input_dropout), ("recurrent_dropout", recurrent_dropout)] {
                    if !(0.0..1.0).contains(rate) {
                        return Err(self.fail(format!("{} must be in [0, 1), got {}", name, rate)));
                    }
                }
                let gates = 4 * units;
                ((timesteps, *units), gates * (features + units) + gates)
            }
            LayerSpec::Reshape { timesteps: target } => {
                let total = timesteps * features;
                if *target == 0 || total % target != 0 {
                    return Err(self.fail(format!(
                        "total size of new array must be unchanged: cannot reshape ({}, {}) into ({}, -1)",
                        timesteps, features, target
                    )));
                }
                ((*target, total / target), 0)
            }
            LayerSpec::TimeDistributedDense { units } => {
                if *units == 0 {
                    return Err(self.fail("dense layer must have at least one unit".into()));
                }
                ((timesteps, *units), features * units + units)
            }
        };

        self.layers.push(ResolvedLayer {
            spec,
            input_shape: (timesteps, features),
            output_shape,
            parameters,
        });
        Ok(self)
    }

    pub fn build(self) -> Result<Architecture> {
        if self.layers.is_empty() {
            return Err(self.fail("architecture has no layers".into()));
        }
        Ok(Architecture {
            input_shape: self.input_shape,
            layers: self.layers,
        })
    }
}

/// A trainable network produced by a [`Backend`].
pub trait SequenceModel {
    /// Runs one pass over the training tensors and returns the epoch loss.
    fn train_epoch(&mut self, input: &Array3<f64>, target: &Array3<f64>) -> Result<f64>;

    /// Forward pass without dropout. Must not change the model.
    fn predict(&self, input: &Array3<f64>) -> Result<Array3<f64>>;

    fn architecture(&self) -> &Architecture;
}

/// Numeric backend able to realise an [`Architecture`].
pub trait Backend {
    type Model: SequenceModel;

    fn name(&self) -> &'static str;

    /// Instantiates the layers with MSE loss and the Adam optimizer.
    fn build(&self, architecture: &Architecture) -> Result<Self::Model>;

    /// Releases memory the backend holds outside of dropped models.
    fn release_memory(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recurrent(units: usize) -> LayerSpec {
        LayerSpec::Recurrent {
            units,
            input_dropout: 0.2,
            recurrent_dropout: 0.12,
        }
    }

    #[test]
    fn test_builder_tracks_shapes() {
        let mut builder = ArchitectureBuilder::new((100, 2));
        builder
            .add(recurrent(20))
            .unwrap()
            .add(recurrent(10))
            .unwrap()
            .add(LayerSpec::Reshape { timesteps: 20 })
            .unwrap()
            .add(LayerSpec::TimeDistributedDense { units: 2 })
            .unwrap();
        let architecture = builder.build().unwrap();

        let shapes: Vec<_> = architecture.layers().iter().map(|l| l.output_shape).collect();
        assert_eq!(shapes, vec![(100, 20), (100, 10), (20, 50), (20, 2)]);
        assert_eq!(architecture.output_shape(), (20, 2));
        // LSTM(20) on 2 features, LSTM(10) on 20, Dense(2) on 50
        assert_eq!(architecture.layers()[0].parameters, 80 * 22 + 80);
        assert_eq!(architecture.layers()[1].parameters, 40 * 30 + 40);
        assert_eq!(architecture.layers()[3].parameters, 50 * 2 + 2);
    }

    #[test]
    fn test_reshape_must_conserve_elements() {
        let mut builder = ArchitectureBuilder::new((10, 3));
        builder.add(recurrent(3)).unwrap();
        let err = builder.add(LayerSpec::Reshape { timesteps: 7 }).unwrap_err();
        match err {
            ForecastError::Architecture { reason, snapshot } => {
                assert!(reason.contains("total size"));
                assert!(snapshot.contains("layer_0 (LSTM)"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_dropout_rate_is_rejected() {
        let mut builder = ArchitectureBuilder::new((4, 1));
        let result = builder.add(LayerSpec::Recurrent {
            units: 2,
            input_dropout: 1.0,
            recurrent_dropout: 0.0,
        });
        assert!(matches!(result, Err(ForecastError::Architecture { .. })));
    }

    #[test]
    fn test_empty_architecture_is_rejected() {
        assert!(ArchitectureBuilder::new((4, 1)).build().is_err());
    }

    #[test]
    fn test_summary_lists_every_layer() {
        let mut builder = ArchitectureBuilder::new((4, 1));
        builder
            .add(recurrent(2))
            .unwrap()
            .add(LayerSpec::Reshape { timesteps: 2 })
            .unwrap()
            .add(LayerSpec::TimeDistributedDense { units: 1 })
            .unwrap();
        let summary = builder.build().unwrap().summary();
        assert!(summary.contains("layer_1 (Reshape)"));
        assert!(summary.contains("(None, 2, 4)"));
        assert!(summary.contains("Total params:"));
    }
}
