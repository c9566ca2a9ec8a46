use ndarray::{Array2, Array3};
use rand::seq::SliceRandom;
use tracing::debug;

use crate::architecture::{Architecture, Backend, LayerSpec, SequenceModel};
use crate::error::{ForecastError, Result};
use crate::layers::linear::{LinearGradients, LinearLayer};
use crate::layers::lstm_cell::{LSTMCell, LSTMCellCache, LSTMCellGradients};
use crate::loss::{LossFunction, MSELoss};
use crate::optimizers::Adam;
use crate::training::TrainingConfig;

/// Stacked LSTM encoder whose hidden-state sequence is folded into the
/// output window and projected per time step
///
/// Data flows as:
/// `(n, input_width, f_in)` → LSTM stack → `(n, input_width, h_last)`
/// → reshape → `(n, output_width, input_width * h_last / output_width)`
/// → shared dense → `(n, output_width, f_out)`.
///
/// Internally each time step is a matrix with one column per sample.
pub struct WindowedLstmModel {
    architecture: Architecture,
    cells: Vec<LSTMCell>,
    projection: LinearLayer,
    input_width: usize,
    output_width: usize,
    output_features: usize,
    loss_function: MSELoss,
    optimizer: Adam,
    config: TrainingConfig,
}

impl WindowedLstmModel {
    /// Realises an architecture of the form `LSTM+ → Reshape → TimeDistributed(Dense)`.
    pub fn from_architecture(architecture: &Architecture, config: TrainingConfig) -> Result<Self> {
        let unsupported = |reason: &str| ForecastError::Architecture {
            reason: format!("ndarray backend: {}", reason),
            snapshot: architecture.summary(),
        };

        let (input_width, _) = architecture.input_shape();
        let mut cells = Vec::new();
        let mut layers = architecture.layers().iter().peekable();

        while let Some(layer) = layers.next_if(|l| matches!(l.spec, LayerSpec::Recurrent { .. })) {
            if let LayerSpec::Recurrent { units, input_dropout, recurrent_dropout } = layer.spec {
                let mut cell = LSTMCell::new(layer.input_shape.1, units);
                if input_dropout > 0.0 {
                    cell = cell.with_input_dropout(input_dropout);
                }
                if recurrent_dropout > 0.0 {
                    cell = cell.with_recurrent_dropout(recurrent_dropout);
                }
                cells.push(cell);
            }
        }
        if cells.is_empty() {
            return Err(unsupported("network must start with at least one recurrent layer"));
        }

        let output_width = match layers.next().map(|l| &l.spec) {
            Some(LayerSpec::Reshape { timesteps }) => *timesteps,
            _ => return Err(unsupported("recurrent stack must be followed by a reshape")),
        };

        let projection = match layers.next() {
            Some(layer) => match layer.spec {
                LayerSpec::TimeDistributedDense { units } => LinearLayer::new(layer.input_shape.1, units),
                _ => return Err(unsupported("reshape must be followed by a time-distributed dense layer")),
            },
            None => return Err(unsupported("missing time-distributed dense layer")),
        };
        if layers.next().is_some() {
            return Err(unsupported("no layers may follow the time-distributed dense layer"));
        }

        let optimizer = Adam::new(config.learning_rate);
        Ok(WindowedLstmModel {
            architecture: architecture.clone(),
            output_features: projection.output_size,
            cells,
            projection,
            input_width,
            output_width,
            loss_function: MSELoss,
            optimizer,
            config,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.cells.iter().map(LSTMCell::num_parameters).sum::<usize>() + self.projection.num_parameters()
    }

    fn check_input(&self, input: &Array3<f64>) -> Result<()> {
        let (samples, timesteps, features) = input.dim();
        let expected_features = self.cells[0].input_size;
        if timesteps != self.input_width || features != expected_features {
            return Err(ForecastError::shape(
                "model input",
                &[samples, self.input_width, expected_features],
                input.shape(),
            ));
        }
        Ok(())
    }

    /// Hidden width of the last recurrent layer.
    fn top_hidden_size(&self) -> usize {
        self.cells.last().map(|cell| cell.hidden_size).unwrap_or(0)
    }

    fn folded_size(&self) -> usize {
        self.input_width * self.top_hidden_size() / self.output_width
    }

    /// Element-preserving reshape of the top hidden sequence into `output_width` steps.
    fn fold(&self, hidden: &[Array2<f64>]) -> Vec<Array2<f64>> {
        let hidden_size = self.top_hidden_size();
        let folded_size = self.folded_size();
        let batch = hidden.first().map(|h| h.ncols()).unwrap_or(0);

        (0..self.output_width)
            .map(|step| {
                Array2::from_shape_fn((folded_size, batch), |(k, b)| {
                    let flat = step * folded_size + k;
                    hidden[flat / hidden_size][[flat % hidden_size, b]]
                })
            })
            .collect()
    }

    /// Routes gradients of the folded sequence back to the hidden sequence.
    fn unfold(&self, folded: &[Array2<f64>]) -> Vec<Array2<f64>> {
        let hidden_size = self.top_hidden_size();
        let folded_size = self.folded_size();
        let batch = folded.first().map(|f| f.ncols()).unwrap_or(0);

        (0..self.input_width)
            .map(|step| {
                Array2::from_shape_fn((hidden_size, batch), |(h, b)| {
                    let flat = step * hidden_size + h;
                    folded[flat / folded_size][[flat % folded_size, b]]
                })
            })
            .collect()
    }

    /// Per-timestep matrices `(features, batch)` for the selected samples.
    fn gather_steps(tensor: &Array3<f64>, samples: &[usize]) -> Vec<Array2<f64>> {
        let (_, timesteps, features) = tensor.dim();
        (0..timesteps)
            .map(|t| Array2::from_shape_fn((features, samples.len()), |(f, b)| tensor[[samples[b], t, f]]))
            .collect()
    }

    fn forward_inference(&self, steps: Vec<Array2<f64>>) -> Vec<Array2<f64>> {
        let batch = steps.first().map(|s| s.ncols()).unwrap_or(0);
        let mut sequence = steps;

        for cell in &self.cells {
            let mut hx = Array2::zeros((cell.hidden_size, batch));
            let mut cx = Array2::zeros((cell.hidden_size, batch));
            let mut outputs = Vec::with_capacity(sequence.len());
            for x in &sequence {
                let (hy, cy) = cell.forward(x, &hx, &cx);
                outputs.push(hy.clone());
                hx = hy;
                cx = cy;
            }
            sequence = outputs;
        }

        self.fold(&sequence)
            .iter()
            .map(|z| self.projection.forward(z))
            .collect()
    }

    /// One optimisation step on a mini-batch; returns its mean loss.
    fn train_batch(&mut self, input: &Array3<f64>, target: &Array3<f64>, samples: &[usize]) -> f64 {
        let batch = samples.len();
        let targets = Self::gather_steps(target, samples);

        // Forward through the stack, caching every step of every layer
        let mut sequence = Self::gather_steps(input, samples);
        let mut caches: Vec<Vec<LSTMCellCache>> = Vec::with_capacity(self.cells.len());
        for cell in &mut self.cells {
            cell.reset_dropout_masks();
            let mut hx = Array2::zeros((cell.hidden_size, batch));
            let mut cx = Array2::zeros((cell.hidden_size, batch));
            let mut outputs = Vec::with_capacity(sequence.len());
            let mut layer_caches = Vec::with_capacity(sequence.len());
            for x in &sequence {
                let (hy, cy, cache) = cell.forward_with_cache(x, &hx, &cx);
                outputs.push(hy.clone());
                layer_caches.push(cache);
                hx = hy;
                cx = cy;
            }
            caches.push(layer_caches);
            sequence = outputs;
        }

        let folded = self.fold(&sequence);
        let predictions: Vec<Array2<f64>> = folded.iter().map(|z| self.projection.forward(z)).collect();

        let (loss, output_gradients) = self.loss_function.compute_window_loss(&predictions, &targets);
        let mut projection_gradients = self.projection.zero_gradients();
        let mut folded_gradients = Vec::with_capacity(self.output_width);
        for (grad, z) in output_gradients.iter().zip(&folded) {
            let (step_gradients, dz) = self.projection.backward(z, grad);
            projection_gradients.accumulate(&step_gradients);
            folded_gradients.push(dz);
        }

        // BPTT down the stack: each layer's input gradient feeds the layer below
        let mut upstream = self.unfold(&folded_gradients);
        let mut cell_gradients: Vec<LSTMCellGradients> = Vec::with_capacity(self.cells.len());
        for (cell, layer_caches) in self.cells.iter().zip(&caches).rev() {
            let mut gradients = cell.zero_gradients();
            let mut dh_next = Array2::zeros((cell.hidden_size, batch));
            let mut dc_next = Array2::zeros((cell.hidden_size, batch));
            let mut input_gradients = vec![Array2::zeros((cell.input_size, batch)); layer_caches.len()];

            for t in (0..layer_caches.len()).rev() {
                let dh = &upstream[t] + &dh_next;
                let (step_gradients, dx, dhx, dcx) = cell.backward(&dh, &dc_next, &layer_caches[t]);
                gradients.accumulate(&step_gradients);
                input_gradients[t] = dx;
                dh_next = dhx;
                dc_next = dcx;
            }

            cell_gradients.push(gradients);
            upstream = input_gradients;
        }
        cell_gradients.reverse();

        if let Some(max_norm) = self.config.clip_gradient {
            for gradients in &mut cell_gradients {
                for matrix in gradients.matrices_mut() {
                    clip_gradient_matrix(matrix, max_norm);
                }
            }
            clip_linear_gradients(&mut projection_gradients, max_norm);
        }

        for (i, (cell, gradients)) in self.cells.iter_mut().zip(&cell_gradients).enumerate() {
            cell.update_parameters(gradients, &mut self.optimizer, &format!("lstm_{}", i));
        }
        self.projection
            .update_parameters(&projection_gradients, &mut self.optimizer, "time_distributed_dense");

        loss
    }
}

fn clip_gradient_matrix(matrix: &mut Array2<f64>, max_norm: f64) {
    let norm = matrix.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        matrix.mapv_inplace(|x| x * scale);
    }
}

fn clip_linear_gradients(gradients: &mut LinearGradients, max_norm: f64) {
    clip_gradient_matrix(&mut gradients.weight, max_norm);
    clip_gradient_matrix(&mut gradients.bias, max_norm);
}

impl SequenceModel for WindowedLstmModel {
    fn train_epoch(&mut self, input: &Array3<f64>, target: &Array3<f64>) -> Result<f64> {
        self.check_input(input)?;
        let samples = input.dim().0;
        if samples == 0 {
            return Err(ForecastError::EmptyData("no training windows".into()));
        }
        let expected_target = [samples, self.output_width, self.output_features];
        if target.shape() != expected_target {
            return Err(ForecastError::shape("model target", &expected_target, target.shape()));
        }

        for cell in &mut self.cells {
            cell.train();
        }

        let mut order: Vec<usize> = (0..samples).collect();
        if self.config.shuffle {
            order.shuffle(&mut rand::thread_rng());
        }

        let batch_size = self.config.batch_size.max(1);
        let mut total_loss = 0.0;
        for chunk in order.chunks(batch_size) {
            total_loss += self.train_batch(input, target, chunk) * chunk.len() as f64;
        }

        for cell in &mut self.cells {
            cell.eval();
        }
        Ok(total_loss / samples as f64)
    }

    fn predict(&self, input: &Array3<f64>) -> Result<Array3<f64>> {
        self.check_input(input)?;
        let samples = input.dim().0;
        let mut output = Array3::zeros((samples, self.output_width, self.output_features));

        let order: Vec<usize> = (0..samples).collect();
        for chunk in order.chunks(self.config.batch_size.max(1)) {
            let predictions = self.forward_inference(Self::gather_steps(input, chunk));
            for (t, prediction) in predictions.iter().enumerate() {
                for (b, &sample) in chunk.iter().enumerate() {
                    for f in 0..self.output_features {
                        output[[sample, t, f]] = prediction[[f, b]];
                    }
                }
            }
        }
        Ok(output)
    }

    fn architecture(&self) -> &Architecture {
        &self.architecture
    }
}

/// Pure-Rust `ndarray` backend
#[derive(Debug, Clone, Default)]
pub struct NdarrayBackend {
    pub config: TrainingConfig,
}

impl NdarrayBackend {
    pub fn new(config: TrainingConfig) -> Self {
        NdarrayBackend { config }
    }
}

impl Backend for NdarrayBackend {
    type Model = WindowedLstmModel;

    fn name(&self) -> &'static str {
        "ndarray"
    }

    fn build(&self, architecture: &Architecture) -> Result<WindowedLstmModel> {
        WindowedLstmModel::from_architecture(architecture, self.config.clone())
    }

    fn release_memory(&self) -> Result<()> {
        // Buffers are owned by the model and freed when it is dropped.
        debug!(backend = self.name(), "No backend-held buffers to release");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::ArchitectureBuilder;

    fn architecture(input_width: usize, features_in: usize, widths: &[usize], output_width: usize, features_out: usize) -> Architecture {
        let mut builder = ArchitectureBuilder::new((input_width, features_in));
        for &units in widths {
            builder
                .add(LayerSpec::Recurrent { units, input_dropout: 0.0, recurrent_dropout: 0.0 })
                .unwrap();
        }
        builder.add(LayerSpec::Reshape { timesteps: output_width }).unwrap();
        builder.add(LayerSpec::TimeDistributedDense { units: features_out }).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_predict_shape() {
        let model = WindowedLstmModel::from_architecture(&architecture(6, 2, &[4, 3], 2, 1), TrainingConfig::default()).unwrap();
        let input = Array3::from_shape_fn((5, 6, 2), |(i, t, f)| (i + t + f) as f64 * 0.1);

        let output = model.predict(&input).unwrap();
        assert_eq!(output.shape(), &[5, 2, 1]);
        assert_eq!(model.num_layers(), 2);
        assert_eq!(model.num_parameters(), model.architecture().total_parameters());
    }

    #[test]
    fn test_fold_and_unfold_are_inverse_permutations() {
        let model = WindowedLstmModel::from_architecture(&architecture(4, 1, &[3], 2, 1), TrainingConfig::default()).unwrap();
        let hidden: Vec<Array2<f64>> = (0..4)
            .map(|t| Array2::from_shape_fn((3, 2), |(h, b)| (100 * b + 10 * t + h) as f64))
            .collect();

        let folded = model.fold(&hidden);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].shape(), &[6, 2]);
        // second output step starts with hidden step 2
        assert_eq!(folded[1][[0, 1]], 120.0);
        assert_eq!(folded[1][[4, 0]], 31.0);

        assert_eq!(model.unfold(&folded), hidden);
    }

    #[test]
    fn test_training_reduces_loss() {
        let config = TrainingConfig { learning_rate: 0.01, batch_size: 8, shuffle: true, clip_gradient: Some(5.0) };
        let mut model = WindowedLstmModel::from_architecture(&architecture(4, 1, &[8], 2, 1), config).unwrap();

        let input = Array3::from_shape_fn((16, 4, 1), |(i, t, _)| ((i + t) % 5) as f64 / 4.0);
        let target = Array3::from_shape_fn((16, 2, 1), |(i, t, _)| ((i + t) % 3) as f64 / 2.0 * 0.5 + 0.25);

        let first = model.train_epoch(&input, &target).unwrap();
        let mut last = first;
        for _ in 0..60 {
            last = model.train_epoch(&input, &target).unwrap();
        }
        assert!(last.is_finite());
        assert!(last < first);
    }

    #[test]
    fn test_epoch_leaves_cells_in_inference_mode() {
        let mut model = WindowedLstmModel::from_architecture(&architecture(4, 1, &[3, 2], 2, 1), TrainingConfig::default()).unwrap();
        assert!(model.cells.iter().all(|cell| cell.is_training));

        let input = Array3::from_elem((3, 4, 1), 0.5);
        let target = Array3::from_elem((3, 2, 1), 0.25);
        model.train_epoch(&input, &target).unwrap();

        assert!(model.cells.iter().all(|cell| !cell.is_training));
    }

    #[test]
    fn test_predict_does_not_change_model() {
        let model = WindowedLstmModel::from_architecture(&architecture(2, 1, &[2], 1, 1), TrainingConfig::default()).unwrap();
        let input = Array3::from_elem((3, 2, 1), 0.5);
        assert_eq!(model.predict(&input).unwrap(), model.predict(&input).unwrap());
    }

    #[test]
    fn test_wrong_input_shape_is_rejected() {
        let model = WindowedLstmModel::from_architecture(&architecture(4, 2, &[2], 2, 1), TrainingConfig::default()).unwrap();
        let input = Array3::zeros((3, 4, 3));
        assert!(matches!(model.predict(&input), Err(ForecastError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_unsupported_layer_order_is_rejected() {
        let mut builder = ArchitectureBuilder::new((4, 1));
        builder.add(LayerSpec::TimeDistributedDense { units: 2 }).unwrap();
        let result = NdarrayBackend::default().build(&builder.build().unwrap());
        assert!(matches!(result, Err(ForecastError::Architecture { .. })));
    }
}
