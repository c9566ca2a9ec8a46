use ndarray::{Array2, Axis};
use ndarray_rand::RandomExt;
use rand_distr::Uniform;
use crate::optimizers::Optimizer;

/// Holds gradients for linear layer parameters during backpropagation
#[derive(Clone, Debug)]
pub struct LinearGradients {
    pub weight: Array2<f64>,
    pub bias: Array2<f64>,
}

impl LinearGradients {
    pub fn accumulate(&mut self, other: &LinearGradients) {
        self.weight += &other.weight;
        self.bias += &other.bias;
    }
}

/// A fully connected (dense) layer
///
/// Performs `output = weight · input + bias` where weight has shape
/// (output_size, input_size) and bias has shape (output_size, 1). The layer
/// keeps no per-call state, so the same weights can be applied to every
/// time step of a sequence.
#[derive(Clone, Debug)]
pub struct LinearLayer {
    pub weight: Array2<f64>,     // (output_size, input_size)
    pub bias: Array2<f64>,       // (output_size, 1)
    pub input_size: usize,
    pub output_size: usize,
}

impl LinearLayer {
    /// Create a new linear layer with Xavier/Glorot uniform initialization
    pub fn new(input_size: usize, output_size: usize) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();

        let weight = Array2::random((output_size, input_size), Uniform::new(-limit, limit));
        let bias = Array2::zeros((output_size, 1));

        Self {
            weight,
            bias,
            input_size,
            output_size,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape (input_size, batch_size)
    ///
    /// # Returns
    /// * Output tensor of shape (output_size, batch_size)
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        debug_assert_eq!(input.nrows(), self.input_size);
        &self.weight.dot(input) + &self.bias
    }

    /// Backward pass for one application of the layer
    ///
    /// Returns (parameter_gradients, input_gradient)
    pub fn backward(&self, input: &Array2<f64>, grad_output: &Array2<f64>) -> (LinearGradients, Array2<f64>) {
        let gradients = LinearGradients {
            weight: grad_output.dot(&input.t()),
            bias: grad_output.sum_axis(Axis(1)).insert_axis(Axis(1)),
        };
        let input_grad = self.weight.t().dot(grad_output);

        (gradients, input_grad)
    }

    /// Update parameters using the provided optimizer
    pub fn update_parameters<O: Optimizer>(&mut self, gradients: &LinearGradients, optimizer: &mut O, prefix: &str) {
        optimizer.update(&format!("{}_weight", prefix), &mut self.weight, &gradients.weight);
        optimizer.update(&format!("{}_bias", prefix), &mut self.bias, &gradients.bias);
    }

    /// Initialize zero gradients for accumulation
    pub fn zero_gradients(&self) -> LinearGradients {
        LinearGradients {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array2::zeros(self.bias.raw_dim()),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use crate::optimizers::Adam;

    #[test]
    fn test_linear_layer_creation() {
        let layer = LinearLayer::new(10, 5);
        assert_eq!(layer.weight.shape(), &[5, 10]);
        assert_eq!(layer.bias.shape(), &[5, 1]);
        assert_eq!(layer.num_parameters(), 55);
    }

    #[test]
    fn test_linear_layer_forward() {
        let mut layer = LinearLayer::new(3, 2);
        layer.weight.fill(0.0);
        let input = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);

        let output = layer.forward(&input);
        assert_eq!(output.shape(), &[2, 2]);
        assert!(output.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_linear_layer_backward() {
        let layer = LinearLayer::new(3, 2);
        let input = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let grad_output = arr2(&[[1.0, 1.0], [1.0, 1.0]]);

        let (gradients, input_grad) = layer.backward(&input, &grad_output);

        assert_eq!(gradients.weight, arr2(&[[3.0, 7.0, 11.0], [3.0, 7.0, 11.0]]));
        assert_eq!(gradients.bias, arr2(&[[2.0], [2.0]]));
        assert_eq!(input_grad.shape(), &[3, 2]);
    }

    #[test]
    fn test_linear_layer_with_optimizer() {
        let mut layer = LinearLayer::new(2, 1);
        layer.weight.fill(0.0);
        let mut optimizer = Adam::new(0.1);

        let input = arr2(&[[1.0], [2.0]]);
        let target = arr2(&[[3.0]]);

        let output = layer.forward(&input);
        let grad_output = &output - &target;
        let (gradients, _) = layer.backward(&input, &grad_output);
        layer.update_parameters(&gradients, &mut optimizer, "linear");

        assert!(layer.weight.iter().all(|&x| x > 0.0));
        assert!(layer.bias[[0, 0]] > 0.0);
    }
}
