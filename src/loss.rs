use ndarray::Array2;

/// Loss over predictions laid out `(features, batch)`, one matrix per output step
pub trait LossFunction {
    /// Compute the loss between predictions and targets
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64;

    /// Compute the gradient of the loss with respect to predictions
    fn compute_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64>;

    /// Loss of a whole output window, averaged over its steps, and the
    /// gradient for every step of that average.
    fn compute_window_loss(&self, predictions: &[Array2<f64>], targets: &[Array2<f64>]) -> (f64, Vec<Array2<f64>>) {
        let steps = predictions.len().max(1) as f64;
        let mut loss = 0.0;
        let mut gradients = Vec::with_capacity(predictions.len());
        for (prediction, target) in predictions.iter().zip(targets) {
            loss += self.compute_loss(prediction, target);
            gradients.push(self.compute_gradient(prediction, target) / steps);
        }
        (loss / steps, gradients)
    }
}

/// Mean squared error over every element of a step
#[derive(Clone, Copy, Debug, Default)]
pub struct MSELoss;

impl LossFunction for MSELoss {
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        let diff = predictions - targets;
        diff.mapv(|d| d * d).sum() / predictions.len() as f64
    }

    fn compute_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
        (predictions - targets) * (2.0 / predictions.len() as f64)
    }
}
