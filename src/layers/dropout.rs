use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand_distr::Uniform;

/// Variational inverted dropout for recurrent inputs
///
/// One mask is reused across all time steps of a sequence and redrawn after
/// `reset_mask`, or when the batch shape changes.
#[derive(Clone, Debug)]
pub struct Dropout {
    pub dropout_rate: f64,
    pub is_training: bool,
    mask: Option<Array2<f64>>,
}

impl Dropout {
    /// Rates are validated by the architecture builder before a layer exists.
    pub fn new(dropout_rate: f64) -> Self {
        debug_assert!((0.0..1.0).contains(&dropout_rate));

        Dropout {
            dropout_rate,
            is_training: true,
            mask: None,
        }
    }

    pub fn train(&mut self) {
        self.is_training = true;
        self.mask = None;
    }

    pub fn eval(&mut self) {
        self.is_training = false;
        self.mask = None;
    }

    /// Forget the sequence mask so the next forward call draws a new one.
    pub fn reset_mask(&mut self) {
        self.mask = None;
    }

    pub fn is_active(&self) -> bool {
        self.is_training && self.dropout_rate > 0.0
    }

    pub fn keep_prob(&self) -> f64 {
        1.0 - self.dropout_rate
    }

    /// Returns the dropped input and the mask that was applied, if any.
    pub fn forward(&mut self, input: &Array2<f64>) -> (Array2<f64>, Option<Array2<f64>>) {
        if !self.is_active() {
            return (input.clone(), None);
        }

        let keep_prob = self.keep_prob();
        let reusable = self
            .mask
            .as_ref()
            .filter(|mask| mask.raw_dim() == input.raw_dim())
            .cloned();

        let mask = match reusable {
            Some(mask) => mask,
            None => {
                let new_mask = generate_mask(input.raw_dim(), keep_prob);
                self.mask = Some(new_mask.clone());
                new_mask
            }
        };

        (input * &mask / keep_prob, Some(mask))
    }

    /// Routes a gradient back through a previously applied mask.
    pub fn backward(&self, grad_output: &Array2<f64>, mask: Option<&Array2<f64>>) -> Array2<f64> {
        match mask {
            Some(mask) => grad_output * mask / self.keep_prob(),
            None => grad_output.clone(),
        }
    }
}

fn generate_mask(shape: ndarray::Dim<[usize; 2]>, keep_prob: f64) -> Array2<f64> {
    let dist = Uniform::new(0.0, 1.0);
    Array2::random(shape, dist).mapv(|x| if x < keep_prob { 1.0 } else { 0.0 })
}
