use ndarray::{Array2, Axis, s};
use ndarray_rand::RandomExt;
use rand_distr::Uniform;
use crate::utils::sigmoid;
use crate::layers::dropout::Dropout;

/// Holds gradients for all LSTM cell parameters during backpropagation
#[derive(Clone, Debug)]
pub struct LSTMCellGradients {
    pub w_ih: Array2<f64>,
    pub w_hh: Array2<f64>,
    pub bias: Array2<f64>,
}

impl LSTMCellGradients {
    pub fn accumulate(&mut self, other: &LSTMCellGradients) {
        self.w_ih += &other.w_ih;
        self.w_hh += &other.w_hh;
        self.bias += &other.bias;
    }

    pub fn matrices_mut(&mut self) -> [&mut Array2<f64>; 3] {
        [&mut self.w_ih, &mut self.w_hh, &mut self.bias]
    }
}

/// Caches intermediate values of one time step for the backward pass
///
/// `input` and `hx` are stored after dropout, since those are the values
/// the weights actually multiplied.
#[derive(Clone, Debug)]
pub struct LSTMCellCache {
    pub input: Array2<f64>,
    pub hx: Array2<f64>,
    pub cx: Array2<f64>,
    pub input_gate: Array2<f64>,
    pub forget_gate: Array2<f64>,
    pub cell_gate: Array2<f64>,
    pub output_gate: Array2<f64>,
    pub cy: Array2<f64>,
    pub input_dropout_mask: Option<Array2<f64>>,
    pub recurrent_dropout_mask: Option<Array2<f64>>,
}

/// LSTM cell operating on a batch laid out as columns
///
/// Inputs are `(input_size, batch)`, states are `(hidden_size, batch)`:
/// - i_t = σ(W_xi * dropout(x_t) + W_hi * dropout_r(h_t-1) + b_i)
/// - f_t = σ(W_xf * dropout(x_t) + W_hf * dropout_r(h_t-1) + b_f)
/// - g_t = tanh(W_xg * dropout(x_t) + W_hg * dropout_r(h_t-1) + b_g)
/// - o_t = σ(W_xo * dropout(x_t) + W_ho * dropout_r(h_t-1) + b_o)
/// - c_t = f_t ⊙ c_t-1 + i_t ⊙ g_t
/// - h_t = o_t ⊙ tanh(c_t)
#[derive(Clone, Debug)]
pub struct LSTMCell {
    pub w_ih: Array2<f64>,  // input-to-hidden weights (4*hidden_size, input_size)
    pub w_hh: Array2<f64>,  // hidden-to-hidden weights (4*hidden_size, hidden_size)
    pub bias: Array2<f64>,  // one bias per gate unit (4*hidden_size, 1)
    pub input_size: usize,
    pub hidden_size: usize,
    pub input_dropout: Option<Dropout>,
    pub recurrent_dropout: Option<Dropout>,
    pub is_training: bool,
}

struct Gates {
    input: Array2<f64>,
    forget: Array2<f64>,
    cell: Array2<f64>,
    output: Array2<f64>,
}

impl LSTMCell {
    /// Forget-gate biases start at 1 so early training keeps the cell state.
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        let dist = Uniform::new(-0.1, 0.1);

        let w_ih = Array2::random((4 * hidden_size, input_size), dist);
        let w_hh = Array2::random((4 * hidden_size, hidden_size), dist);
        let mut bias = Array2::zeros((4 * hidden_size, 1));
        bias.slice_mut(s![hidden_size..2 * hidden_size, ..]).fill(1.0);

        LSTMCell {
            w_ih,
            w_hh,
            bias,
            input_size,
            hidden_size,
            input_dropout: None,
            recurrent_dropout: None,
            is_training: true,
        }
    }

    /// Variational dropout on the cell input; one mask per sequence.
    pub fn with_input_dropout(mut self, dropout_rate: f64) -> Self {
        self.input_dropout = Some(Dropout::new(dropout_rate));
        self
    }

    /// Variational dropout on the recurrent state; one mask per sequence.
    pub fn with_recurrent_dropout(mut self, dropout_rate: f64) -> Self {
        self.recurrent_dropout = Some(Dropout::new(dropout_rate));
        self
    }

    pub fn train(&mut self) {
        self.is_training = true;
        for dropout in [&mut self.input_dropout, &mut self.recurrent_dropout].into_iter().flatten() {
            dropout.train();
        }
    }

    pub fn eval(&mut self) {
        self.is_training = false;
        for dropout in [&mut self.input_dropout, &mut self.recurrent_dropout].into_iter().flatten() {
            dropout.eval();
        }
    }

    /// Call before the first step of each new sequence batch.
    pub fn reset_dropout_masks(&mut self) {
        for dropout in [&mut self.input_dropout, &mut self.recurrent_dropout].into_iter().flatten() {
            dropout.reset_mask();
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.bias.len()
    }

    fn gates(&self, input: &Array2<f64>, hx: &Array2<f64>) -> Gates {
        // Computed together as [input_gate, forget_gate, cell_gate, output_gate]
        let gates = &self.w_ih.dot(input) + &self.w_hh.dot(hx) + &self.bias;
        let h = self.hidden_size;

        Gates {
            input: gates.slice(s![0..h, ..]).map(|&x| sigmoid(x)),
            forget: gates.slice(s![h..2 * h, ..]).map(|&x| sigmoid(x)),
            cell: gates.slice(s![2 * h..3 * h, ..]).map(|&x| x.tanh()),
            output: gates.slice(s![3 * h..4 * h, ..]).map(|&x| sigmoid(x)),
        }
    }

    /// Inference step; dropout is never applied.
    pub fn forward(&self, input: &Array2<f64>, hx: &Array2<f64>, cx: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let gates = self.gates(input, hx);
        let cy = &gates.forget * cx + &gates.input * &gates.cell;
        let hy = &gates.output * &cy.mapv(f64::tanh);
        (hy, cy)
    }

    /// Training step; applies dropout when in training mode and caches what
    /// the backward pass needs.
    pub fn forward_with_cache(&mut self, input: &Array2<f64>, hx: &Array2<f64>, cx: &Array2<f64>) -> (Array2<f64>, Array2<f64>, LSTMCellCache) {
        let (input_dropped, input_mask) = match self.input_dropout.as_mut() {
            Some(dropout) => dropout.forward(input),
            None => (input.clone(), None),
        };
        let (hx_dropped, recurrent_mask) = match self.recurrent_dropout.as_mut() {
            Some(dropout) => dropout.forward(hx),
            None => (hx.clone(), None),
        };

        let gates = self.gates(&input_dropped, &hx_dropped);

        // Cell state update: f_t ⊙ c_t-1 + i_t ⊙ g_t
        let cy = &gates.forget * cx + &gates.input * &gates.cell;
        // Hidden state: o_t ⊙ tanh(c_t)
        let hy = &gates.output * &cy.mapv(f64::tanh);

        let cache = LSTMCellCache {
            input: input_dropped,
            hx: hx_dropped,
            cx: cx.clone(),
            input_gate: gates.input,
            forget_gate: gates.forget,
            cell_gate: gates.cell,
            output_gate: gates.output,
            cy: cy.clone(),
            input_dropout_mask: input_mask,
            recurrent_dropout_mask: recurrent_mask,
        };

        (hy, cy, cache)
    }

    /// Backward pass through one time step
    ///
    /// Returns (parameter_gradients, input_gradient, hidden_gradient, cell_gradient)
    pub fn backward(&self, dhy: &Array2<f64>, dcy: &Array2<f64>, cache: &LSTMCellCache) -> (LSTMCellGradients, Array2<f64>, Array2<f64>, Array2<f64>) {
        let hidden_size = self.hidden_size;
        let batch = dhy.ncols();
        let tanh_cy = cache.cy.mapv(f64::tanh);

        // Output gate: ∂L/∂o_t = ∂L/∂h_t ⊙ tanh(c_t)
        let do_raw = dhy * &tanh_cy * &cache.output_gate * &cache.output_gate.mapv(|x| 1.0 - x);

        // Cell state gradients from both tanh and direct paths
        let dcy_total = dcy + &(dhy * &cache.output_gate * &tanh_cy.mapv(|x| 1.0 - x * x));

        // Forget gate: ∂L/∂f_t = ∂L/∂c_t ⊙ c_t-1
        let df_raw = &dcy_total * &cache.cx * &cache.forget_gate * &cache.forget_gate.mapv(|x| 1.0 - x);

        // Input gate: ∂L/∂i_t = ∂L/∂c_t ⊙ g_t
        let di_raw = &dcy_total * &cache.cell_gate * &cache.input_gate * &cache.input_gate.mapv(|x| 1.0 - x);

        // Cell gate: ∂L/∂g_t = ∂L/∂c_t ⊙ i_t
        let dc_raw = &dcy_total * &cache.input_gate * &cache.cell_gate.mapv(|x| 1.0 - x * x);

        let mut dgates = Array2::zeros((4 * hidden_size, batch));
        dgates.slice_mut(s![0..hidden_size, ..]).assign(&di_raw);
        dgates.slice_mut(s![hidden_size..2 * hidden_size, ..]).assign(&df_raw);
        dgates.slice_mut(s![2 * hidden_size..3 * hidden_size, ..]).assign(&dc_raw);
        dgates.slice_mut(s![3 * hidden_size..4 * hidden_size, ..]).assign(&do_raw);

        let gradients = LSTMCellGradients {
            w_ih: dgates.dot(&cache.input.t()),
            w_hh: dgates.dot(&cache.hx.t()),
            bias: dgates.sum_axis(Axis(1)).insert_axis(Axis(1)),
        };

        let dx = self.w_ih.t().dot(&dgates);
        let dhx = self.w_hh.t().dot(&dgates);
        let dcx = &dcy_total * &cache.forget_gate;

        let dx = match self.input_dropout.as_ref() {
            Some(dropout) => dropout.backward(&dx, cache.input_dropout_mask.as_ref()),
            None => dx,
        };
        let dhx = match self.recurrent_dropout.as_ref() {
            Some(dropout) => dropout.backward(&dhx, cache.recurrent_dropout_mask.as_ref()),
            None => dhx,
        };

        (gradients, dx, dhx, dcx)
    }

    /// Initialize zero gradients for accumulation
    pub fn zero_gradients(&self) -> LSTMCellGradients {
        LSTMCellGradients {
            w_ih: Array2::zeros(self.w_ih.raw_dim()),
            w_hh: Array2::zeros(self.w_hh.raw_dim()),
            bias: Array2::zeros(self.bias.raw_dim()),
        }
    }

    /// Apply gradients using the provided optimizer
    pub fn update_parameters<O: crate::optimizers::Optimizer>(&mut self, gradients: &LSTMCellGradients, optimizer: &mut O, prefix: &str) {
        optimizer.update(&format!("{}_w_ih", prefix), &mut self.w_ih, &gradients.w_ih);
        optimizer.update(&format!("{}_w_hh", prefix), &mut self.w_hh, &gradients.w_hh);
        optimizer.update(&format!("{}_bias", prefix), &mut self.bias, &gradients.bias);
    }
}
