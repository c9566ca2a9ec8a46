use ndarray::Array2;
use std::collections::HashMap;

/// Optimizer trait for parameter updates during training
pub trait Optimizer {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>);
}

/// Per-parameter Adam state
struct Moments {
    m: Array2<f64>, // first moment estimate
    v: Array2<f64>, // second moment estimate
    t: i32,         // update count for bias correction
}

/// Adam optimizer with adaptive learning rates
///
/// Implements: m_t = β₁m_{t-1} + (1-β₁)g_t
///             v_t = β₂v_{t-1} + (1-β₂)g_t²
///             θ_t = θ_{t-1} - η * m̂_t / (√v̂_t + ε)
/// where m̂_t and v̂_t are bias-corrected estimates
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    state: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Adam::with_params(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            state: HashMap::new(),
        }
    }

    /// Number of parameter tensors with live moment estimates.
    pub fn tracked_parameters(&self) -> usize {
        self.state.len()
    }
}

impl Optimizer for Adam {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>) {
        let moments = self.state.entry(param_id.to_string()).or_insert_with(|| Moments {
            m: Array2::zeros(param.raw_dim()),
            v: Array2::zeros(param.raw_dim()),
            t: 0,
        });
        moments.t += 1;

        // Update biased moment estimates
        moments.m = self.beta1 * &moments.m + (1.0 - self.beta1) * gradient;
        moments.v = self.beta2 * &moments.v + (1.0 - self.beta2) * &(gradient * gradient);

        // Bias correction
        let m_hat = &moments.m / (1.0 - self.beta1.powi(moments.t));
        let v_hat = &moments.v / (1.0 - self.beta2.powi(moments.t));

        let update = self.learning_rate * m_hat / (v_hat.mapv(f64::sqrt) + self.epsilon);
        *param -= &update;
    }
}
