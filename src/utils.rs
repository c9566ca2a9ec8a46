/// Utility functions shared across the crate.
use std::fmt::Display;

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Renders an optional value, using `None` for an unset field.
pub fn display_option<T: Display>(value: Option<&T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-10);
        assert!(sigmoid(1000.0) > 0.99);
        assert!(sigmoid(-1000.0) < 0.01);
    }

    #[test]
    fn test_display_option() {
        assert_eq!(display_option(Some(&3usize)), "3");
        assert_eq!(display_option::<f64>(None), "None");
    }
}
