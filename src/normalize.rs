//! Per-column min-max scaling of windowed tensors.
//!
//! A rank-3 tensor `(samples, timesteps, features)` is scaled through its
//! flattened view `(samples, timesteps * features)`, so every
//! (timestep, feature) position gets its own affine map into `[0, 1]`.

use std::fmt;

use ndarray::{Array1, Array2, Array3, Axis};

use crate::error::{ForecastError, Result};

/// Learned per-column minimum and maximum.
///
/// Columns whose range is zero use a unit range, so they map to `0` and
/// invert back to their constant value exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    data_min: Array1<f64>,
    data_max: Array1<f64>,
}

impl MinMaxScaler {
    /// Computes column statistics over the rows of `data`.
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(ForecastError::EmptyData("cannot fit a scaler on zero rows".into()));
        }
        let data_min = data.fold_axis(Axis(0), f64::INFINITY, |&acc, &x| acc.min(x));
        let data_max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &x| acc.max(x));
        Ok(Self { data_min, data_max })
    }

    /// Fits on `data` and returns the scaled copy alongside the scaler.
    pub fn fit_transform(data: &Array2<f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaler, scaled))
    }

    pub fn n_columns(&self) -> usize {
        self.data_min.len()
    }

    pub fn data_min(&self) -> &Array1<f64> {
        &self.data_min
    }

    pub fn data_max(&self) -> &Array1<f64> {
        &self.data_max
    }

    fn data_range(&self) -> Array1<f64> {
        (&self.data_max - &self.data_min).mapv(|r| if r == 0.0 { 1.0 } else { r })
    }

    fn check_columns(&self, data: &Array2<f64>) -> Result<()> {
        if data.ncols() != self.n_columns() {
            return Err(ForecastError::shape(
                "min-max scaling",
                &[data.nrows(), self.n_columns()],
                data.shape(),
            ));
        }
        Ok(())
    }

    /// `x' = (x - min) / (max - min)`
    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(data)?;
        Ok((data - &self.data_min) / &self.data_range())
    }

    /// `x = x' * (max - min) + min`
    pub fn inverse_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(data)?;
        Ok(data * &self.data_range() + &self.data_min)
    }

    /// Fits on the flattened view of a windowed tensor and scales it.
    pub fn fit_transform_3d(tensor: &Array3<f64>) -> Result<(Self, Array3<f64>)> {
        let (scaler, scaled) = Self::fit_transform(&flatten(tensor))?;
        Ok((scaler, unflatten(scaled, tensor.dim())?))
    }

    pub fn transform_3d(&self, tensor: &Array3<f64>) -> Result<Array3<f64>> {
        let scaled = self.transform(&flatten(tensor))?;
        unflatten(scaled, tensor.dim())
    }

    pub fn inverse_transform_3d(&self, tensor: &Array3<f64>) -> Result<Array3<f64>> {
        let restored = self.inverse_transform(&flatten(tensor))?;
        unflatten(restored, tensor.dim())
    }
}

impl fmt::Display for MinMaxScaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MinMaxScaler(columns = {})", self.n_columns())
    }
}

/// Input-side and output-side scalers calibrated by one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerPair {
    pub input: MinMaxScaler,
    pub output: MinMaxScaler,
}

/// Merges the timestep and feature axes: `(n, t, f) -> (n, t * f)`.
pub fn flatten(tensor: &Array3<f64>) -> Array2<f64> {
    let (samples, timesteps, features) = tensor.dim();
    Array2::from_shape_fn((samples, timesteps * features), |(i, j)| {
        tensor[[i, j / features, j % features]]
    })
}

/// Inverse of [`flatten`].
pub fn unflatten(matrix: Array2<f64>, shape: (usize, usize, usize)) -> Result<Array3<f64>> {
    let (samples, timesteps, features) = shape;
    if matrix.dim() != (samples, timesteps * features) {
        return Err(ForecastError::shape(
            "unflatten",
            &[samples, timesteps * features],
            matrix.shape(),
        ));
    }
    Ok(Array3::from_shape_fn(shape, |(i, t, f)| matrix[[i, t * features + f]]))
}
