use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView2};

use super::{Mse, SparseCategoricalCrossentropy};
use crate::{MlErr, Result};

pub trait LossFn {
    /// Returns the loss of each example (row) of the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array1<f32>>;

    /// Returns the gradient of the sum of the per-example losses with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>>;
}

/// A loss function resolvable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    Mse,
    SparseCategoricalCrossentropy,
}

impl FromStr for Loss {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mse" | "mean_squared_error" => Ok(Self::Mse),
            "sparse_categorical_crossentropy" => Ok(Self::SparseCategoricalCrossentropy),
            _ => Err(MlErr::UnknownLoss(s.to_string())),
        }
    }
}

impl LossFn for Loss {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array1<f32>> {
        match self {
            Self::Mse => Mse.loss(y_pred, y),
            Self::SparseCategoricalCrossentropy => SparseCategoricalCrossentropy.loss(y_pred, y),
        }
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Self::Mse => Mse.loss_prime(y_pred, y),
            Self::SparseCategoricalCrossentropy => {
                SparseCategoricalCrossentropy.loss_prime(y_pred, y)
            }
        }
    }
}
