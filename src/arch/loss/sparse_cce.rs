use ndarray::{Array1, Array2, ArrayView2};

use super::LossFn;
use crate::{MlErr, Result, error::check_size};

const EPSILON: f32 = 1e-7;

/// Categorical cross entropy over predicted class probabilities, with the labels given as class
/// indices in an `(n, 1)` array.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparseCategoricalCrossentropy;

impl SparseCategoricalCrossentropy {
    fn labels(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Vec<usize>> {
        check_size("sparse categorical crossentropy labels", y.len(), y_pred.nrows())?;
        let classes = y_pred.ncols();

        y.iter()
            .map(|&label| {
                if label < 0. || label.fract() != 0. || label as usize >= classes {
                    return Err(MlErr::LabelOutOfRange { label, classes });
                }

                Ok(label as usize)
            })
            .collect()
    }
}

impl LossFn for SparseCategoricalCrossentropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array1<f32>> {
        let labels = Self::labels(y_pred, y)?;

        Ok(labels
            .iter()
            .enumerate()
            .map(|(i, &label)| -y_pred[[i, label]].clamp(EPSILON, 1. - EPSILON).ln())
            .collect())
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
        let labels = Self::labels(y_pred, y)?;
        let mut d = Array2::zeros(y_pred.raw_dim());

        for (i, &label) in labels.iter().enumerate() {
            let p = y_pred[[i, label]];

            if p > EPSILON && p < 1. - EPSILON {
                d[[i, label]] = -1. / p;
            }
        }

        Ok(d)
    }
}
