use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::LossFn;
use crate::{Result, error::check_size};

/// Mean squared error loss function, averaged over the output axis of each example.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array1<f32>> {
        check_size("mse labels", y.len(), y_pred.len())?;
        let y = y.to_shape(y_pred.raw_dim())?;
        let n = y_pred.ncols().max(1) as f32;

        Ok((&y_pred - &y).mapv(|x| x.powi(2)).sum_axis(Axis(1)) / n)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_size("mse labels", y.len(), y_pred.len())?;
        let y = y.to_shape(y_pred.raw_dim())?;
        let n = y_pred.ncols().max(1) as f32;

        Ok((&y_pred - &y) * (2.0 / n))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn loss_is_per_example() {
        let y_pred = array![[1., 2.], [0., 0.]];
        let y = array![[1., 0.], [1., 1.]];

        assert_eq!(Mse.loss(y_pred.view(), y.view()).unwrap(), array![2., 1.]);
        assert_eq!(
            Mse.loss_prime(y_pred.view(), y.view()).unwrap(),
            array![[0., 2.], [-1., -1.]]
        );
    }

    #[test]
    fn mismatched_labels_fail() {
        let y_pred = array![[1., 2.]];
        let y = array![[1.]];

        assert!(Mse.loss(y_pred.view(), y.view()).is_err());
    }
}
