use ndarray::prelude::*;

/// Row-wise softmax.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Softmax;

impl Softmax {
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut y = x.to_owned();

        for mut row in y.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }

        y
    }

    /// Back propagates through the softmax given its output `y`.
    pub fn backward(&self, y: ArrayView2<f32>, d: Array2<f32>) -> Array2<f32> {
        let dot = (&d * &y).sum_axis(Axis(1)).insert_axis(Axis(1));
        (d - &dot) * &y
    }
}
