use ndarray::prelude::*;

use crate::{Result, error::check_size};

/// Learning hidden unit contributions: scales every hidden unit by its own amplitude, `y = x * r`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lhuc {
    dim: usize,
}

impl Lhuc {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_size("lhuc input", x.ncols(), self.dim)?;
        let r = ArrayView1::from_shape(self.dim, params)?;
        Ok(&x * &r)
    }

    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        check_size("lhuc input", x.ncols(), self.dim)?;

        let r = ArrayView1::from_shape(self.dim, params)?;
        let mut dr = ArrayViewMut1::from_shape(self.dim, grad)?;

        dr.assign(&(&d * &x).sum_axis(Axis(0)));
        Ok(d * &r)
    }
}
