use ndarray::prelude::*;

use crate::{Result, error::check_size};

/// A per-feature affine transform: `y = x * scale + shift`.
///
/// Parameters are laid out as the `dim` scales followed by the `dim` shifts.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTransform {
    dim: usize,
}

impl FeatureTransform {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> usize {
        2 * self.dim
    }

    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_size("feature transform input", x.ncols(), self.dim)?;
        let (scale, shift) = self.view_params(params)?;
        Ok(&x * &scale + &shift)
    }

    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        check_size("feature transform input", x.ncols(), self.dim)?;

        let (dscale, dshift) = grad.split_at_mut(self.dim);
        let mut dscale = ArrayViewMut1::from_shape(self.dim, dscale)?;
        let mut dshift = ArrayViewMut1::from_shape(self.dim, dshift)?;

        dscale.assign(&(&d * &x).sum_axis(Axis(0)));
        dshift.assign(&d.sum_axis(Axis(0)));

        let (scale, _) = self.view_params(params)?;
        Ok(d * &scale)
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView1<'a, f32>, ArrayView1<'a, f32>)> {
        let (scale, shift) = params.split_at(self.dim);
        let scale = ArrayView1::from_shape(self.dim, scale)?;
        let shift = ArrayView1::from_shape(self.dim, shift)?;
        Ok((scale, shift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_and_shifts_each_feature() {
        let ft = FeatureTransform::new(2);
        let params = [2., -1., 0.5, 0.];
        let x = array![[1., 2.], [3., 4.]];
        let mut grad = [0.; 4];

        let y = ft.forward(&params, x.view()).unwrap();
        let dx = ft
            .backward(&params, &mut grad, x.view(), array![[1., 1.], [1., 0.]])
            .unwrap();

        assert_eq!(y, array![[2.5, -2.], [6.5, -4.]]);
        assert_eq!(grad, [4., 2., 2., 1.]);
        assert_eq!(dx, array![[2., -1.], [2., 0.]]);
    }

    #[test]
    fn single_column_input_is_not_broadcast() {
        let ft = FeatureTransform::new(2);
        let params = [1., 1., 0., 0.];
        let x = array![[5.]];
        let mut grad = [0.; 4];

        assert!(ft.forward(&params, x.view()).is_err());
        assert!(ft.backward(&params, &mut grad, x.view(), array![[1., 1.]]).is_err());
    }
}
