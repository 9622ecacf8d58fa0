use ndarray::{linalg, prelude::*};

use crate::{Result, arch::activations::ActFn, error::check_size};

/// A fully connected layer: `y = act_fn(x · W + b)`.
///
/// The layer owns no parameters, they are given on each pass as a raw slice laid out as the
/// `(dim.0, dim.1)` kernel in row-major order followed by the `dim.1` biases.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,
}

impl Dense {
    /// Creates a new `Dense`.
    ///
    /// # Arguments
    /// * `dim` - The input and output dimensions.
    /// * `act_fn` - An optional activation applied to the affine output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn act_fn(&self) -> Option<ActFn> {
        self.act_fn
    }

    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut z = self.pre_activation(params, x)?;

        if let Some(act_fn) = &self.act_fn {
            z.mapv_inplace(|z| act_fn.f(z));
        }

        Ok(z)
    }

    /// Back propagates `d` through the layer, writing the parameter gradient into `grad`.
    ///
    /// # Arguments
    /// * `params` - The parameters used on the forward pass.
    /// * `grad` - The gradient slice for this layer's parameters, it gets overwritten.
    /// * `x` - The input given on the forward pass.
    /// * `d` - The gradient of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to this layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        check_size("dense input", x.ncols(), self.dim.0)?;

        if let Some(act_fn) = &self.act_fn {
            let z = self.pre_activation(params, x)?;
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    fn pre_activation(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_size("dense input", x.ncols(), self.dim.0)?;

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));

        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        Ok(z)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_is_affine() {
        let dense = Dense::new((2, 2), None);
        let params = [1., 2., 3., 4., 5., 6.];
        let x = array![[1., 2.]];

        let y = dense.forward(&params, x.view()).unwrap();

        assert_eq!(y, array![[12., 16.]]);
    }

    #[test]
    fn backward_computes_kernel_and_bias_grads() {
        let dense = Dense::new((2, 1), None);
        let params = [1., 1., 0.];
        let x = array![[1., 2.], [3., 4.]];
        let d = array![[1.], [0.5]];
        let mut grad = [0.; 3];

        let dx = dense
            .backward(&params, &mut grad, x.view(), d.clone())
            .unwrap();

        assert_eq!(grad, [2.5, 4., 1.5]);
        assert_eq!(dx, array![[1., 1.], [0.5, 0.5]]);
    }

    #[test]
    fn relu_masks_gradient() {
        let dense = Dense::new((1, 2), Some(ActFn::relu()));
        let params = [1., -1., 0., 0.];
        let x = array![[2.]];
        let mut grad = [0.; 4];

        let y = dense.forward(&params, x.view()).unwrap();
        dense
            .backward(&params, &mut grad, x.view(), array![[1., 1.]])
            .unwrap();

        assert_eq!(y, array![[2., 0.]]);
        assert_eq!(grad, [2., 0., 1., 0.]);
    }

    #[test]
    fn wrong_input_width_is_an_error() {
        let dense = Dense::new((2, 2), None);
        let params = [1., 2., 3., 4., 5., 6.];
        let x = array![[1., 2., 3.]];
        let mut grad = [0.; 6];

        assert!(dense.forward(&params, x.view()).is_err());
        assert!(dense.backward(&params, &mut grad, x.view(), array![[1., 1.]]).is_err());
    }
}
