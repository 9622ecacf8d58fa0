use ndarray::{Array2, ArrayView2};

use super::{Dense, FeatureTransform, Lhuc, Softmax};
use crate::{Result, arch::activations::ActFn};

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Dense(Dense),
    FeatureTransform(FeatureTransform),
    Lhuc(Lhuc),
    Softmax(Softmax),
}

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    pub fn feature_transform(dim: usize) -> Self {
        Self::FeatureTransform(FeatureTransform::new(dim))
    }

    pub fn lhuc(dim: usize) -> Self {
        Self::Lhuc(Lhuc::new(dim))
    }

    pub fn softmax() -> Self {
        Self::Softmax(Softmax)
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Self::Dense(l) => l.size(),
            Self::FeatureTransform(l) => l.size(),
            Self::Lhuc(l) => l.size(),
            Self::Softmax(_) => 0,
        }
    }

    /// Makes a forward pass through the layer with externally supplied parameters.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.forward(params, x),
            Self::FeatureTransform(l) => l.forward(params, x),
            Self::Lhuc(l) => l.forward(params, x),
            Self::Softmax(l) => Ok(l.forward(x)),
        }
    }

    /// Back propagates `d` through the layer.
    ///
    /// # Arguments
    /// * `params` - The parameters used on the forward pass.
    /// * `grad` - The gradient slice for this layer's parameters, it gets overwritten.
    /// * `x` - The layer's input on the forward pass.
    /// * `y` - The layer's output on the forward pass.
    /// * `d` - The gradient of the loss with respect to `y`.
    ///
    /// # Returns
    /// The gradient of the loss with respect to `x`.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.backward(params, grad, x, d),
            Self::FeatureTransform(l) => l.backward(params, grad, x, d),
            Self::Lhuc(l) => l.backward(params, grad, x, d),
            Self::Softmax(l) => Ok(l.backward(y, d)),
        }
    }
}
