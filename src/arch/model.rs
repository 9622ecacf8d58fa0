use ndarray::{Array2, ArrayView2};

use crate::{
    Result,
    arch::loss::Loss,
    wrapper::{BackIter, ParamManager},
};

/// The base model contract required by the parameter wrapper.
///
/// A `Model` owns no weights: every pass receives them through a `ParamManager`, which is what
/// lets the wrapper substitute externally supplied parameter vectors.
pub trait Model {
    /// Returns the amount of parameters of each layer, in declaration order.
    fn layer_sizes(&self) -> Vec<usize>;

    /// Returns whether each layer's weights may be updated by a meta learner, in declaration
    /// order.
    fn trainable(&self) -> Vec<bool>;

    /// Returns the loss function the model is trained with.
    fn loss(&self) -> Loss;

    /// Makes a forward pass keeping every intermediate activation.
    ///
    /// # Arguments
    /// * `params` - The manager yielding each weight-bearing layer's parameters.
    /// * `x` - The input data.
    fn forward(&self, params: &ParamManager<'_>, x: ArrayView2<f32>) -> Result<Trace>;

    /// Back propagates `d`, the gradient of the loss with respect to the model's output, writing
    /// every weight-bearing layer's parameter gradient through `grads`.
    fn backward(
        &self,
        params: &ParamManager<'_>,
        trace: &Trace,
        d: Array2<f32>,
        grads: &mut BackIter<'_, '_>,
    ) -> Result<()>;
}

/// The activations of a forward pass: the model's input followed by every layer's output.
#[derive(Debug, Clone)]
pub struct Trace {
    activations: Vec<Array2<f32>>,
}

impl Trace {
    pub(crate) fn new(x: ArrayView2<f32>) -> Self {
        Self {
            activations: vec![x.to_owned()],
        }
    }

    pub(crate) fn push(&mut self, a: Array2<f32>) {
        self.activations.push(a);
    }

    /// Returns the output of the last layer.
    pub fn output(&self) -> ArrayView2<'_, f32> {
        // `activations` always holds at least the input.
        self.activations[self.activations.len() - 1].view()
    }

    pub fn into_output(mut self) -> Array2<f32> {
        self.activations.swap_remove(self.activations.len() - 1)
    }

    pub(crate) fn len(&self) -> usize {
        self.activations.len()
    }

    /// Returns the input and output of the `i`-th layer.
    pub(crate) fn layer(&self, i: usize) -> (ArrayView2<'_, f32>, ArrayView2<'_, f32>) {
        (self.activations[i].view(), self.activations[i + 1].view())
    }
}
