use crate::Result;

/// An update rule for the meta learner's weights in the outer training loop.
pub trait Optimizer {
    /// Takes one step on `params` given the gradient `grad` of the outer loss.
    ///
    /// # Returns
    /// An error if `params` and `grad` differ in length.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;
}
