mod loss_fn;
mod mse;
mod sparse_cce;

pub use loss_fn::{Loss, LossFn};
pub use mse::Mse;
pub use sparse_cce::SparseCategoricalCrossentropy;
