pub mod arch;
pub mod error;
pub mod meta;
pub mod optimization;
pub mod specs;
pub mod wrapper;

pub use error::{MlErr, Result};
