mod model_wrapper;
mod param_manager;
mod param_table;

pub use model_wrapper::{ModelWrapper, Reduction};
pub use param_manager::{BackIter, FrontIter, ParamManager};
pub use param_table::{ParamGroup, ParamGroups, ParamTable};
