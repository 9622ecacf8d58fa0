mod assembly;
pub mod detach;
mod episode;
mod full;
pub mod init;
mod learning_rate;
mod meta_learner;
pub mod preprocess;
mod rnn;

pub use assembly::{Adaptation, MetaModel};
pub use detach::{Detached, stop_gradient};
pub use episode::Episode;
pub use full::{FullMetaLearner, FullTape, GroupWeightsMut, INPUT_DIM, OptimizerState};
pub use learning_rate::{
    INITIAL_LEARNING_RATE, LOSS_SCALE, LearningRateMetaLearner, LrMode, LrTape,
};
pub use meta_learner::{MetaGrads, MetaLearner, MetaLearnerConfig, MetaLearnerKind, MetaTape};
pub use rnn::rnn;
