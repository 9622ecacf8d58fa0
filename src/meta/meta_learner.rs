use std::str::FromStr;

use ndarray::{Array1, ArrayView1};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::{Episode, FullMetaLearner, FullTape, LearningRateMetaLearner, LrMode, LrTape};
use crate::{MlErr, Result, arch::Model, wrapper::ModelWrapper};

/// The known meta learner variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaLearnerKind {
    Full,
    #[default]
    LrPerLayer,
}

impl FromStr for MetaLearnerKind {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "lr_per_layer" => Ok(Self::LrPerLayer),
            other => Err(MlErr::UnknownMetaLearner(other.to_string())),
        }
    }
}

/// The construction options of a meta learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaLearnerConfig {
    pub kind: MetaLearnerKind,
    #[serde(default = "default_units")]
    pub units: usize,
    #[serde(default = "default_num_steps")]
    pub num_steps: usize,
    #[serde(default)]
    pub mode: LrMode,
    /// The seed of the weight initialization, OS entropy if absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_units() -> usize {
    20
}

fn default_num_steps() -> usize {
    3
}

impl Default for MetaLearnerConfig {
    fn default() -> Self {
        Self {
            kind: MetaLearnerKind::default(),
            units: default_units(),
            num_steps: default_num_steps(),
            mode: LrMode::default(),
            seed: None,
        }
    }
}

impl MetaLearnerConfig {
    /// Builds a freshly initialized meta learner for the given wrapped model.
    pub fn build<M: Model>(&self, wrapper: &ModelWrapper<M>) -> Result<MetaLearner> {
        let learner = match self.kind {
            MetaLearnerKind::Full => {
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_os_rng(),
                };

                MetaLearner::Full(FullMetaLearner::new(wrapper, self.units, &mut rng)?)
            }
            MetaLearnerKind::LrPerLayer => MetaLearner::LearningRate(
                LearningRateMetaLearner::new(wrapper, self.num_steps, self.mode)?,
            ),
        };

        Ok(learner)
    }
}

/// A meta learner of any of the known kinds.
#[derive(Debug, Clone)]
pub enum MetaLearner {
    Full(FullMetaLearner),
    LearningRate(LearningRateMetaLearner),
}

/// The record of one adaptation episode, as produced by the meta learner of the same kind.
#[derive(Debug, Clone)]
pub enum MetaTape {
    Full(FullTape),
    LearningRate(LrTape),
}

/// The gradients of an outer loss through an adaptation episode.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaGrads {
    /// With respect to the meta learner's flat weight vector.
    pub weights: Vec<f32>,
    /// With respect to the initial full parameter vector.
    pub params: Array1<f32>,
}

impl MetaLearner {
    pub fn kind(&self) -> MetaLearnerKind {
        match self {
            Self::Full(_) => MetaLearnerKind::Full,
            Self::LearningRate(_) => MetaLearnerKind::LrPerLayer,
        }
    }

    /// The meta learner's learned weights as one flat vector.
    pub fn weights(&self) -> &[f32] {
        match self {
            Self::Full(learner) => learner.weights(),
            Self::LearningRate(learner) => learner.learning_rates(),
        }
    }

    pub fn weights_mut(&mut self) -> &mut [f32] {
        match self {
            Self::Full(learner) => learner.weights_mut(),
            Self::LearningRate(learner) => learner.learning_rates_mut(),
        }
    }

    /// Projects the weights back onto their valid domain after an update.
    pub fn constrain(&mut self) {
        if let Self::LearningRate(learner) = self {
            learner.constrain();
        }
    }

    /// Adapts the trainable parameters of `params` over `episode`.
    pub fn adapt<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        params: ArrayView1<f32>,
        episode: &Episode,
    ) -> Result<(Array1<f32>, MetaTape)> {
        match self {
            Self::Full(learner) => {
                let (new_params, tape) = learner.adapt(wrapper, params, episode)?;
                Ok((new_params, MetaTape::Full(tape)))
            }
            Self::LearningRate(learner) => {
                let (new_params, tape) = learner.adapt(wrapper, params, episode)?;
                Ok((new_params, MetaTape::LearningRate(tape)))
            }
        }
    }

    /// Back propagates `d_new_params` through the adaptation recorded in `tape`.
    pub fn backward<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        tape: &MetaTape,
        d_new_params: ArrayView1<f32>,
    ) -> Result<MetaGrads> {
        match (self, tape) {
            (Self::Full(learner), MetaTape::Full(tape)) => {
                learner.backward(wrapper, tape, d_new_params)
            }
            (Self::LearningRate(learner), MetaTape::LearningRate(tape)) => {
                learner.backward(wrapper, tape, d_new_params)
            }
            _ => Err(MlErr::InvalidConfig(
                "the tape was recorded by another kind of meta learner",
            )),
        }
    }
}
