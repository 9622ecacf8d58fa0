use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result,
    arch::{Model, Sequential, activations::ActFn, layers::Layer, loss::Loss},
    meta::{
        FullMetaLearner, LearningRateMetaLearner, LrMode, MetaLearner, MetaLearnerConfig,
        MetaLearnerKind,
    },
    optimization::{Adam, GradientDescent, Optimizer},
    wrapper::ModelWrapper,
};

/// The version written into every `MetaModelArtifact`.
pub const ARTIFACT_VERSION: u32 = 1;

/// The specification for the `ActFn` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnSpec {
    Sigmoid { amp: f32 },
    Relu,
}

/// The specification for the `Layer` enum, along with its trainable flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        dim: (usize, usize),
        act_fn: Option<ActFnSpec>,
        #[serde(default = "trainable")]
        trainable: bool,
    },
    FeatureTransform {
        dim: usize,
        #[serde(default = "trainable")]
        trainable: bool,
    },
    Lhuc {
        dim: usize,
        #[serde(default = "trainable")]
        trainable: bool,
    },
    Softmax,
}

fn trainable() -> bool {
    true
}

/// The specification for the `Loss` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFnSpec {
    Mse,
    SparseCategoricalCrossentropy,
}

/// The specification for a `ModelWrapper` around a `Sequential` model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperSpec {
    pub layers: Vec<LayerSpec>,
    pub loss: LossFnSpec,
}

/// The specification for the `MetaLearner` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetaLearnerSpec {
    Full { units: usize },
    LrPerLayer { num_steps: usize, mode: LrMode },
}

/// The specification for the `MetaModel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaModelSpec {
    pub wrapper: WrapperSpec,
    pub meta_learner: MetaLearnerSpec,
}

/// A persisted `MetaModel`: its specification and the meta learner's weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaModelArtifact {
    pub version: u32,
    pub spec: MetaModelSpec,
    pub weights: Vec<f32>,
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
}

impl From<ActFnSpec> for ActFn {
    fn from(spec: ActFnSpec) -> Self {
        match spec {
            ActFnSpec::Sigmoid { amp } => ActFn::sigmoid(amp),
            ActFnSpec::Relu => ActFn::relu(),
        }
    }
}

impl From<ActFn> for ActFnSpec {
    fn from(act_fn: ActFn) -> Self {
        match act_fn {
            ActFn::Sigmoid(sigmoid) => ActFnSpec::Sigmoid { amp: sigmoid.amp() },
            ActFn::Relu(_) => ActFnSpec::Relu,
        }
    }
}

impl From<LossFnSpec> for Loss {
    fn from(spec: LossFnSpec) -> Self {
        match spec {
            LossFnSpec::Mse => Loss::Mse,
            LossFnSpec::SparseCategoricalCrossentropy => Loss::SparseCategoricalCrossentropy,
        }
    }
}

impl From<Loss> for LossFnSpec {
    fn from(loss: Loss) -> Self {
        match loss {
            Loss::Mse => LossFnSpec::Mse,
            Loss::SparseCategoricalCrossentropy => LossFnSpec::SparseCategoricalCrossentropy,
        }
    }
}

impl LayerSpec {
    fn describe(layer: &Layer, trainable: bool) -> Self {
        match layer {
            Layer::Dense(l) => LayerSpec::Dense {
                dim: l.dim(),
                act_fn: l.act_fn().map(ActFnSpec::from),
                trainable,
            },
            Layer::FeatureTransform(l) => LayerSpec::FeatureTransform {
                dim: l.dim(),
                trainable,
            },
            Layer::Lhuc(l) => LayerSpec::Lhuc {
                dim: l.dim(),
                trainable,
            },
            Layer::Softmax(_) => LayerSpec::Softmax,
        }
    }

    fn build(self) -> (Layer, bool) {
        match self {
            LayerSpec::Dense {
                dim,
                act_fn,
                trainable,
            } => (Layer::dense(dim, act_fn.map(ActFn::from)), trainable),
            LayerSpec::FeatureTransform { dim, trainable } => {
                (Layer::feature_transform(dim), trainable)
            }
            LayerSpec::Lhuc { dim, trainable } => (Layer::lhuc(dim), trainable),
            LayerSpec::Softmax => (Layer::softmax(), false),
        }
    }
}

impl WrapperSpec {
    /// Describes an existing wrapped model.
    pub fn describe(wrapper: &ModelWrapper) -> Self {
        let model = wrapper.model();
        let layers = model
            .layers()
            .iter()
            .zip(model.trainable())
            .map(|(layer, trainable)| LayerSpec::describe(layer, trainable))
            .collect();

        Self {
            layers,
            loss: model.loss().into(),
        }
    }

    /// Builds the wrapped `Sequential` model this spec describes.
    pub fn build(&self) -> Result<ModelWrapper> {
        let model = Sequential::with_trainable(
            self.layers.iter().map(|spec| spec.build()),
            self.loss.into(),
        )?;

        ModelWrapper::new(model)
    }
}

impl MetaLearnerSpec {
    /// Describes an existing meta learner.
    pub fn describe(learner: &MetaLearner) -> Self {
        match learner {
            MetaLearner::Full(learner) => MetaLearnerSpec::Full {
                units: learner.units(),
            },
            MetaLearner::LearningRate(learner) => MetaLearnerSpec::LrPerLayer {
                num_steps: learner.num_steps(),
                mode: learner.mode(),
            },
        }
    }

    /// Rebuilds the described meta learner around the given weights.
    pub fn build<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        weights: Vec<f32>,
    ) -> Result<MetaLearner> {
        let learner = match *self {
            MetaLearnerSpec::Full { units } => {
                MetaLearner::Full(FullMetaLearner::from_weights(wrapper, units, weights)?)
            }
            MetaLearnerSpec::LrPerLayer { num_steps, mode } => MetaLearner::LearningRate(
                LearningRateMetaLearner::from_weights(wrapper, num_steps, mode, weights)?,
            ),
        };

        Ok(learner)
    }
}

impl From<&MetaLearnerConfig> for MetaLearnerSpec {
    fn from(config: &MetaLearnerConfig) -> Self {
        match config.kind {
            MetaLearnerKind::Full => MetaLearnerSpec::Full {
                units: config.units,
            },
            MetaLearnerKind::LrPerLayer => MetaLearnerSpec::LrPerLayer {
                num_steps: config.num_steps,
                mode: config.mode,
            },
        }
    }
}

impl MetaModelArtifact {
    /// Fails unless the artifact was written with the current `ARTIFACT_VERSION`.
    pub fn check_version(&self) -> Result<()> {
        if self.version != ARTIFACT_VERSION {
            return Err(MlErr::UnsupportedVersion {
                got: self.version,
                expected: ARTIFACT_VERSION,
            });
        }

        Ok(())
    }
}

impl OptimizerSpec {
    /// Builds the described optimizer for a weight vector of length `len`.
    pub fn build(self, len: usize) -> Box<dyn Optimizer + Send> {
        match self {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
        }
    }
}
