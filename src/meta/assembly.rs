use std::io::{Read, Write};

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::{Episode, MetaGrads, MetaLearner, MetaLearnerConfig, MetaTape};
use crate::{
    Result,
    arch::{Model, Sequential, loss::LossFn},
    error::check_size,
    optimization::Optimizer,
    specs::{ARTIFACT_VERSION, MetaLearnerSpec, MetaModelArtifact, MetaModelSpec, WrapperSpec},
    wrapper::ModelWrapper,
};

/// The outcome of adapting a model on an episode, kept to back propagate through it.
#[derive(Debug, Clone)]
pub struct Adaptation {
    /// The adapted full parameter vector.
    pub params: Array1<f32>,
    pub tape: MetaTape,
}

/// A wrapped model and the meta learner that adapts it.
///
/// Its forward pass adapts the initial parameters on an episode and predicts the test features
/// with the adapted ones. Only the meta learner's weights are trained by `train_step`.
#[derive(Debug, Clone)]
pub struct MetaModel<M = Sequential> {
    wrapper: ModelWrapper<M>,
    meta_learner: MetaLearner,
}

impl<M: Model> MetaModel<M> {
    /// Creates a new `MetaModel`.
    pub fn new(wrapper: ModelWrapper<M>, meta_learner: MetaLearner) -> Self {
        Self {
            wrapper,
            meta_learner,
        }
    }

    /// Creates a new `MetaModel` with a freshly initialized meta learner.
    pub fn from_config(wrapper: ModelWrapper<M>, config: &MetaLearnerConfig) -> Result<Self> {
        let meta_learner = config.build(&wrapper)?;
        Ok(Self::new(wrapper, meta_learner))
    }

    pub fn wrapper(&self) -> &ModelWrapper<M> {
        &self.wrapper
    }

    pub fn meta_learner(&self) -> &MetaLearner {
        &self.meta_learner
    }

    pub fn meta_learner_mut(&mut self) -> &mut MetaLearner {
        &mut self.meta_learner
    }

    /// Adapts `params` on `episode` and predicts `test_x` with the adapted parameters.
    ///
    /// # Arguments
    /// * `params` - The initial full parameter vector.
    /// * `episode` - The adaptation features and labels, one batch per step.
    /// * `test_x` - The held-out features.
    pub fn forward(
        &self,
        params: ArrayView1<f32>,
        episode: &Episode,
        test_x: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let (predictions, _) = self.forward_with_tape(params, episode, test_x)?;
        Ok(predictions)
    }

    /// Same as `forward`, but also returns what `backward` needs.
    pub fn forward_with_tape(
        &self,
        params: ArrayView1<f32>,
        episode: &Episode,
        test_x: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Adaptation)> {
        let (new_params, tape) = self.meta_learner.adapt(&self.wrapper, params, episode)?;
        let predictions = self.wrapper.forward_full(new_params.view(), test_x)?;

        Ok((
            predictions,
            Adaptation {
                params: new_params,
                tape,
            },
        ))
    }

    /// Back propagates `d`, the gradient of an outer loss with respect to the predictions of
    /// `forward_with_tape`, down to the meta learner's weights and the initial parameters.
    pub fn backward(
        &self,
        adaptation: &Adaptation,
        test_x: ArrayView2<f32>,
        d: Array2<f32>,
    ) -> Result<MetaGrads> {
        let d_new_params = self
            .wrapper
            .backward_full(adaptation.params.view(), test_x, d)?;

        self.meta_learner
            .backward(&self.wrapper, &adaptation.tape, d_new_params.view())
    }

    /// Runs one outer training step on the meta learner's weights.
    ///
    /// The outer loss is the wrapped model's loss on `(test_x, test_y)`, averaged over the
    /// examples.
    ///
    /// # Returns
    /// The outer loss before the update.
    pub fn train_step<O>(
        &mut self,
        params: ArrayView1<f32>,
        episode: &Episode,
        test_x: ArrayView2<f32>,
        test_y: ArrayView2<f32>,
        optimizer: &mut O,
    ) -> Result<f32>
    where
        O: Optimizer + ?Sized,
    {
        check_size("test labels rows", test_y.nrows(), test_x.nrows())?;
        let (predictions, adaptation) = self.forward_with_tape(params, episode, test_x)?;

        let loss_fn = self.wrapper.loss();
        let losses = loss_fn.loss(predictions.view(), test_y)?;
        let n = losses.len().max(1) as f32;
        let loss = losses.sum() / n;

        let d = loss_fn.loss_prime(predictions.view(), test_y)? / n;
        let grads = self.backward(&adaptation, test_x, d)?;

        optimizer.update_params(self.meta_learner.weights_mut(), &grads.weights)?;
        self.meta_learner.constrain();
        debug!(loss = loss; "meta training step");

        Ok(loss)
    }
}

impl MetaModel {
    /// Describes this model and its learned weights.
    pub fn to_artifact(&self) -> MetaModelArtifact {
        MetaModelArtifact {
            version: ARTIFACT_VERSION,
            spec: MetaModelSpec {
                wrapper: WrapperSpec::describe(&self.wrapper),
                meta_learner: MetaLearnerSpec::describe(&self.meta_learner),
            },
            weights: self.meta_learner.weights().to_vec(),
        }
    }

    /// Rebuilds a model from its artifact.
    pub fn from_artifact(artifact: MetaModelArtifact) -> Result<Self> {
        artifact.check_version()?;

        let wrapper = artifact.spec.wrapper.build()?;
        let meta_learner = artifact
            .spec
            .meta_learner
            .build(&wrapper, artifact.weights)?;

        Ok(Self::new(wrapper, meta_learner))
    }

    /// Writes this model's artifact as JSON.
    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        let artifact = self.to_artifact();
        serde_json::to_writer(writer, &artifact)?;
        debug!(version = artifact.version, weights = artifact.weights.len(); "saved meta model");

        Ok(())
    }

    /// Reads a model from an artifact written by `save`.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let artifact: MetaModelArtifact = serde_json::from_reader(reader)?;
        debug!(version = artifact.version, weights = artifact.weights.len(); "loaded meta model");

        Self::from_artifact(artifact)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, array};

    use super::*;
    use crate::{
        MlErr,
        arch::{layers::Layer, loss::Loss},
        meta::{LrMode, MetaLearnerKind},
        optimization::GradientDescent,
    };

    fn wrapper() -> ModelWrapper {
        let model = Sequential::with_trainable(
            [
                (Layer::feature_transform(2), false),
                (Layer::dense((2, 2), None), true),
                (Layer::lhuc(2), true),
            ],
            Loss::Mse,
        )
        .unwrap();
        ModelWrapper::new(model).unwrap()
    }

    fn episode() -> Episode {
        let feats = Array3::from_shape_fn((3, 4, 2), |(t, i, j)| (t + i + 2 * j) as f32 / 6.);
        let labels = Array3::from_shape_fn((3, 4, 2), |(t, i, j)| (i * j + t) as f32 / 4.);
        Episode::from_arrays(feats.view(), labels.view()).unwrap()
    }

    fn params() -> Array1<f32> {
        array![1., 1., 0., 0., 0.2, -0.1, 0.3, 0.4, 0., 0.1, 1., 1.]
    }

    #[test]
    fn predicts_with_the_adapted_params() {
        let model = MetaModel::from_config(
            wrapper(),
            &MetaLearnerConfig {
                kind: MetaLearnerKind::LrPerLayer,
                num_steps: 3,
                mode: LrMode::Lr,
                ..Default::default()
            },
        )
        .unwrap();
        let test_x = array![[1., 2.], [0., 1.]];

        let (predictions, adaptation) = model
            .forward_with_tape(params().view(), &episode(), test_x.view())
            .unwrap();

        assert_eq!(
            predictions,
            model
                .wrapper()
                .forward_full(adaptation.params.view(), test_x.view())
                .unwrap()
        );
        assert_ne!(adaptation.params, params());
    }

    #[test]
    fn train_step_updates_only_the_meta_learner() {
        let mut model = MetaModel::from_config(
            wrapper(),
            &MetaLearnerConfig {
                kind: MetaLearnerKind::Full,
                units: 4,
                seed: Some(9),
                ..Default::default()
            },
        )
        .unwrap();
        let before = model.meta_learner().weights().to_vec();
        let params = params();
        let test_x = array![[1., 2.], [0., 1.]];
        let test_y = array![[1., 0.], [0., 1.]];

        let loss = model
            .train_step(
                params.view(),
                &episode(),
                test_x.view(),
                test_y.view(),
                &mut GradientDescent::new(0.1),
            )
            .unwrap();

        assert!(loss.is_finite());
        assert_ne!(model.meta_learner().weights(), &before[..]);
        assert_eq!(params, self::params());
    }

    #[test]
    fn artifact_round_trip() {
        let model = MetaModel::from_config(
            wrapper(),
            &MetaLearnerConfig {
                kind: MetaLearnerKind::Full,
                units: 3,
                seed: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        let mut buf = Vec::new();

        model.save(&mut buf).unwrap();
        let loaded = MetaModel::load(buf.as_slice()).unwrap();

        assert_eq!(loaded.to_artifact(), model.to_artifact());
        let test_x = array![[0.5, -0.5]];
        assert_eq!(
            loaded
                .forward(params().view(), &episode(), test_x.view())
                .unwrap(),
            model
                .forward(params().view(), &episode(), test_x.view())
                .unwrap()
        );
    }

    #[test]
    fn mis_sized_features_are_an_error() {
        let model = MetaModel::from_config(
            wrapper(),
            &MetaLearnerConfig {
                kind: MetaLearnerKind::Full,
                units: 3,
                seed: Some(4),
                ..Default::default()
            },
        )
        .unwrap();

        let wide = model.forward(params().view(), &episode(), array![[1., 2., 3.]].view());
        let narrow = model.forward(params().view(), &episode(), array![[5.]].view());

        assert!(matches!(wide, Err(MlErr::SizeMismatch { got: 3, expected: 2, .. })));
        assert!(matches!(narrow, Err(MlErr::SizeMismatch { got: 1, expected: 2, .. })));

        let feats = Array3::zeros((3, 4, 3));
        let labels = Array3::zeros((3, 4, 2));
        let wide_episode = Episode::from_arrays(feats.view(), labels.view()).unwrap();
        assert!(
            model
                .forward(params().view(), &wide_episode, array![[1., 2.]].view())
                .is_err()
        );
    }
}
