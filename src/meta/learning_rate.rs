use std::{fmt, str::FromStr};

use log::debug;
use ndarray::{Array1, ArrayView1, s};
use serde::{Deserialize, Serialize};

use super::{
    Episode, MetaGrads,
    detach::{Detached, stop_gradient},
    rnn::rnn,
};
use crate::{
    MlErr, Result,
    arch::Model,
    error::check_size,
    wrapper::{ModelWrapper, ParamGroup, Reduction},
};

/// The value every learning rate starts at.
pub const INITIAL_LEARNING_RATE: f32 = 0.001;

/// The divisor of the summed inner loss.
pub const LOSS_SCALE: f32 = 1000.;

/// How the learned learning rates are shared between steps and parameter groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrMode {
    /// One rate for everything.
    Lr,
    /// One rate per step.
    LrPerStep,
    /// One rate per parameter group.
    #[default]
    LrPerLayer,
    /// One rate per step and parameter group.
    LrPerLayerPerStep,
}

impl LrMode {
    /// Returns the amount of learning rates the mode keeps.
    pub fn num_rates(self, num_steps: usize, num_groups: usize) -> usize {
        match self {
            Self::Lr => 1,
            Self::LrPerStep => num_steps,
            Self::LrPerLayer => num_groups,
            Self::LrPerLayerPerStep => num_steps * num_groups,
        }
    }

    /// Returns the index of the rate used on step `t` by group `g`.
    pub fn index(self, t: usize, g: usize, num_groups: usize) -> usize {
        match self {
            Self::Lr => 0,
            Self::LrPerStep => t,
            Self::LrPerLayer => g,
            Self::LrPerLayerPerStep => t * num_groups + g,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lr => "lr",
            Self::LrPerStep => "lr_per_step",
            Self::LrPerLayer => "lr_per_layer",
            Self::LrPerLayerPerStep => "lr_per_layer_per_step",
        }
    }
}

impl FromStr for LrMode {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lr" => Ok(Self::Lr),
            "lr_per_step" => Ok(Self::LrPerStep),
            "lr_per_layer" => Ok(Self::LrPerLayer),
            "lr_per_layer_per_step" => Ok(Self::LrPerLayerPerStep),
            other => Err(MlErr::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for LrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A meta learner that only learns the learning rates of plain gradient descent.
///
/// Each of the first `num_steps` steps of an episode updates the trainable parameters of every
/// group as `params - lr * gradient`, the rate being picked by the `LrMode`.
#[derive(Debug, Clone)]
pub struct LearningRateMetaLearner {
    mode: LrMode,
    num_steps: usize,
    groups: Vec<ParamGroup>,
    learning_rates: Vec<f32>,
}

/// The record of an adaptation episode of a `LearningRateMetaLearner`.
#[derive(Debug, Clone)]
pub struct LrTape {
    grads: Vec<Detached<Array1<f32>>>,
}

impl LrTape {
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

impl LearningRateMetaLearner {
    /// Creates a new `LearningRateMetaLearner` with every rate at `INITIAL_LEARNING_RATE`.
    pub fn new<M: Model>(
        wrapper: &ModelWrapper<M>,
        num_steps: usize,
        mode: LrMode,
    ) -> Result<Self> {
        if num_steps == 0 {
            return Err(MlErr::InvalidConfig("the meta learner needs at least one step"));
        }

        let groups: Vec<_> = wrapper.trainable_param_groups().collect();
        if groups.is_empty() {
            return Err(MlErr::InvalidConfig("the wrapped model has no trainable layers"));
        }

        let learning_rates = vec![INITIAL_LEARNING_RATE; mode.num_rates(num_steps, groups.len())];
        debug!(
            mode = mode.as_str(),
            num_steps = num_steps,
            num_rates = learning_rates.len();
            "created learning rate meta learner"
        );

        Ok(Self {
            mode,
            num_steps,
            groups,
            learning_rates,
        })
    }

    /// Creates a new `LearningRateMetaLearner` with the given rates.
    ///
    /// # Returns
    /// The meta learner or an error if the amount of rates doesn't match the mode or any of
    /// them is negative or NaN.
    pub fn from_weights<M: Model>(
        wrapper: &ModelWrapper<M>,
        num_steps: usize,
        mode: LrMode,
        learning_rates: Vec<f32>,
    ) -> Result<Self> {
        let mut learner = Self::new(wrapper, num_steps, mode)?;
        check_size(
            "learning rates",
            learning_rates.len(),
            learner.learning_rates.len(),
        )?;

        let invalid = learning_rates
            .iter()
            .enumerate()
            .find(|(_, lr)| lr.is_nan() || **lr < 0.);
        if let Some((index, &value)) = invalid {
            return Err(MlErr::NegativeLearningRate { index, value });
        }

        learner.learning_rates = learning_rates;
        Ok(learner)
    }

    pub fn mode(&self) -> LrMode {
        self.mode
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn learning_rates(&self) -> &[f32] {
        &self.learning_rates
    }

    pub fn learning_rates_mut(&mut self) -> &mut [f32] {
        &mut self.learning_rates
    }

    /// Returns the rate used on step `t` by group `g`.
    pub fn learning_rate(&self, t: usize, g: usize) -> Option<f32> {
        if t >= self.num_steps || g >= self.groups.len() {
            return None;
        }

        Some(self.learning_rates[self.mode.index(t, g, self.groups.len())])
    }

    /// Projects every rate back onto the non-negative numbers.
    pub fn constrain(&mut self) {
        for lr in self.learning_rates.iter_mut() {
            *lr = lr.max(0.);
        }
    }

    /// Adapts the trainable parameters of `params` over the first `num_steps` steps of
    /// `episode`.
    ///
    /// # Returns
    /// The adapted full parameter vector and the tape needed to back propagate through the
    /// adaptation, or an error if the episode is shorter than `num_steps`.
    pub fn adapt<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        params: ArrayView1<f32>,
        episode: &Episode,
    ) -> Result<(Array1<f32>, LrTape)> {
        if episode.len() < self.num_steps {
            return Err(MlErr::NotEnoughSteps {
                got: episode.len(),
                expected: self.num_steps,
            });
        }
        self.check_wrapper(wrapper)?;

        let trainable = wrapper.get_trainable_params(params)?;
        let mut grads = Vec::with_capacity(self.num_steps);

        let (new_trainable, _, _) = rnn(
            |(t, (x, y)), mut state: Array1<f32>| {
                let (loss, grad) = wrapper.loss_and_grad(
                    params,
                    state.view(),
                    x,
                    y,
                    Reduction::ScaledSum(LOSS_SCALE),
                )?;
                debug!(step = t, loss = loss; "learning rate meta learner step");

                let grad = stop_gradient(grad);
                for (g, group) in self.groups.iter().enumerate() {
                    let lr = self.learning_rates[self.mode.index(t, g, self.groups.len())];
                    state
                        .slice_mut(s![group.range()])
                        .scaled_add(-lr, &grad.slice(s![group.range()]));
                }

                grads.push(grad);
                Ok((state.clone(), state))
            },
            episode.steps().take(self.num_steps).enumerate(),
            trainable,
        )?;

        let new_params = wrapper.merge_params(params, new_trainable.view())?;
        Ok((new_params, LrTape { grads }))
    }

    /// Back propagates `d_new_params`, the gradient of the outer loss with respect to the
    /// adapted full parameters, through a recorded adaptation.
    pub fn backward<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        tape: &LrTape,
        d_new_params: ArrayView1<f32>,
    ) -> Result<MetaGrads> {
        self.check_wrapper(wrapper)?;

        let dp = wrapper.get_trainable_params(d_new_params)?;
        let mut rate_grads = vec![0.; self.learning_rates.len()];

        // The update is linear in the params and the gradient is constant, so `dp` passes
        // through every step unchanged.
        for (t, grad) in tape.grads.iter().enumerate().rev() {
            for (g, group) in self.groups.iter().enumerate() {
                let r = group.range();
                rate_grads[self.mode.index(t, g, self.groups.len())] -=
                    dp.slice(s![r.clone()]).dot(&grad.slice(s![r]));
            }
        }

        Ok(MetaGrads {
            weights: rate_grads,
            params: wrapper.merge_params(d_new_params, dp.view())?,
        })
    }

    fn check_wrapper<M: Model>(&self, wrapper: &ModelWrapper<M>) -> Result<()> {
        if !wrapper
            .trainable_param_groups()
            .eq(self.groups.iter().copied())
        {
            return Err(MlErr::InvalidConfig(
                "the wrapper's parameter groups don't match the meta learner's",
            ));
        }

        Ok(())
    }
}
