use log::{debug, trace};
use ndarray::{
    Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, linalg, s,
};
use rand::Rng;
use rayon::prelude::*;

use super::{
    Episode, MetaGrads,
    detach::{Detached, stop_gradient},
    init,
    preprocess::{preprocess, preprocess_array},
    rnn::rnn,
};
use crate::{
    MlErr, Result,
    arch::Model,
    error::check_size,
    wrapper::{ModelWrapper, ParamGroup, Reduction},
};

const NUM_COORDINATES: usize = 2;

/// Width of the per-parameter input: the coordinates plus the preprocessed gradient and loss.
pub const INPUT_DIM: usize = NUM_COORDINATES + 4;

/// An LSTM-based coordinate-wise optimizer.
///
/// Every trainable parameter is a row of a recurrent network whose weights are shared within
/// its parameter group. On each adaptation step the row reads the parameter's coordinates, its
/// preprocessed gradient and the preprocessed loss, and the new parameter becomes
/// `f * param - i * gradient`, where `f` and `i` are gates computed from the hidden state.
///
/// The weights of each group are stored contiguously in one flat vector, laid out as the
/// `(INPUT_DIM, 4 * units)` input kernel, the `(units, 4 * units)` recurrent kernel, the
/// `4 * units` bias, `W_f` (`units + 1`), `b_f`, `W_i` (`units + 1`) and `b_i`. The LSTM gates
/// are packed as input, forget, candidate and output.
#[derive(Debug, Clone)]
pub struct FullMetaLearner {
    units: usize,
    groups: Vec<ParamGroup>,
    coordinates: Array2<f32>,
    weights: Vec<f32>,
}

/// The per-parameter recurrent state of one adaptation episode.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub h: Array2<f32>,
    pub c: Array2<f32>,
    pub params: Array1<f32>,
    pub f: Array1<f32>,
    pub i: Array1<f32>,
}

impl OptimizerState {
    /// Zero hidden state, cell state and gates around the given trainable parameters.
    pub fn new(params: Array1<f32>, units: usize) -> Self {
        let n = params.len();

        Self {
            h: Array2::zeros((n, units)),
            c: Array2::zeros((n, units)),
            params,
            f: Array1::zeros(n),
            i: Array1::zeros(n),
        }
    }

    /// Gathers the state every group reached on one step.
    fn from_caches(caches: &[GroupCache]) -> Result<Self> {
        Ok(Self {
            h: concat_rows(caches.iter().map(|c| c.h.view()))?,
            c: concat_rows(caches.iter().map(|c| c.c.view()))?,
            params: concat(caches.iter().map(|c| c.params.view()))?,
            f: concat(caches.iter().map(|c| c.f.view()))?,
            i: concat(caches.iter().map(|c| c.i.view()))?,
        })
    }
}

/// Everything one group's step needs to be back propagated.
#[derive(Debug, Clone)]
pub(crate) struct GroupCache {
    inputs: Detached<Array2<f32>>,
    grad: Detached<Array1<f32>>,
    h_prev: Array2<f32>,
    c_prev: Array2<f32>,
    params_prev: Array1<f32>,
    f_prev: Array1<f32>,
    i_prev: Array1<f32>,
    in_gate: Array2<f32>,
    forget_gate: Array2<f32>,
    candidate: Array2<f32>,
    out_gate: Array2<f32>,
    c: Array2<f32>,
    h: Array2<f32>,
    f: Array1<f32>,
    i: Array1<f32>,
    params: Array1<f32>,
}

/// The record of an adaptation episode of a `FullMetaLearner`: per step, one cache per group.
#[derive(Debug, Clone)]
pub struct FullTape {
    steps: Vec<Vec<GroupCache>>,
}

impl FullTape {
    /// Returns the amount of recorded steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FullMetaLearner {
    /// Creates a new `FullMetaLearner` with freshly initialized weights.
    ///
    /// # Arguments
    /// * `wrapper` - The wrapped model whose trainable parameters will be adapted.
    /// * `units` - The hidden size of the recurrent network.
    /// * `rng` - The source of randomness for the initialization.
    pub fn new<M, R>(wrapper: &ModelWrapper<M>, units: usize, rng: &mut R) -> Result<Self>
    where
        M: Model,
        R: Rng + ?Sized,
    {
        let mut learner = Self::empty(wrapper, units)?;
        let u = units;

        for _ in 0..learner.groups.len() {
            let kernel = init::glorot_uniform(INPUT_DIM, 4 * u, rng)?;
            let recurrent = init::orthogonal(u, 4 * u, rng)?;
            let w_f = init::glorot_uniform(u + 1, 1, rng)?;
            let w_i = init::glorot_uniform(u + 1, 1, rng)?;

            let weights = &mut learner.weights;
            weights.extend(kernel.iter());
            weights.extend(recurrent.iter());
            // Unit forget bias.
            weights.extend((0..4 * u).map(|j| if (u..2 * u).contains(&j) { 1. } else { 0. }));
            weights.extend(w_f.iter());
            weights.push(1.);
            weights.extend(w_i.iter());
            weights.push(0.);
        }

        debug!(
            units = units,
            groups = learner.groups.len(),
            num_trainable_params = wrapper.num_trainable_params(),
            num_weights = learner.weights.len();
            "created full meta learner"
        );

        Ok(learner)
    }

    /// Creates a new `FullMetaLearner` with the given weights.
    pub fn from_weights<M: Model>(
        wrapper: &ModelWrapper<M>,
        units: usize,
        weights: Vec<f32>,
    ) -> Result<Self> {
        let mut learner = Self::empty(wrapper, units)?;
        check_size(
            "full meta learner weights",
            weights.len(),
            learner.groups.len() * block_size(units),
        )?;

        learner.weights = weights;
        Ok(learner)
    }

    fn empty<M: Model>(wrapper: &ModelWrapper<M>, units: usize) -> Result<Self> {
        if units == 0 {
            return Err(MlErr::InvalidConfig("the meta learner needs at least one unit"));
        }

        let groups: Vec<_> = wrapper.trainable_param_groups().collect();
        if groups.is_empty() {
            return Err(MlErr::InvalidConfig("the wrapped model has no trainable layers"));
        }

        Ok(Self {
            units,
            weights: Vec::with_capacity(groups.len() * block_size(units)),
            coordinates: wrapper.param_coordinates(),
            groups,
        })
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn num_param_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    /// Gives mutable views over the weights of the `g`-th parameter group.
    pub fn group_mut(&mut self, g: usize) -> Result<GroupWeightsMut<'_>> {
        let size = block_size(self.units);
        let ngroups = self.groups.len();
        let block = self
            .weights
            .chunks_mut(size)
            .nth(g)
            .ok_or(MlErr::SizeMismatch {
                what: "parameter group index",
                got: g,
                expected: ngroups,
            })?;

        GroupWeightsMut::split(self.units, block)
    }

    /// Adapts the trainable parameters of `params` over the steps of `episode`.
    ///
    /// # Returns
    /// The adapted full parameter vector and the tape needed to back propagate through the
    /// adaptation.
    pub fn adapt<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        params: ArrayView1<f32>,
        episode: &Episode,
    ) -> Result<(Array1<f32>, FullTape)> {
        self.check_wrapper(wrapper)?;

        let trainable = wrapper.get_trainable_params(params)?;
        let initial_state = OptimizerState::new(trainable, self.units);
        let mut steps = Vec::with_capacity(episode.len());

        let (last_output, _, _) = rnn(
            |(x, y), state| {
                let (state, caches) = self.step(wrapper, params, x, y, state, steps.len())?;
                steps.push(caches);
                Ok((state.params.clone(), state))
            },
            episode.steps(),
            initial_state,
        )?;

        let new_params = wrapper.merge_params(params, last_output.view())?;
        Ok((new_params, FullTape { steps }))
    }

    /// Back propagates `d_new_params`, the gradient of the outer loss with respect to the
    /// adapted full parameters, through a recorded adaptation.
    pub fn backward<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        tape: &FullTape,
        d_new_params: ArrayView1<f32>,
    ) -> Result<MetaGrads> {
        self.check_wrapper(wrapper)?;

        let d_trainable = wrapper.get_trainable_params(d_new_params)?;
        let size = block_size(self.units);
        let mut weight_grads = vec![0.; self.weights.len()];

        let d_initial = self
            .groups
            .par_iter()
            .enumerate()
            .zip(self.weights.par_chunks(size))
            .zip(weight_grads.par_chunks_mut(size))
            .map(|(((g, group), block), grad_block)| {
                let weights = GroupWeights::split(self.units, block)?;
                let mut grads = GroupWeightsMut::split(self.units, grad_block)?;
                let caches: Vec<_> = tape.steps.iter().map(|caches| &caches[g]).collect();
                let dp = d_trainable.slice(s![group.range()]).to_owned();

                Ok(weights.backward(&caches, dp, &mut grads))
            })
            .collect::<Result<Vec<_>>>()?;

        let views: Vec<_> = d_initial.iter().map(|a| a.view()).collect();
        let d_initial = ndarray::concatenate(Axis(0), &views)?;

        Ok(MetaGrads {
            weights: weight_grads,
            params: wrapper.merge_params(d_new_params, d_initial.view())?,
        })
    }

    fn step<M: Model>(
        &self,
        wrapper: &ModelWrapper<M>,
        full: ArrayView1<f32>,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        state: OptimizerState,
        t: usize,
    ) -> Result<(OptimizerState, Vec<GroupCache>)> {
        let (loss, grad) =
            wrapper.loss_and_grad(full, state.params.view(), x, y, Reduction::Mean)?;
        debug!(step = t, loss = loss; "full meta learner step");

        let (loss, grad) = (stop_gradient(loss), stop_gradient(grad));
        let inputs = stop_gradient(self.compute_inputs(*loss, grad.view()));
        let size = block_size(self.units);

        let caches = self
            .groups
            .par_iter()
            .zip(self.weights.par_chunks(size))
            .map(|(group, block)| {
                let weights = GroupWeights::split(self.units, block)?;
                let r = group.range();

                Ok(weights.forward(
                    stop_gradient(inputs.slice(s![r.clone(), ..]).to_owned()),
                    stop_gradient(grad.slice(s![r.clone()]).to_owned()),
                    state.h.slice(s![r.clone(), ..]),
                    state.c.slice(s![r.clone(), ..]),
                    state.params.slice(s![r.clone()]),
                    state.f.slice(s![r.clone()]),
                    state.i.slice(s![r]),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let state = OptimizerState::from_caches(&caches)?;
        trace!(step = t; "updated optimizer state");

        Ok((state, caches))
    }

    /// Builds the `(n, INPUT_DIM)` input of the recurrent network: the parameter coordinates,
    /// the preprocessed gradient and the preprocessed loss broadcast to every parameter.
    fn compute_inputs(&self, loss: f32, grad: ArrayView1<f32>) -> Array2<f32> {
        let (g0, g1) = preprocess_array(grad);
        let (l0, l1) = preprocess(loss);
        let mut inputs = Array2::zeros((grad.len(), INPUT_DIM));

        inputs
            .slice_mut(s![.., ..NUM_COORDINATES])
            .assign(&self.coordinates);
        inputs.column_mut(NUM_COORDINATES).assign(&g0);
        inputs.column_mut(NUM_COORDINATES + 1).assign(&g1);
        inputs.column_mut(NUM_COORDINATES + 2).fill(l0);
        inputs.column_mut(NUM_COORDINATES + 3).fill(l1);

        inputs
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

/// Returns the amount of weights of one parameter group.
pub(crate) fn block_size(units: usize) -> usize {
    let u = units;
    INPUT_DIM * 4 * u + u * 4 * u + 4 * u + 2 * (u + 1) + 2
}

fn concat<'a, I>(parts: I) -> Result<Array1<f32>>
where
    I: Iterator<Item = ArrayView1<'a, f32>>,
{
    let parts: Vec<_> = parts.collect();
    Ok(ndarray::concatenate(Axis(0), &parts)?)
}

fn concat_rows<'a, I>(parts: I) -> Result<Array2<f32>>
where
    I: Iterator<Item = ArrayView2<'a, f32>>,
{
    let parts: Vec<_> = parts.collect();
    Ok(ndarray::concatenate(Axis(0), &parts)?)
}

fn hard_sigmoid(z: f32) -> f32 {
    (0.2 * z + 0.5).clamp(0., 1.)
}

/// The derivative of `hard_sigmoid` given its output.
fn hard_sigmoid_prime(a: f32) -> f32 {
    if a > 0. && a < 1. { 0.2 } else { 0. }
}

fn relu_prime(a: f32) -> f32 {
    if a > 0. { 1. } else { 0. }
}

/// Read-only views over the weights of one parameter group.
struct GroupWeights<'a> {
    units: usize,
    kernel: ArrayView2<'a, f32>,
    recurrent: ArrayView2<'a, f32>,
    bias: ArrayView1<'a, f32>,
    w_f: ArrayView1<'a, f32>,
    b_f: f32,
    w_i: ArrayView1<'a, f32>,
    b_i: f32,
}

impl<'a> GroupWeights<'a> {
    fn split(units: usize, block: &'a [f32]) -> Result<Self> {
        let u = units;
        check_size("parameter group weights", block.len(), block_size(u))?;

        let (kernel, rest) = block.split_at(INPUT_DIM * 4 * u);
        let (recurrent, rest) = rest.split_at(u * 4 * u);
        let (bias, rest) = rest.split_at(4 * u);
        let (w_f, rest) = rest.split_at(u + 1);
        let (b_f, rest) = rest.split_at(1);
        let (w_i, b_i) = rest.split_at(u + 1);

        Ok(Self {
            units,
            kernel: ArrayView2::from_shape((INPUT_DIM, 4 * u), kernel)?,
            recurrent: ArrayView2::from_shape((u, 4 * u), recurrent)?,
            bias: ArrayView1::from_shape(4 * u, bias)?,
            w_f: ArrayView1::from_shape(u + 1, w_f)?,
            b_f: b_f[0],
            w_i: ArrayView1::from_shape(u + 1, w_i)?,
            b_i: b_i[0],
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn forward(
        &self,
        inputs: Detached<Array2<f32>>,
        grad: Detached<Array1<f32>>,
        h_prev: ArrayView2<f32>,
        c_prev: ArrayView2<f32>,
        params_prev: ArrayView1<f32>,
        f_prev: ArrayView1<f32>,
        i_prev: ArrayView1<f32>,
    ) -> GroupCache {
        let u = self.units;

        let mut z = inputs.dot(&self.kernel);
        linalg::general_mat_mul(1.0, &h_prev, &self.recurrent, 1.0, &mut z);
        z += &self.bias;

        let in_gate = z.slice(s![.., ..u]).mapv(hard_sigmoid);
        let forget_gate = z.slice(s![.., u..2 * u]).mapv(hard_sigmoid);
        let candidate = z.slice(s![.., 2 * u..3 * u]).mapv(f32::tanh);
        let out_gate = z.slice(s![.., 3 * u..]).mapv(hard_sigmoid);

        let c = &forget_gate * &c_prev + &in_gate * &candidate;
        let h = &out_gate * &c.mapv(f32::tanh);

        let f = Self::gate(&h, f_prev, self.w_f, self.b_f);
        let i = Self::gate(&h, i_prev, self.w_i, self.b_i);
        let params = &f * &params_prev - &i * &*grad;

        GroupCache {
            inputs,
            grad,
            h_prev: h_prev.to_owned(),
            c_prev: c_prev.to_owned(),
            params_prev: params_prev.to_owned(),
            f_prev: f_prev.to_owned(),
            i_prev: i_prev.to_owned(),
            in_gate,
            forget_gate,
            candidate,
            out_gate,
            c,
            h,
            f,
            i,
            params,
        }
    }

    /// `relu([h, prev] · w + b)`
    fn gate(h: &Array2<f32>, prev: ArrayView1<f32>, w: ArrayView1<f32>, b: f32) -> Array1<f32> {
        let u = h.ncols();
        let mut pre = h.dot(&w.slice(s![..u]));

        pre.scaled_add(w[u], &prev);
        pre.mapv_inplace(|v| (v + b).max(0.));
        pre
    }

    /// Back propagates through every step of the group, newest first, accumulating the weight
    /// gradients into `grads`.
    ///
    /// # Arguments
    /// * `caches` - The group's caches in time order.
    /// * `dp` - The gradient with respect to the group's final parameters.
    ///
    /// # Returns
    /// The gradient with respect to the group's initial parameters.
    fn backward(
        &self,
        caches: &[&GroupCache],
        mut dp: Array1<f32>,
        grads: &mut GroupWeightsMut<'_>,
    ) -> Array1<f32> {
        let u = self.units;
        let n = dp.len();

        let mut dh_next = Array2::<f32>::zeros((n, u));
        let mut dc_next = Array2::<f32>::zeros((n, u));
        let mut df_next = Array1::<f32>::zeros(n);
        let mut di_next = Array1::<f32>::zeros(n);

        for cache in caches.iter().rev() {
            // params = f * params_prev - i * grad, with grad a constant.
            let df = &df_next + &(&dp * &cache.params_prev);
            let di = &di_next - &(&dp * &*cache.grad);
            dp = &dp * &cache.f;

            let dpre_f = df * &cache.f.mapv(relu_prime);
            let dpre_i = di * &cache.i.mapv(relu_prime);

            grads
                .w_f
                .slice_mut(s![..u])
                .scaled_add(1., &cache.h.t().dot(&dpre_f));
            grads.w_f[u] += cache.f_prev.dot(&dpre_f);
            *grads.b_f += dpre_f.sum();

            grads
                .w_i
                .slice_mut(s![..u])
                .scaled_add(1., &cache.h.t().dot(&dpre_i));
            grads.w_i[u] += cache.i_prev.dot(&dpre_i);
            *grads.b_i += dpre_i.sum();

            df_next = &dpre_f * self.w_f[u];
            di_next = &dpre_i * self.w_i[u];

            let mut dh = dh_next;
            dh += &(&dpre_f.view().insert_axis(Axis(1)) * &self.w_f.slice(s![..u]));
            dh += &(&dpre_i.view().insert_axis(Axis(1)) * &self.w_i.slice(s![..u]));

            let tanh_c = cache.c.mapv(f32::tanh);
            let d_out = &dh * &tanh_c;
            let dc = dc_next + &dh * &cache.out_gate * &tanh_c.mapv(|t| 1. - t * t);
            let d_in = &dc * &cache.candidate;
            let d_candidate = &dc * &cache.in_gate;
            let d_forget = &dc * &cache.c_prev;
            dc_next = &dc * &cache.forget_gate;

            let mut dz = Array2::<f32>::zeros((n, 4 * u));
            dz.slice_mut(s![.., ..u])
                .assign(&(d_in * &cache.in_gate.mapv(hard_sigmoid_prime)));
            dz.slice_mut(s![.., u..2 * u])
                .assign(&(d_forget * &cache.forget_gate.mapv(hard_sigmoid_prime)));
            dz.slice_mut(s![.., 2 * u..3 * u])
                .assign(&(d_candidate * &cache.candidate.mapv(|g| 1. - g * g)));
            dz.slice_mut(s![.., 3 * u..])
                .assign(&(d_out * &cache.out_gate.mapv(hard_sigmoid_prime)));

            linalg::general_mat_mul(1.0, &cache.inputs.t(), &dz, 1.0, &mut grads.kernel);
            linalg::general_mat_mul(1.0, &cache.h_prev.t(), &dz, 1.0, &mut grads.recurrent);
            grads.bias.scaled_add(1., &dz.sum_axis(Axis(0)));

            dh_next = dz.dot(&self.recurrent.t());
        }

        dp
    }
}

/// Mutable views over the weights (or weight gradients) of one parameter group.
#[derive(Debug)]
pub struct GroupWeightsMut<'a> {
    pub kernel: ArrayViewMut2<'a, f32>,
    pub recurrent: ArrayViewMut2<'a, f32>,
    pub bias: ArrayViewMut1<'a, f32>,
    pub w_f: ArrayViewMut1<'a, f32>,
    pub b_f: &'a mut f32,
    pub w_i: ArrayViewMut1<'a, f32>,
    pub b_i: &'a mut f32,
}

impl<'a> GroupWeightsMut<'a> {
    fn split(units: usize, block: &'a mut [f32]) -> Result<Self> {
        let u = units;
        check_size("parameter group weights", block.len(), block_size(u))?;

        let (kernel, rest) = block.split_at_mut(INPUT_DIM * 4 * u);
        let (recurrent, rest) = rest.split_at_mut(u * 4 * u);
        let (bias, rest) = rest.split_at_mut(4 * u);
        let (w_f, rest) = rest.split_at_mut(u + 1);
        let (b_f, rest) = rest.split_at_mut(1);
        let (w_i, b_i) = rest.split_at_mut(u + 1);

        Ok(Self {
            kernel: ArrayViewMut2::from_shape((INPUT_DIM, 4 * u), kernel)?,
            recurrent: ArrayViewMut2::from_shape((u, 4 * u), recurrent)?,
            bias: ArrayViewMut1::from_shape(4 * u, bias)?,
            w_f: ArrayViewMut1::from_shape(u + 1, w_f)?,
            b_f: &mut b_f[0],
            w_i: ArrayViewMut1::from_shape(u + 1, w_i)?,
            b_i: &mut b_i[0],
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::{Sequential, layers::Layer, loss::Loss};

    fn dense_wrapper() -> ModelWrapper {
        let model = Sequential::with_trainable(
            [
                (Layer::feature_transform(2), false),
                (Layer::dense((2, 1), None), true),
            ],
            Loss::Mse,
        )
        .unwrap();
        ModelWrapper::new(model).unwrap()
    }

    fn episode(steps: usize) -> Episode {
        let feats = Array3::from_shape_fn((steps, 4, 2), |(t, i, j)| {
            ((t + 2 * i + 3 * j) % 5) as f32 / 5. - 0.4
        });
        let labels = Array3::from_shape_fn((steps, 4, 1), |(t, i, _)| (t + i) as f32 / 4.);
        Episode::from_arrays(feats.view(), labels.view()).unwrap()
    }

    fn outer_loss(
        learner: &FullMetaLearner,
        wrapper: &ModelWrapper,
        params: ArrayView1<f32>,
        episode: &Episode,
        c: &Array1<f32>,
    ) -> f32 {
        let (new_params, _) = learner.adapt(wrapper, params, episode).unwrap();
        new_params.dot(c)
    }

    impl FullMetaLearner {
        /// Reruns the updates recorded in `tape` from `trainable` with the current weights,
        /// reading the recorded inputs and gradients instead of recomputing them.
        fn replay(&self, trainable: Array1<f32>, tape: &FullTape) -> Array1<f32> {
            let size = block_size(self.units);
            let mut state = OptimizerState::new(trainable, self.units);

            for recorded in &tape.steps {
                let caches: Vec<_> = self
                    .groups
                    .iter()
                    .zip(self.weights.chunks(size))
                    .zip(recorded)
                    .map(|((group, block), cache)| {
                        let r = group.range();
                        GroupWeights::split(self.units, block).unwrap().forward(
                            cache.inputs.clone(),
                            cache.grad.clone(),
                            state.h.slice(s![r.clone(), ..]),
                            state.c.slice(s![r.clone(), ..]),
                            state.params.slice(s![r.clone()]),
                            state.f.slice(s![r.clone()]),
                            state.i.slice(s![r]),
                        )
                    })
                    .collect();
                state = OptimizerState::from_caches(&caches).unwrap();
            }

            state.params
        }
    }

    fn assert_close(numeric: f32, analytic: f32, what: &str) {
        assert!(
            (numeric - analytic).abs() < 1e-2 * (1. + analytic.abs()),
            "{what}: numeric {numeric} analytic {analytic}"
        );
    }

    #[test]
    fn weights_layout_per_group() {
        let wrapper = dense_wrapper();
        let mut rng = StdRng::seed_from_u64(3);

        let learner = FullMetaLearner::new(&wrapper, 20, &mut rng).unwrap();

        assert_eq!(learner.num_param_groups(), 1);
        assert_eq!(
            learner.weights().len(),
            6 * 80 + 20 * 80 + 80 + 21 + 1 + 21 + 1
        );
        let bias = &learner.weights()[6 * 80 + 20 * 80..6 * 80 + 20 * 80 + 80];
        assert!(bias[..20].iter().all(|&b| b == 0.));
        assert!(bias[20..40].iter().all(|&b| b == 1.));
        assert!(bias[40..].iter().all(|&b| b == 0.));
    }

    #[test]
    fn adapts_only_trainable_params() {
        let wrapper = dense_wrapper();
        let mut rng = StdRng::seed_from_u64(11);
        let learner = FullMetaLearner::new(&wrapper, 4, &mut rng).unwrap();
        let params = array![1., 1., 0., 0., 0.5, -0.5, 0.1];

        let (new_params, tape) = learner.adapt(&wrapper, params.view(), &episode(3)).unwrap();

        assert_eq!(tape.len(), 3);
        assert_eq!(new_params.len(), 7);
        assert_eq!(new_params.slice(s![..4]), params.slice(s![..4]));
        assert!(new_params.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn zero_gradient_keeps_params_with_identity_gates() {
        let model = Sequential::new([Layer::dense((2, 1), None)], Loss::Mse);
        let wrapper = ModelWrapper::new(model).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let mut learner = FullMetaLearner::new(&wrapper, 8, &mut rng).unwrap();
        {
            let group = learner.group_mut(0).unwrap();
            let (mut w_f, mut w_i) = (group.w_f, group.w_i);
            w_f.fill(0.);
            w_i.fill(0.);
        }
        // The labels are the predictions, so every gradient is zero.
        let params = array![0.5, -1., 0.25];
        let feats = Array3::from_shape_fn((3, 2, 2), |(t, i, j)| (t + i + j) as f32);
        let labels = Array3::from_shape_fn((3, 2, 1), |(t, i, _)| {
            0.5 * (t + i) as f32 - (t + i + 1) as f32 + 0.25
        });
        let episode = Episode::from_arrays(feats.view(), labels.view()).unwrap();

        let (new_params, _) = learner.adapt(&wrapper, params.view(), &episode).unwrap();

        assert_eq!(new_params, params);
    }

    #[test]
    fn mismatched_wrapper_is_rejected() {
        let wrapper = dense_wrapper();
        let other = ModelWrapper::new(Sequential::new(
            [Layer::dense((2, 2), None), Layer::lhuc(2)],
            Loss::Mse,
        ))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let learner = FullMetaLearner::new(&wrapper, 2, &mut rng).unwrap();
        let params = Array1::zeros(other.num_params());

        assert!(learner.adapt(&other, params.view(), &episode(1)).is_err());
        assert!(FullMetaLearner::from_weights(&wrapper, 2, vec![0.; 3]).is_err());
        assert!(FullMetaLearner::new(&wrapper, 0, &mut rng).is_err());
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let wrapper = dense_wrapper();
        let mut rng = StdRng::seed_from_u64(17);
        let learner = FullMetaLearner::new(&wrapper, 3, &mut rng).unwrap();
        let params = array![1., 1., 0., 0., 0.3, -0.2, 0.1];
        let episode = episode(1);
        let c = array![0., 0., 0., 0., 1., -2., 0.5];

        let (_, tape) = learner.adapt(&wrapper, params.view(), &episode).unwrap();
        let grads = learner.backward(&wrapper, &tape, c.view()).unwrap();

        let eps = 1e-3;
        for j in 0..learner.weights().len() {
            let mut plus = learner.clone();
            let mut minus = learner.clone();
            plus.weights_mut()[j] += eps;
            minus.weights_mut()[j] -= eps;

            let numeric = (outer_loss(&plus, &wrapper, params.view(), &episode, &c)
                - outer_loss(&minus, &wrapper, params.view(), &episode, &c))
                / (2. * eps);

            assert_close(numeric, grads.weights[j], &format!("weight {j}"));
        }
    }

    #[test]
    fn gradient_flows_back_through_time() {
        // With zero inputs the inner gradient is zero whatever the params, so the finite
        // differences only see the paths the backward pass differentiates.
        let model = Sequential::new([Layer::lhuc(2)], Loss::Mse);
        let wrapper = ModelWrapper::new(model).unwrap();
        let mut rng = StdRng::seed_from_u64(23);
        let learner = FullMetaLearner::new(&wrapper, 3, &mut rng).unwrap();
        let params = array![0.5, -1.];
        let episode = Episode::from_arrays(
            Array3::zeros((3, 2, 2)).view(),
            Array3::ones((3, 2, 2)).view(),
        )
        .unwrap();
        let c = array![1., 0.5];

        let (_, tape) = learner.adapt(&wrapper, params.view(), &episode).unwrap();
        let grads = learner.backward(&wrapper, &tape, c.view()).unwrap();

        let eps = 1e-3;
        for j in 0..learner.weights().len() {
            let mut plus = learner.clone();
            let mut minus = learner.clone();
            plus.weights_mut()[j] += eps;
            minus.weights_mut()[j] -= eps;

            let numeric = (outer_loss(&plus, &wrapper, params.view(), &episode, &c)
                - outer_loss(&minus, &wrapper, params.view(), &episode, &c))
                / (2. * eps);

            assert_close(numeric, grads.weights[j], &format!("weight {j}"));
        }

        for j in 0..params.len() {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[j] += eps;
            minus[j] -= eps;

            let numeric = (outer_loss(&learner, &wrapper, plus.view(), &episode, &c)
                - outer_loss(&learner, &wrapper, minus.view(), &episode, &c))
                / (2. * eps);

            assert_close(numeric, grads.params[j], &format!("param {j}"));
        }
    }

    #[test]
    fn gradient_matches_finite_differences_through_recorded_steps() {
        let wrapper = dense_wrapper();
        let mut rng = StdRng::seed_from_u64(29);
        let learner = FullMetaLearner::new(&wrapper, 3, &mut rng).unwrap();
        let params = array![1., 1., 0., 0., 0.3, -0.2, 0.1];
        let episode = episode(3);
        let c = array![0.5, -1., 0.25, 2., 1., -2., 0.5];
        let c_trainable = c.slice(s![4..]);
        let trainable = params.slice(s![4..]).to_owned();

        let (new_params, tape) = learner.adapt(&wrapper, params.view(), &episode).unwrap();
        let grads = learner.backward(&wrapper, &tape, c.view()).unwrap();

        assert_eq!(tape.len(), 3);
        for caches in &tape.steps {
            assert!(caches[0].grad.iter().any(|g| *g != 0.));
        }
        assert_eq!(learner.replay(trainable.clone(), &tape), new_params.slice(s![4..]));

        let eps = 1e-3;
        for j in 0..learner.weights().len() {
            let mut plus = learner.clone();
            let mut minus = learner.clone();
            plus.weights_mut()[j] += eps;
            minus.weights_mut()[j] -= eps;

            let numeric = (plus.replay(trainable.clone(), &tape).dot(&c_trainable)
                - minus.replay(trainable.clone(), &tape).dot(&c_trainable))
                / (2. * eps);

            assert_close(numeric, grads.weights[j], &format!("weight {j}"));
        }

        for j in 0..trainable.len() {
            let mut plus = trainable.clone();
            let mut minus = trainable.clone();
            plus[j] += eps;
            minus[j] -= eps;

            let numeric = (learner.replay(plus, &tape).dot(&c_trainable)
                - learner.replay(minus, &tape).dot(&c_trainable))
                / (2. * eps);

            assert_close(numeric, grads.params[4 + j], &format!("param {j}"));
        }
        assert_eq!(grads.params.slice(s![..4]), c.slice(s![..4]));
    }

    #[test]
    fn default_init_scales_params_by_the_forget_gate_on_zero_gradient() {
        // Zero features make every inner gradient of the lhuc amplitudes zero.
        let model = Sequential::new([Layer::lhuc(2)], Loss::Mse);
        let wrapper = ModelWrapper::new(model).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let learner = FullMetaLearner::new(&wrapper, 20, &mut rng).unwrap();
        let params = array![0.5, -1.];
        let episode = Episode::from_arrays(
            Array3::zeros((3, 2, 2)).view(),
            Array3::ones((3, 2, 2)).view(),
        )
        .unwrap();

        let (new_params, tape) = learner.adapt(&wrapper, params.view(), &episode).unwrap();

        let weights = GroupWeights::split(20, learner.weights()).unwrap();
        assert_eq!(weights.b_f, 1.);
        assert_eq!(weights.b_i, 0.);
        assert!(new_params.iter().all(|p| p.is_finite()));
        assert_ne!(new_params, params);

        for caches in &tape.steps {
            let cache = &caches[0];
            assert!(cache.grad.iter().all(|g| *g == 0.));

            let expected_f = (cache.h.dot(&weights.w_f.slice(s![..20]))
                + &cache.f_prev * weights.w_f[20])
                .mapv(|v| (v + 1.).max(0.));
            for ((f, e), (p, prev)) in cache
                .f
                .iter()
                .zip(&expected_f)
                .zip(cache.params.iter().zip(&cache.params_prev))
            {
                assert!((f - e).abs() < 1e-5, "forget gate {f} expected {e}");
                assert!((p - f * prev).abs() < 1e-5, "param {p} expected {}", f * prev);
            }
        }
    }
}
