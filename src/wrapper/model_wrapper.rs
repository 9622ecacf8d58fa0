use std::borrow::Cow;

use log::debug;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};

use super::{ParamGroups, ParamManager, ParamTable};
use crate::{
    Result,
    arch::{
        Model, Sequential, Trace,
        loss::{Loss, LossFn},
    },
    error::check_size,
};

/// How the per-example losses of a batch are reduced to the scalar that gets differentiated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    /// The mean of the per-example losses.
    Mean,
    /// The sum of the per-example losses divided by the given constant.
    ScaledSum(f32),
}

/// Wraps a base model so that its forward pass runs with externally supplied parameters.
///
/// The weights of every layer live in one flat parameter vector, concatenated in declaration
/// order. Trainable layers may additionally read theirs from a separate trainable parameter
/// vector holding only the trainable layers' slices, which is what a meta learner updates.
#[derive(Debug, Clone)]
pub struct ModelWrapper<M = Sequential> {
    model: M,
    table: ParamTable,
}

impl<M: Model> ModelWrapper<M> {
    /// Creates a new `ModelWrapper`.
    ///
    /// # Arguments
    /// * `model` - The base model to wrap.
    ///
    /// # Returns
    /// A new `ModelWrapper` or an error if the model declares inconsistent layer metadata.
    pub fn new(model: M) -> Result<Self> {
        let sizes = model.layer_sizes();
        let trainable = model.trainable();
        check_size("layer trainable flags", trainable.len(), sizes.len())?;

        let table = ParamTable::new(sizes.into_iter().zip(trainable));
        debug!(
            num_params = table.num_params(),
            num_trainable_params = table.num_trainable_params(),
            groups = table.len();
            "wrapped model"
        );

        Ok(Self { model, table })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn table(&self) -> &ParamTable {
        &self.table
    }

    pub fn loss(&self) -> Loss {
        self.model.loss()
    }

    pub fn num_params(&self) -> usize {
        self.table.num_params()
    }

    pub fn num_trainable_params(&self) -> usize {
        self.table.num_trainable_params()
    }

    /// Yields the full parameter vector range of every weight-bearing layer.
    pub fn param_groups(&self) -> ParamGroups<'_> {
        self.table.param_groups()
    }

    /// Yields the trainable parameter vector range of every trainable layer.
    pub fn trainable_param_groups(&self) -> ParamGroups<'_> {
        self.table.trainable_param_groups()
    }

    /// Extracts the slices of the trainable layers from a full parameter vector.
    pub fn get_trainable_params(&self, full: ArrayView1<f32>) -> Result<Array1<f32>> {
        check_size("full params", full.len(), self.num_params())?;
        let mut trainable = Array1::zeros(self.num_trainable_params());

        for slot in self.table.slots() {
            if let Some(group) = slot.trainable {
                trainable
                    .slice_mut(ndarray::s![group.range()])
                    .assign(&full.slice(ndarray::s![slot.full.range()]));
            }
        }

        Ok(trainable)
    }

    /// Returns a copy of `full` with the slices of the trainable layers taken from `trainable`.
    pub fn merge_params(
        &self,
        full: ArrayView1<f32>,
        trainable: ArrayView1<f32>,
    ) -> Result<Array1<f32>> {
        check_size("full params", full.len(), self.num_params())?;
        check_size(
            "trainable params",
            trainable.len(),
            self.num_trainable_params(),
        )?;
        let mut merged = full.to_owned();

        for slot in self.table.slots() {
            if let Some(group) = slot.trainable {
                merged
                    .slice_mut(ndarray::s![slot.full.range()])
                    .assign(&trainable.slice(ndarray::s![group.range()]));
            }
        }

        Ok(merged)
    }

    /// Returns the positional features of every trainable parameter: the index of its group
    /// and its offset inside of it, both normalized to `[0, 1)`.
    ///
    /// # Returns
    /// A `(num_trainable_params, 2)` array.
    pub fn param_coordinates(&self) -> Array2<f32> {
        let ngroups = self.trainable_param_groups().count().max(1) as f32;
        let mut coordinates = Array2::zeros((self.num_trainable_params(), 2));

        for (g, group) in self.trainable_param_groups().enumerate() {
            let len = group.len() as f32;

            for (k, j) in group.range().enumerate() {
                coordinates[[j, 0]] = g as f32 / ngroups;
                coordinates[[j, 1]] = k as f32 / len;
            }
        }

        coordinates
    }

    /// Makes a forward pass through the base model with the given parameters.
    ///
    /// # Arguments
    /// * `full` - The full parameter vector, frozen layers read from it.
    /// * `trainable` - The trainable parameter vector, trainable layers read from it.
    /// * `x` - The input data.
    pub fn forward(
        &self,
        full: ArrayView1<f32>,
        trainable: ArrayView1<f32>,
        x: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let (full, trainable) = (contiguous(full), contiguous(trainable));
        let params = ParamManager::new(&self.table, &full, &trainable)?;

        Ok(self.model.forward(&params, x)?.into_output())
    }

    /// Makes a forward pass with every layer reading its parameters from `full`.
    pub fn forward_full(&self, full: ArrayView1<f32>, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let trainable = self.get_trainable_params(full)?;
        self.forward(full, trainable.view(), x)
    }

    /// Makes a forward pass per row of parameter sets, each one on its own input batch.
    ///
    /// # Arguments
    /// * `full` - A `(batch, num_params)` array of full parameter vectors.
    /// * `trainable` - A `(batch, num_trainable_params)` array of trainable parameter vectors.
    /// * `xs` - A `(batch, n, features)` array of inputs.
    ///
    /// # Returns
    /// A `(batch, n, outputs)` array of predictions.
    pub fn forward_batch(
        &self,
        full: ArrayView2<f32>,
        trainable: ArrayView2<f32>,
        xs: ArrayView3<f32>,
    ) -> Result<Array3<f32>> {
        check_size("trainable param rows", trainable.nrows(), full.nrows())?;
        check_size("input batches", xs.len_of(Axis(0)), full.nrows())?;

        let predictions = full
            .outer_iter()
            .zip(trainable.outer_iter())
            .zip(xs.outer_iter())
            .map(|((full, trainable), x)| self.forward(full, trainable, x))
            .collect::<Result<Vec<_>>>()?;

        let views: Vec<_> = predictions.iter().map(|a| a.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }

    /// Computes the reduced loss of a batch and its gradient with respect to the trainable
    /// parameters.
    ///
    /// # Returns
    /// A tuple of the loss and the gradient.
    pub fn loss_and_grad(
        &self,
        full: ArrayView1<f32>,
        trainable: ArrayView1<f32>,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        reduction: Reduction,
    ) -> Result<(f32, Array1<f32>)> {
        let (full, trainable) = (contiguous(full), contiguous(trainable));
        let params = ParamManager::new(&self.table, &full, &trainable)?;
        let trace = self.model.forward(&params, x)?;

        let loss_fn = self.loss();
        let losses = loss_fn.loss(trace.output(), y)?;
        let (loss, scale) = match reduction {
            Reduction::Mean => {
                let n = losses.len().max(1) as f32;
                (losses.sum() / n, 1. / n)
            }
            Reduction::ScaledSum(divisor) => (losses.sum() / divisor, 1. / divisor),
        };

        let d = loss_fn.loss_prime(trace.output(), y)? * scale;
        let (_, grad) = self.backprop(&params, &trace, d)?;

        Ok((loss, grad))
    }

    /// Back propagates `d`, the gradient of some loss with respect to the output of
    /// `forward(full, trainable, x)`.
    ///
    /// # Returns
    /// The gradient with respect to `full`, zero on the trainable layers' slices, and the
    /// gradient with respect to `trainable`.
    pub fn backward(
        &self,
        full: ArrayView1<f32>,
        trainable: ArrayView1<f32>,
        x: ArrayView2<f32>,
        d: Array2<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        let (full, trainable) = (contiguous(full), contiguous(trainable));
        let params = ParamManager::new(&self.table, &full, &trainable)?;
        let trace = self.model.forward(&params, x)?;
        check_size("output gradient", d.len(), trace.output().len())?;

        self.backprop(&params, &trace, d)
    }

    /// Back propagates `d` through `forward_full(full, x)`.
    ///
    /// # Returns
    /// The gradient with respect to every entry of `full`.
    pub fn backward_full(
        &self,
        full: ArrayView1<f32>,
        x: ArrayView2<f32>,
        d: Array2<f32>,
    ) -> Result<Array1<f32>> {
        let trainable = self.get_trainable_params(full)?;
        let (full_grad, trainable_grad) = self.backward(full, trainable.view(), x, d)?;

        self.merge_params(full_grad.view(), trainable_grad.view())
    }

    fn backprop(
        &self,
        params: &ParamManager<'_>,
        trace: &Trace,
        d: Array2<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        let mut full_grad = vec![0.; self.num_params()];
        let mut trainable_grad = vec![0.; self.num_trainable_params()];

        {
            let mut grads = params.back(&mut full_grad, &mut trainable_grad)?;
            self.model.backward(params, trace, d, &mut grads)?;
        }

        Ok((Array1::from(full_grad), Array1::from(trainable_grad)))
    }
}

/// Borrows the elements of a 1-D view as a slice, copying them only if they aren't contiguous.
fn contiguous(a: ArrayView1<'_, f32>) -> Cow<'_, [f32]> {
    match a.to_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(a.to_vec()),
    }
}
