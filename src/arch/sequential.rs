use ndarray::{Array2, ArrayView2};

use super::{Model, Trace, layers::Layer, loss::Loss};
use crate::{
    MlErr, Result,
    error::check_size,
    wrapper::{BackIter, ParamManager},
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the gradients of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    trainable: Vec<bool>,
    loss: Loss,
}

impl Sequential {
    /// Creates a new `Sequential` with every layer trainable.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    /// * `loss` - The loss function the model is trained with.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I, loss: Loss) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<_> = layers.into_iter().collect();

        Self {
            trainable: vec![true; layers.len()],
            layers,
            loss,
        }
    }

    /// Creates a new `Sequential` with an explicit trainable flag per layer.
    pub fn with_trainable<I>(layers: I, loss: Loss) -> Result<Self>
    where
        I: IntoIterator<Item = (Layer, bool)>,
    {
        let (layers, trainable): (Vec<_>, Vec<_>) = layers.into_iter().unzip();

        if layers.is_empty() {
            return Err(MlErr::InvalidConfig("a model needs at least one layer"));
        }

        Ok(Self {
            layers,
            trainable,
            loss,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Marks the `i`-th layer as trainable or frozen.
    pub fn set_trainable(&mut self, i: usize, trainable: bool) -> Result<()> {
        let nlayers = self.layers.len();
        let flag = self.trainable.get_mut(i).ok_or(MlErr::SizeMismatch {
            what: "layer index",
            got: i,
            expected: nlayers,
        })?;

        *flag = trainable;
        Ok(())
    }
}

impl Model for Sequential {
    fn layer_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(Layer::size).collect()
    }

    fn trainable(&self) -> Vec<bool> {
        self.trainable.clone()
    }

    fn loss(&self) -> Loss {
        self.loss
    }

    fn forward(&self, params: &ParamManager<'_>, x: ArrayView2<f32>) -> Result<Trace> {
        let mut front = params.front();
        let mut trace = Trace::new(x);

        for layer in &self.layers {
            let size = layer.size();
            let layer_params = if size == 0 {
                &[][..]
            } else {
                front.next().ok_or(MlErr::SizeMismatch {
                    what: "weight-bearing layers",
                    got: params.table().len(),
                    expected: params.table().len() + 1,
                })?
            };
            check_size("layer parameters", layer_params.len(), size)?;

            let a = layer.forward(layer_params, trace.output())?;
            trace.push(a);
        }

        Ok(trace)
    }

    fn backward(
        &self,
        params: &ParamManager<'_>,
        trace: &Trace,
        mut d: Array2<f32>,
        grads: &mut BackIter<'_, '_>,
    ) -> Result<()> {
        check_size("trace activations", trace.len(), self.layers.len() + 1)?;
        let nslots = params.table().len();

        for (i, layer) in self.layers.iter().enumerate().rev() {
            let (x, y) = trace.layer(i);

            if layer.size() == 0 {
                d = layer.backward(&[], &mut [], x, y, d)?;
                continue;
            }

            let (layer_params, grad) = grads.next().ok_or(MlErr::SizeMismatch {
                what: "weight-bearing layers",
                got: nslots,
                expected: nslots + 1,
            })?;
            check_size("layer parameters", layer_params.len(), layer.size())?;

            d = layer.backward(layer_params, grad, x, y, d)?;
        }

        Ok(())
    }
}
