use super::{ParamTable, param_table::Slot};
use crate::{Result, error::check_size};

/// The manager of parameters: selects, for each weight-bearing layer of the model, whether its
/// parameters come from the full parameter vector (frozen layers) or from the trainable one,
/// when traversing the layers forwards and backwards.
#[derive(Debug, Clone, Copy)]
pub struct ParamManager<'a> {
    table: &'a ParamTable,
    full: &'a [f32],
    trainable: &'a [f32],
}

impl<'a> ParamManager<'a> {
    /// Creates a new `ParamManager`.
    ///
    /// # Arguments
    /// * `table` - The index table of the model's layers.
    /// * `full` - The full parameter vector.
    /// * `trainable` - The trainable parameter vector.
    ///
    /// # Returns
    /// A new `ParamManager` instance or an error if any vector doesn't match the table.
    pub fn new(table: &'a ParamTable, full: &'a [f32], trainable: &'a [f32]) -> Result<Self> {
        check_size("full params", full.len(), table.num_params())?;
        check_size(
            "trainable params",
            trainable.len(),
            table.num_trainable_params(),
        )?;

        Ok(Self {
            table,
            full,
            trainable,
        })
    }

    pub fn table(&self) -> &'a ParamTable {
        self.table
    }

    /// Creates a new `FrontIter` parameter iterator.
    ///
    /// The returned iterator iterates the model's layers forward.
    pub fn front(&self) -> FrontIter<'a> {
        FrontIter {
            slots: self.table.slots(),
            full: self.full,
            trainable: self.trainable,
            curr: 0,
        }
    }

    /// Creates a new `BackIter` parameter iterator.
    ///
    /// The returned iterator iterates the model's layers backwards, pairing each layer's
    /// parameters with the slice of the gradient buffer they correspond to.
    ///
    /// # Arguments
    /// * `full_grad` - The gradient buffer of the full parameters, written for frozen layers.
    /// * `trainable_grad` - The gradient buffer of the trainable parameters.
    pub fn back<'g>(
        &self,
        full_grad: &'g mut [f32],
        trainable_grad: &'g mut [f32],
    ) -> Result<BackIter<'a, 'g>> {
        check_size("full grad", full_grad.len(), self.full.len())?;
        check_size("trainable grad", trainable_grad.len(), self.trainable.len())?;

        Ok(BackIter {
            slots: self.table.slots(),
            full: self.full,
            trainable: self.trainable,
            full_grad,
            trainable_grad,
            curr: 0,
        })
    }
}

/// A model's layer iterator.
///
/// This iterator iterates the weight-bearing layers of a model from the front.
#[derive(Debug, Clone)]
pub struct FrontIter<'a> {
    slots: &'a [Slot],
    full: &'a [f32],
    trainable: &'a [f32],
    curr: usize,
}

impl<'a> Iterator for FrontIter<'a> {
    type Item = &'a [f32];

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.slots.get(self.curr)?;
        let (full, trainable) = (self.full, self.trainable);
        self.curr += 1;

        let params = match slot.trainable {
            Some(group) => &trainable[group.range()],
            None => &full[slot.full.range()],
        };

        Some(params)
    }
}

/// A model's layer iterator.
///
/// This iterator iterates the weight-bearing layers of a model from the back.
#[derive(Debug)]
pub struct BackIter<'a, 'g> {
    slots: &'a [Slot],
    full: &'a [f32],
    trainable: &'a [f32],
    full_grad: &'g mut [f32],
    trainable_grad: &'g mut [f32],
    curr: usize,
}

impl<'a> BackIter<'a, '_> {
    /// Tries to yield the next layer's parameters and gradient.
    ///
    /// # Returns
    /// An option denoting if there still are more parameters and gradients.
    pub fn next(&mut self) -> Option<(&'a [f32], &mut [f32])> {
        if self.curr == self.slots.len() {
            return None;
        }

        let slot = self.slots[self.slots.len() - self.curr - 1];
        let (full, trainable) = (self.full, self.trainable);
        self.curr += 1;

        let pair = match slot.trainable {
            Some(group) => (
                &trainable[group.range()],
                &mut self.trainable_grad[group.range()],
            ),
            None => (
                &full[slot.full.range()],
                &mut self.full_grad[slot.full.range()],
            ),
        };

        Some(pair)
    }
}
