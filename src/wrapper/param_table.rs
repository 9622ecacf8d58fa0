use std::ops::Range;

/// A half-open `[start, end)` range of a parameter vector holding one layer's weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamGroup {
    pub start: usize,
    pub end: usize,
}

impl ParamGroup {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl From<(usize, usize)> for ParamGroup {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

/// Where a weight-bearing layer's parameters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub full: ParamGroup,
    pub trainable: Option<ParamGroup>,
}

/// The immutable index table mapping every weight-bearing layer to its slice of the full
/// parameter vector and, for trainable layers, of the trainable parameter vector.
///
/// It's computed once from the layer set of a model and shared by every pass over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamTable {
    slots: Vec<Slot>,
    num_params: usize,
    num_trainable_params: usize,
}

impl ParamTable {
    /// Creates a new `ParamTable`.
    ///
    /// # Arguments
    /// * `layers` - The amount of parameters and the trainable flag of every layer, in
    ///   declaration order. Layers without parameters get no slot.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = (usize, bool)>,
    {
        let mut slots = Vec::new();
        let mut num_params = 0;
        let mut num_trainable_params = 0;

        for (size, trainable) in layers.into_iter().filter(|&(size, _)| size > 0) {
            let full = ParamGroup::new(num_params, num_params + size);
            num_params += size;

            let trainable = trainable.then(|| {
                let group = ParamGroup::new(num_trainable_params, num_trainable_params + size);
                num_trainable_params += size;
                group
            });

            slots.push(Slot { full, trainable });
        }

        Self {
            slots,
            num_params,
            num_trainable_params,
        }
    }

    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn num_trainable_params(&self) -> usize {
        self.num_trainable_params
    }

    /// Returns the amount of weight-bearing layers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Yields the range of the full parameter vector of every weight-bearing layer, frozen ones
    /// included, in declaration order.
    pub fn param_groups(&self) -> ParamGroups<'_> {
        ParamGroups {
            slots: self.slots.iter(),
            trainable_only: false,
        }
    }

    /// Yields the range of the trainable parameter vector of every trainable layer, in
    /// declaration order.
    pub fn trainable_param_groups(&self) -> ParamGroups<'_> {
        ParamGroups {
            slots: self.slots.iter(),
            trainable_only: true,
        }
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

/// A lazy, finite iterator over parameter groups. `ParamTable` hands out a fresh one on every
/// call, so a pass over the groups can always be restarted.
#[derive(Debug, Clone)]
pub struct ParamGroups<'t> {
    slots: std::slice::Iter<'t, Slot>,
    trainable_only: bool,
}

impl Iterator for ParamGroups<'_> {
    type Item = ParamGroup;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.trainable_only {
            return self.slots.next().map(|slot| slot.full);
        }

        self.slots.find_map(|slot| slot.trainable)
    }
}
