use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

use crate::{MlErr, Result, error::check_size};

/// The labelled data of one adaptation episode: a sequence of mini-batches, one per
/// adaptation step.
#[derive(Debug, Clone)]
pub struct Episode {
    feats: Vec<Array2<f32>>,
    labels: Vec<Array2<f32>>,
}

impl Episode {
    /// Creates a new `Episode`.
    ///
    /// # Arguments
    /// * `feats` - The features of every step, an `(n, features)` array each.
    /// * `labels` - The labels of every step, with as many rows as their features.
    ///
    /// # Returns
    /// A new `Episode` or an error if it has no steps or the features and labels disagree.
    pub fn new(feats: Vec<Array2<f32>>, labels: Vec<Array2<f32>>) -> Result<Self> {
        if feats.is_empty() {
            return Err(MlErr::EmptyEpisode);
        }

        check_size("episode label steps", labels.len(), feats.len())?;
        for (x, y) in feats.iter().zip(&labels) {
            check_size("episode label rows", y.nrows(), x.nrows())?;
        }

        Ok(Self { feats, labels })
    }

    /// Creates a new `Episode` by slicing `feats` and `labels` along their first (time) axis.
    pub fn from_arrays(feats: ArrayView3<f32>, labels: ArrayView3<f32>) -> Result<Self> {
        let split = |a: ArrayView3<f32>| -> Vec<Array2<f32>> {
            a.axis_iter(Axis(0)).map(|s| s.to_owned()).collect()
        };
        Self::new(split(feats), split(labels))
    }

    /// Returns the amount of adaptation steps.
    pub fn len(&self) -> usize {
        self.feats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feats.is_empty()
    }

    /// Returns the features and labels of the `t`-th step.
    pub fn step(&self, t: usize) -> Option<(ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        Some((self.feats.get(t)?.view(), self.labels.get(t)?.view()))
    }

    /// Yields the features and labels of every step in order.
    pub fn steps(&self) -> impl Iterator<Item = (ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        self.feats
            .iter()
            .zip(&self.labels)
            .map(|(x, y)| (x.view(), y.view()))
    }
}
