//! Dataset transforms
//!
//! A [`TransformDataset`] pairs a `burn` dataset with a single transform that is applied lazily
//! every time an item is fetched.

use std::marker::PhantomData;

use burn::data::dataset::Dataset;

use crate::datasets::{ImageStats, MnistItem};

/// A function applied to each item of a dataset
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, item: I) -> O;
}

impl<F, I, O> Transform<I, O> for F
where
    F: Fn(I) -> O + Send + Sync,
{
    fn apply(&self, item: I) -> O {
        self(item)
    }
}

/// A dataset whose items are passed through a transform on access
pub struct TransformDataset<D, T, I> {
    dataset: D,
    transform: T,
    input: PhantomData<fn() -> I>,
}

impl<D, T, I> TransformDataset<D, T, I>
where
    D: Dataset<I>,
{
    pub fn new(dataset: D, transform: T) -> Self {
        Self {
            dataset,
            transform,
            input: PhantomData,
        }
    }

    pub fn inner(&self) -> &D {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }
}

impl<D, T, I, O> Dataset<O> for TransformDataset<D, T, I>
where
    D: Dataset<I>,
    T: Transform<I, O>,
{
    fn get(&self, index: usize) -> Option<O> {
        self.dataset
            .get(index)
            .map(|item| self.transform.apply(item))
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

/// Standardizes pixels with a fixed mean and standard deviation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    pub mean: f32,
    pub std: f32,
}

impl From<ImageStats> for Normalize {
    fn from(stats: ImageStats) -> Self {
        Self {
            mean: stats.mean,
            std: stats.std,
        }
    }
}

impl Transform<MnistItem, MnistItem> for Normalize {
    fn apply(&self, mut item: MnistItem) -> MnistItem {
        // guard against constant images
        let std = if self.std > f32::EPSILON { self.std } else { 1.0 };
        item.image
            .iter_mut()
            .for_each(|p| *p = (*p - self.mean) / std);
        item
    }
}
