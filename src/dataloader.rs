//! Data loaders bound to a device
//!
//! Batching, shuffling and worker threads are handled by `burn`'s
//! [`DataLoaderBuilder`]. [`DeviceDataLoader`] pairs the resulting loader with the device every
//! batch should live on.

use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder, batcher::Batcher},
        dataset::Dataset,
    },
    tensor::{
        ElementConversion, Int, Tensor, TensorData,
        backend::{AutodiffBackend, Backend},
    },
};
use thiserror::Error;

use crate::datasets::{IMAGE_PIXELS, MnistItem};

/// Errors for the dataloader
#[derive(Debug, Error)]
pub enum DataLoaderError {
    #[error("Batch size must be greater than zero")]
    ZeroBatchSize,
}

/// A mini batch of flattened images and their class indices
#[derive(Debug, Clone)]
pub struct MnistBatch<B: Backend> {
    /// `[batch_size, 784]`
    pub images: Tensor<B, 2>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> MnistBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            images: self.images.to_device(device),
            targets: self.targets.to_device(device),
        }
    }
}

/// Stacks [`MnistItem`]s into tensors created on `device`
#[derive(Debug, Clone)]
pub struct MnistBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> MnistBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<MnistItem, MnistBatch<B>> for MnistBatcher<B> {
    fn batch(&self, items: Vec<MnistItem>) -> MnistBatch<B> {
        let n = items.len();
        let width = items.first().map_or(IMAGE_PIXELS, |item| item.image.len());
        let pixels = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect::<Vec<f32>>();
        let targets = items
            .iter()
            .map(|item| (item.label as i64).elem::<B::IntElem>())
            .collect::<Vec<_>>();

        let images = Tensor::<B, 2>::from_data(
            TensorData::new(pixels, [n, width]).convert::<B::FloatElem>(),
            &self.device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [n]), &self.device);

        MnistBatch { images, targets }
    }
}

/// Options shared by the training and validation loaders
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub num_workers: usize,
    /// Shuffles the training set with this seed, `None` keeps dataset order
    pub seed: Option<u64>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            num_workers: 1,
            seed: Some(42),
        }
    }
}

/// A `burn` data loader whose batches are placed on a single device
#[derive(Clone)]
pub struct DeviceDataLoader<B: Backend> {
    loader: Arc<dyn DataLoader<MnistBatch<B>>>,
    device: B::Device,
}

impl<B: Backend> DeviceDataLoader<B> {
    /// Builds a loader over `dataset`, optionally shuffled with `shuffle` as the seed
    pub fn new<D>(
        dataset: D,
        batch_size: usize,
        shuffle: Option<u64>,
        num_workers: usize,
        device: B::Device,
    ) -> Result<Self, DataLoaderError>
    where
        D: Dataset<MnistItem> + 'static,
    {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        let mut builder =
            DataLoaderBuilder::new(MnistBatcher::<B>::new(device.clone())).batch_size(batch_size);
        if num_workers > 1 {
            builder = builder.num_workers(num_workers);
        }
        if let Some(seed) = shuffle {
            builder = builder.shuffle(seed);
        }
        Ok(Self::wrap(builder.build(dataset), device))
    }

    /// Wraps an existing loader
    pub fn wrap(loader: Arc<dyn DataLoader<MnistBatch<B>>>, device: B::Device) -> Self {
        Self { loader, device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Number of items (not batches) in the underlying dataset
    pub fn num_items(&self) -> usize {
        self.loader.num_items()
    }

    /// Iterates once over the dataset, reshuffling if the loader shuffles
    pub fn iter(&self) -> impl Iterator<Item = MnistBatch<B>> + '_ {
        self.loader
            .iter()
            .map(|batch| batch.to_device(&self.device))
    }
}

/// Builds the training and validation loaders
///
/// The training loader shuffles with `options.seed`. The validation loader keeps dataset order
/// and uses twice the batch size since no gradients are held for it.
pub fn get_dls<B, DT, DV>(
    train: DT,
    valid: DV,
    options: LoaderOptions,
    device: &B::Device,
) -> Result<(DeviceDataLoader<B>, DeviceDataLoader<B::InnerBackend>), DataLoaderError>
where
    B: AutodiffBackend,
    DT: Dataset<MnistItem> + 'static,
    DV: Dataset<MnistItem> + 'static,
{
    let train_dl = DeviceDataLoader::new(
        train,
        options.batch_size,
        options.seed,
        options.num_workers,
        device.clone(),
    )?;
    let valid_dl = DeviceDataLoader::new(
        valid,
        options.batch_size * 2,
        None,
        options.num_workers,
        device.clone(),
    )?;
    log::debug!(
        "Built loaders: {} training items, {} validation items",
        train_dl.num_items(),
        valid_dl.num_items()
    );
    Ok((train_dl, valid_dl))
}
