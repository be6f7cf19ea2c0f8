//! A thin facade bundling a model, its optimizer, the loss and the data

use burn::{
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::Optimizer,
    tensor::backend::AutodiffBackend,
};

use crate::{
    dataloader::{DataLoaderError, DeviceDataLoader, LoaderOptions, get_dls},
    datasets::MnistItem,
    loss::LossFunc,
    nn::Classifier,
    optim::Opt,
    training::{EpochStats, FitError, fit},
};

/// The training and validation loaders of a run
pub struct DataBunch<B: AutodiffBackend> {
    pub train_dl: DeviceDataLoader<B>,
    pub valid_dl: DeviceDataLoader<B::InnerBackend>,
    /// Number of classes
    pub c: usize,
}

impl<B: AutodiffBackend> DataBunch<B> {
    pub fn new(
        train_dl: DeviceDataLoader<B>,
        valid_dl: DeviceDataLoader<B::InnerBackend>,
        c: usize,
    ) -> Self {
        Self {
            train_dl,
            valid_dl,
            c,
        }
    }

    /// Builds both loaders with [`get_dls`]
    pub fn from_datasets<DT, DV>(
        train: DT,
        valid: DV,
        options: LoaderOptions,
        device: &B::Device,
        c: usize,
    ) -> Result<Self, DataLoaderError>
    where
        DT: Dataset<MnistItem> + 'static,
        DV: Dataset<MnistItem> + 'static,
    {
        let (train_dl, valid_dl) = get_dls::<B, _, _>(train, valid, options, device)?;
        Ok(Self::new(train_dl, valid_dl, c))
    }
}

/// Binds a model, its optimizer and loss function to the data it is trained on
pub struct Learner<B: AutodiffBackend, M, O, L> {
    model: M,
    opt: Opt<O>,
    loss_func: L,
    data: DataBunch<B>,
    history: Vec<EpochStats>,
}

impl<B, M, O, L> Learner<B, M, O, L>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    <M as AutodiffModule<B>>::InnerModule: Classifier<B::InnerBackend>,
    O: Optimizer<M, B>,
    L: LossFunc,
{
    pub fn new(model: M, opt: Opt<O>, loss_func: L, data: DataBunch<B>) -> Self {
        Self {
            model,
            opt,
            loss_func,
            data,
            history: Vec::new(),
        }
    }

    /// Trains for `epochs` more epochs. Epoch numbers continue across calls.
    pub fn fit(mut self, epochs: usize) -> Result<Self, FitError> {
        if self.data.train_dl.num_items() == 0 {
            return Err(FitError::EmptyLoader { split: "training" });
        }
        if self.data.valid_dl.num_items() == 0 {
            return Err(FitError::EmptyLoader { split: "validation" });
        }
        let (model, stats) = fit(
            epochs,
            self.model,
            &self.loss_func,
            &mut self.opt,
            &self.data.train_dl,
            &self.data.valid_dl,
        )?;
        let offset = self.history.len();
        self.history.extend(stats.into_iter().map(|mut s| {
            s.epoch += offset;
            s
        }));
        self.model = model;
        Ok(self)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn opt_mut(&mut self) -> &mut Opt<O> {
        &mut self.opt
    }

    pub fn data(&self) -> &DataBunch<B> {
        &self.data
    }

    pub fn history(&self) -> &[EpochStats] {
        &self.history
    }

    /// Returns the trained model
    pub fn into_model(self) -> M {
        self.model
    }
}
