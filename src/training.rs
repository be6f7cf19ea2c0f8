//! The training loop: a single batch step and the epoch level `fit`

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::{
        ElementConversion,
        backend::{AutodiffBackend, Backend},
    },
};
use thiserror::Error;

use crate::{
    dataloader::{DeviceDataLoader, MnistBatch},
    loss::{LossFunc, num_correct},
    nn::Classifier,
    optim::Opt,
};

/// Errors for the fit loop
#[derive(Debug, Error)]
pub enum FitError {
    #[error("The {split} loader yielded no batches")]
    EmptyLoader { split: &'static str },
}

/// Loss and hit count of a single batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchLoss {
    /// Mean loss over the batch
    pub loss: f64,
    pub correct: usize,
    pub size: usize,
}

/// Per epoch summary returned by [`fit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

/// Accumulates batch losses weighted by batch size
#[derive(Debug, Default, Clone, Copy)]
struct LossMeter {
    weighted_loss: f64,
    correct: usize,
    count: usize,
}

impl LossMeter {
    fn add(&mut self, batch: &BatchLoss) {
        self.weighted_loss += batch.loss * batch.size as f64;
        self.correct += batch.correct;
        self.count += batch.size;
    }

    /// `(mean loss, accuracy)`, `None` if nothing was added
    fn summary(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| {
            let n = self.count as f64;
            (self.weighted_loss / n, self.correct as f64 / n)
        })
    }
}

/// Computes the loss of `model` on one batch without updating it
pub fn loss_batch<B, M, L>(model: &M, loss_func: &L, batch: MnistBatch<B>) -> BatchLoss
where
    B: Backend,
    M: Classifier<B>,
    L: LossFunc,
{
    let size = batch.len();
    let output = model.forward(batch.images);
    let correct = num_correct(output.clone(), batch.targets.clone());
    let loss = loss_func
        .loss(output, batch.targets)
        .into_scalar()
        .elem::<f64>();
    BatchLoss {
        loss,
        correct,
        size,
    }
}

/// Computes the loss of `model` on one batch, backpropagates it and takes an optimizer step
pub fn train_batch<B, M, O, L>(
    model: M,
    loss_func: &L,
    batch: MnistBatch<B>,
    opt: &mut Opt<O>,
) -> (M, BatchLoss)
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    O: Optimizer<M, B>,
    L: LossFunc,
{
    let size = batch.len();
    let output = model.forward(batch.images);
    let correct = num_correct(output.clone(), batch.targets.clone());
    let loss = loss_func.loss(output, batch.targets);
    let value = loss.clone().into_scalar().elem::<f64>();

    let grads = GradientsParams::from_grads(loss.backward(), &model);
    let model = opt.step::<B, M>(model, grads);
    (
        model,
        BatchLoss {
            loss: value,
            correct,
            size,
        },
    )
}

/// Returns the size weighted mean loss and the accuracy of `model` over `dl`
pub fn evaluate<B, M, L>(
    model: &M,
    loss_func: &L,
    dl: &DeviceDataLoader<B>,
) -> Result<(f64, f64), FitError>
where
    B: Backend,
    M: Classifier<B>,
    L: LossFunc,
{
    let mut meter = LossMeter::default();
    for batch in dl.iter() {
        meter.add(&loss_batch(model, loss_func, batch));
    }
    meter
        .summary()
        .ok_or(FitError::EmptyLoader { split: "validation" })
}

/// Trains `model` for `epochs` epochs, evaluating on `valid_dl` after each one
///
/// Validation runs on the autodiff-free copy of the model returned by
/// [`AutodiffModule::valid`], so no graph is recorded for it.
pub fn fit<B, M, O, L>(
    epochs: usize,
    mut model: M,
    loss_func: &L,
    opt: &mut Opt<O>,
    train_dl: &DeviceDataLoader<B>,
    valid_dl: &DeviceDataLoader<B::InnerBackend>,
) -> Result<(M, Vec<EpochStats>), FitError>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    <M as AutodiffModule<B>>::InnerModule: Classifier<B::InnerBackend>,
    O: Optimizer<M, B>,
    L: LossFunc,
{
    let mut history = Vec::with_capacity(epochs);
    for epoch in 1..=epochs {
        let mut train_meter = LossMeter::default();
        for (i, batch) in train_dl.iter().enumerate() {
            let (updated, batch_loss) = train_batch(model, loss_func, batch, opt);
            model = updated;
            log::debug!("epoch: {}, batch: {}, loss: {}", epoch, i, batch_loss.loss);
            train_meter.add(&batch_loss);
        }
        let (train_loss, _) = train_meter
            .summary()
            .ok_or(FitError::EmptyLoader { split: "training" })?;

        let (valid_loss, valid_accuracy) = evaluate(&model.valid(), loss_func, valid_dl)?;
        if !valid_loss.is_finite() {
            log::warn!("Validation loss diverged in epoch {}", epoch);
        }
        log::info!(
            "epoch: {}, train_loss: {:.4}, valid_loss: {:.4}, valid_accuracy: {:.4}",
            epoch,
            train_loss,
            valid_loss,
            valid_accuracy
        );
        history.push(EpochStats {
            epoch,
            train_loss,
            valid_loss,
            valid_accuracy,
        });
    }
    Ok((model, history))
}
