//! Optimizer(s)
//!
//! The update arithmetic lives in `burn::optim`. [`Opt`] only binds an optimizer to the learning
//! rate it steps with.

use std::fmt::{self, Display};

use burn::{
    LearningRate,
    config::Config,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig, momentum::MomentumConfig},
    tensor::backend::AutodiffBackend,
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// An optimizer together with its learning rate.
/// Analogous to a `torch.optim.Optimizer` constructed with `lr=...`
pub struct Opt<O> {
    optim: O,
    lr: LearningRate,
}

impl<O> Opt<O> {
    pub fn new(optim: O, lr: LearningRate) -> Self {
        Self { optim, lr }
    }

    pub fn lr(&self) -> LearningRate {
        self.lr
    }

    pub fn set_lr(&mut self, lr: LearningRate) {
        self.lr = lr;
    }

    /// Performs a single optimization step and returns the updated model.
    ///
    /// `grads` is consumed, so there is nothing left to zero afterwards.
    pub fn step<B, M>(&mut self, model: M, grads: GradientsParams) -> M
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        self.optim.step(self.lr, model, grads)
    }
}

/// Toggles between optimizer types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum OptimKind {
    Sgd,
    Adam,
}

impl Display for OptimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimKind::Sgd => write!(f, "sgd"),
            OptimKind::Adam => write!(f, "adam"),
        }
    }
}

/// Configuration of the optimizer used for training
#[derive(Config, Debug)]
pub struct OptimConfig {
    #[config(default = "OptimKind::Sgd")]
    pub kind: OptimKind,
    #[config(default = 0.5)]
    pub lr: f64,
    /// SGD momentum, `0.0` disables it. Ignored by Adam.
    #[config(default = 0.0)]
    pub momentum: f64,
}

impl OptimConfig {
    /// Plain (optionally momentum) SGD
    pub fn sgd<B, M>(&self) -> Opt<impl Optimizer<M, B> + use<B, M>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let momentum = (self.momentum > 0.0).then(|| {
            MomentumConfig::new()
                .with_momentum(self.momentum)
                .with_dampening(0.0)
        });
        Opt::new(SgdConfig::new().with_momentum(momentum).init(), self.lr)
    }

    pub fn adam<B, M>(&self) -> Opt<impl Optimizer<M, B> + use<B, M>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        Opt::new(AdamConfig::new().init(), self.lr)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, Tensor};

    use crate::{
        dataloader::tests::TestAutodiffBackend,
        datasets::IMAGE_PIXELS,
        nn::{Classifier, Logistic, LogisticConfig},
    };

    use super::*;

    type Model = Logistic<TestAutodiffBackend>;

    fn step_changes_outputs<O: Optimizer<Model, TestAutodiffBackend>>(mut opt: Opt<O>) {
        let device = Default::default();
        let model: Model = LogisticConfig::new().init(&device);
        let x = Tensor::<TestAutodiffBackend, 2>::random(
            [4, IMAGE_PIXELS],
            Distribution::Default,
            &device,
        );
        let before = model.forward(x.clone());
        let grads = before.clone().powf_scalar(2.0).mean().backward();
        let grads = GradientsParams::from_grads(grads, &model);
        let model = opt.step::<TestAutodiffBackend, Model>(model, grads);
        let after = model.forward(x);
        let diff = (after - before).abs().sum().into_scalar();
        assert!(diff > 0.0);
    }

    #[test]
    fn test_sgd_step() {
        let config = OptimConfig::new().with_lr(0.1);
        step_changes_outputs(config.sgd::<TestAutodiffBackend, Model>());
    }

    #[test]
    fn test_sgd_with_momentum_step() {
        let config = OptimConfig::new().with_lr(0.1).with_momentum(0.9);
        step_changes_outputs(config.sgd::<TestAutodiffBackend, Model>());
    }

    #[test]
    fn test_adam_step() {
        let config = OptimConfig::new().with_kind(OptimKind::Adam).with_lr(1e-3);
        step_changes_outputs(config.adam::<TestAutodiffBackend, Model>());
    }

    #[test]
    fn test_set_lr() {
        let mut opt = OptimConfig::new().sgd::<TestAutodiffBackend, Model>();
        assert_eq!(opt.lr(), 0.5);
        opt.set_lr(0.05);
        assert_eq!(opt.lr(), 0.05);
    }
}
