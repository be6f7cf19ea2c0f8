//! Run configuration, saved next to the training artifacts

use std::fmt::{self, Display};

use burn::config::Config;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    dataloader::LoaderOptions,
    nn::{CnnConfig, MlpConfig},
    optim::OptimConfig,
};

/// Toggles between model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Arch {
    /// A single linear layer
    Logistic,
    /// One hidden layer
    Mlp,
    /// Stride 2 convolutions
    Cnn,
}

impl Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Logistic => write!(f, "logistic"),
            Arch::Mlp => write!(f, "mlp"),
            Arch::Cnn => write!(f, "cnn"),
        }
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "Arch::Cnn")]
    pub arch: Arch,
    #[config(default = 5)]
    pub epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Standardize pixels with the training set statistics
    #[config(default = true)]
    pub normalize: bool,
    pub optimizer: OptimConfig,
    pub cnn: CnnConfig,
    pub mlp: MlpConfig,
}

impl TrainingConfig {
    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            seed: Some(self.seed),
        }
    }
}
