//! Trains a digit classifier on MNIST using the library provided by `mnist_fit`
//!
//! # Usage
//! Expects the IDX training archives (`train-images-idx3-ubyte.gz`,
//! `train-labels-idx1-ubyte.gz`) in `--data-dir`. Runnable via
//! ```sh
//! cargo run --release -- -h
//! cargo run --release -- --arch cnn --epochs 5
//! ```
//!
//! Supports a logistic regression, an MLP and a small CNN, trained with SGD (optionally with
//! momentum) or Adam.

use std::{error::Error, fs, path::PathBuf};

use burn::{
    backend::{Autodiff, NdArray},
    config::Config,
    data::dataset::InMemDataset,
    module::AutodiffModule,
    optim::Optimizer,
};
use clap::Parser;

use mnist_fit::{
    config::{Arch, TrainingConfig},
    datasets::{ImageStats, NUM_CLASSES, load_mnist},
    learner::{DataBunch, Learner},
    loss::CrossEntropy,
    nn::{Classifier, CnnConfig, LogisticConfig, MlpConfig},
    optim::{Opt, OptimConfig, OptimKind},
    plot::plot_history,
    training::EpochStats,
    transform::{Normalize, TransformDataset},
};

type Backend = Autodiff<NdArray>;

#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value = "data/mnist")]
    data_dir: PathBuf,
    #[clap(short, long, default_value_t = Arch::Cnn)]
    arch: Arch,
    #[clap(long, default_value_t = OptimKind::Sgd)]
    optimizer: OptimKind,
    #[clap(short, long, default_value_t = 5)]
    epochs: usize,
    #[clap(short, long, default_value_t = 64)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 0.4)]
    lr: f64,
    #[clap(short, long, default_value_t = 0.0)]
    momentum: f64,
    #[clap(long, default_value_t = 50)]
    hidden_units: usize,
    /// Shuffling seed, drawn at random when omitted
    #[clap(short, long)]
    seed: Option<u64>,
    #[clap(short, long, default_value_t = 1)]
    num_workers: usize,
    #[clap(short, long, default_value_t = format!("output"))]
    output_dir: String,
    #[clap(long, default_value_t = false)]
    no_normalize: bool,
    #[clap(long, default_value_t = false)]
    no_plot: bool,
}

impl Args {
    fn config(&self) -> TrainingConfig {
        let optimizer = OptimConfig::new()
            .with_kind(self.optimizer)
            .with_lr(self.lr)
            .with_momentum(self.momentum);
        TrainingConfig::new(
            optimizer,
            CnnConfig::new().with_num_classes(NUM_CLASSES),
            MlpConfig::new()
                .with_hidden(self.hidden_units)
                .with_num_classes(NUM_CLASSES),
        )
        .with_arch(self.arch)
        .with_epochs(self.epochs)
        .with_batch_size(self.batch_size)
        .with_num_workers(self.num_workers)
        .with_seed(self.seed.unwrap_or_else(rand::random))
        .with_normalize(!self.no_normalize)
    }
}

fn train<M, O>(
    model: M,
    opt: Opt<O>,
    data: DataBunch<Backend>,
    epochs: usize,
) -> Result<Vec<EpochStats>, Box<dyn Error>>
where
    M: AutodiffModule<Backend> + Classifier<Backend>,
    <M as AutodiffModule<Backend>>::InnerModule: Classifier<NdArray>,
    O: Optimizer<M, Backend>,
{
    log::info!("Training {} parameters", model.num_params());
    let learner = Learner::new(model, opt, CrossEntropy, data).fit(epochs)?;
    Ok(learner.history().to_vec())
}

fn train_with_optimizer<M>(
    model: M,
    config: &TrainingConfig,
    data: DataBunch<Backend>,
) -> Result<Vec<EpochStats>, Box<dyn Error>>
where
    M: AutodiffModule<Backend> + Classifier<Backend>,
    <M as AutodiffModule<Backend>>::InnerModule: Classifier<NdArray>,
{
    match config.optimizer.kind {
        OptimKind::Sgd => train(
            model,
            config.optimizer.sgd::<Backend, M>(),
            data,
            config.epochs,
        ),
        OptimKind::Adam => train(
            model,
            config.optimizer.adam::<Backend, M>(),
            data,
            config.epochs,
        ),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config();
    log::info!("Shuffling with seed {}", config.seed);
    fs::create_dir_all(&args.output_dir)?;
    config.save(format!("{}/config.json", args.output_dir))?;

    let device = Default::default();
    let (train_items, valid_items) = load_mnist(&args.data_dir)?;
    let normalize = if config.normalize {
        let stats = ImageStats::compute(&train_items);
        log::info!(
            "Normalizing with training mean {:.4} and std {:.4}",
            stats.mean,
            stats.std
        );
        Normalize::from(stats)
    } else {
        Normalize {
            mean: 0.0,
            std: 1.0,
        }
    };
    let train_ds = TransformDataset::new(InMemDataset::new(train_items), normalize);
    let valid_ds = TransformDataset::new(InMemDataset::new(valid_items), normalize);
    let data = DataBunch::<Backend>::from_datasets(
        train_ds,
        valid_ds,
        config.loader_options(),
        &device,
        NUM_CLASSES,
    )?;

    log::info!(
        "Training a {} with {} for {} epochs",
        config.arch,
        config.optimizer.kind,
        config.epochs
    );
    let history = match config.arch {
        Arch::Logistic => train_with_optimizer(
            LogisticConfig::new()
                .with_num_classes(data.c)
                .init::<Backend>(&device),
            &config,
            data,
        )?,
        Arch::Mlp => train_with_optimizer(config.mlp.init::<Backend>(&device)?, &config, data)?,
        Arch::Cnn => train_with_optimizer(config.cnn.init::<Backend>(&device)?, &config, data)?,
    };

    if let Some(last) = history.last() {
        log::info!(
            "Final valid_loss: {:.4}, valid_accuracy: {:.2}%",
            last.valid_loss,
            last.valid_accuracy * 100.0
        );
    }
    if !args.no_plot {
        plot_history(&history, &format!("{}/losses.png", args.output_dir))?;
    }
    Ok(())
}
