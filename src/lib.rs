//! A minimal MNIST training loop built step by step on top of `burn`:
//! a batch level loss step, an epoch level fit loop, lambda layers, a small CNN builder,
//! dataset transforms, device bound data loaders and a `Learner` facade tying them together.

pub mod config;
pub mod dataloader;
pub mod datasets;
pub mod learner;
pub mod loss;
pub mod nn;
pub mod optim;
pub mod plot;
pub mod training;
pub mod transform;

#[cfg(test)]
#[macro_export]
macro_rules! assert_eq_float {
    ($a:expr, $b:expr) => {
        assert!((($a) - ($b)).abs() < 1e-5);
    };
}
