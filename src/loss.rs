//! Loss function(s) and metrics

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{ElementConversion, Int, Tensor, backend::Backend},
};

/// A loss comparing class scores with target class indices.
///
/// Generic over the backend so the same function is used with and without autodiff.
pub trait LossFunc: Send + Sync {
    /// Returns a single element tensor holding the mean loss over the batch
    fn loss<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1>;
}

/// Cross entropy between softmax(logits) and the targets
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl LossFunc for CrossEntropy {
    fn loss<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, targets)
    }
}

/// Number of rows whose highest score is the target class
pub fn num_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = logits.argmax(1).flatten::<1>(0, 1);
    let correct = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    correct as usize
}

/// Fraction of rows whose highest score is the target class
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let n = targets.dims()[0];
    if n == 0 {
        return 0.0;
    }
    num_correct(logits, targets) as f64 / n as f64
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use crate::{assert_eq_float, dataloader::tests::TestBackend};

    use super::*;

    fn logits(values: [[f32; 3]; 2]) -> Tensor<TestBackend, 2> {
        Tensor::from_data(TensorData::from(values), &Default::default())
    }

    fn targets(values: [i64; 2]) -> Tensor<TestBackend, 1, Int> {
        Tensor::from_data(TensorData::from(values), &Default::default())
    }

    #[test]
    fn test_cross_entropy_uniform() {
        let loss = CrossEntropy.loss(logits([[0.0; 3]; 2]), targets([0, 2]));
        assert_eq!(loss.dims(), [1]);
        // -ln(1/3)
        assert_eq_float!(loss.into_scalar(), 3.0f32.ln());
    }

    #[test]
    fn test_cross_entropy_confident() {
        let good = CrossEntropy.loss(
            logits([[10.0, 0.0, 0.0], [0.0, 0.0, 10.0]]),
            targets([0, 2]),
        );
        let bad = CrossEntropy.loss(
            logits([[0.0, 10.0, 0.0], [10.0, 0.0, 0.0]]),
            targets([0, 2]),
        );
        assert!(good.into_scalar() < 0.01);
        assert!(bad.into_scalar() > 9.0);
    }

    #[test]
    fn test_accuracy() {
        let scores = logits([[0.1, 0.8, 0.1], [0.6, 0.3, 0.1]]);
        assert_eq!(num_correct(scores.clone(), targets([1, 2])), 1);
        assert_eq_float!(accuracy(scores.clone(), targets([1, 2])), 0.5);
        assert_eq_float!(accuracy(scores, targets([1, 0])), 1.0);
    }
}
