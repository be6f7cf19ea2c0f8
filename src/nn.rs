//! Components to build the MNIST classifiers
//!
//! Layers come from `burn::nn`; this module only wires them together. A [`Lambda`] wraps the
//! parameter-free reshapes needed between them so a whole network reads as a single sequence of
//! layers.

use std::fmt::{self, Display};

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Ignored, Module, ModuleDisplay},
    nn::{
        Linear, LinearConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    },
    tensor::{Shape, Tensor, backend::Backend},
};
use thiserror::Error;

use crate::datasets::{IMAGE_PIXELS, IMAGE_SIDE};

/// Errors for building a network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("A CNN needs at least one convolution layer")]
    NoConvLayers,
    #[error("Layer {layer} has zero width")]
    ZeroWidth { layer: usize },
}

/// Maps a batch of flattened images to unnormalized class scores.
/// Every model trained by [`crate::training::fit`] implements this.
pub trait Classifier<B: Backend> {
    /// `[batch_size, 784]` -> `[batch_size, n_classes]`
    fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Reshape applied by a [`Lambda`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaOp {
    /// `[n, c * h * w]` -> `[n, c, h, w]`
    Unflatten {
        channels: usize,
        height: usize,
        width: usize,
    },
    /// `[n, d1, d2, ...]` -> `[n, d1 * d2 * ...]`
    Flatten,
}

impl Display for LambdaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LambdaOp::Unflatten {
                channels,
                height,
                width,
            } => write!(f, "unflatten(-1, {channels}, {height}, {width})"),
            LambdaOp::Flatten => write!(f, "flatten(-1)"),
        }
    }
}

/// A layer without parameters that applies a fixed function to its input
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct Lambda {
    op: Ignored<LambdaOp>,
}

impl ModuleDisplay for Lambda {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("op", &self.op).optional()
    }
}

impl Lambda {
    pub fn new(op: LambdaOp) -> Self {
        Self { op: Ignored(op) }
    }

    /// Turns flattened MNIST digits back into single channel 28x28 images
    pub fn resize_mnist() -> Self {
        Self::new(LambdaOp::Unflatten {
            channels: 1,
            height: IMAGE_SIDE,
            width: IMAGE_SIDE,
        })
    }

    /// Collapses every dimension but the batch dimension
    pub fn flatten() -> Self {
        Self::new(LambdaOp::Flatten)
    }

    pub fn op(&self) -> LambdaOp {
        self.op.0
    }

    /// Applies the reshape. `D2` must match the rank the op produces.
    pub fn forward<B: Backend, const D: usize, const D2: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D2> {
        let dims = input.dims();
        let shape = match self.op.0 {
            LambdaOp::Unflatten {
                channels,
                height,
                width,
            } => vec![dims[0], channels, height, width],
            LambdaOp::Flatten => vec![dims[0], dims[1..].iter().product()],
        };
        input.reshape(Shape::from(shape))
    }
}

/// A convolution followed by a ReLU
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.forward(self.conv.forward(input))
    }
}

/// Creates a `ni -> nf` convolution of size `kernel` with "same" padding, followed by a ReLU
pub fn conv2d<B: Backend>(
    ni: usize,
    nf: usize,
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> ConvBlock<B> {
    let padding = kernel / 2;
    let conv = Conv2dConfig::new([ni, nf], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .init(device);
    ConvBlock {
        conv,
        activation: Relu::new(),
    }
}

/// Configuration for [`Cnn`]
#[derive(Config, Debug)]
pub struct CnnConfig {
    /// Output channels of each convolution, each one halving the resolution
    #[config(default = "vec![8, 16, 32, 32]")]
    pub channels: Vec<usize>,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl CnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Cnn<B>, NNError> {
        let last = *self.channels.last().ok_or(NNError::NoConvLayers)?;
        if let Some(layer) = self.channels.iter().position(|&c| c == 0) {
            return Err(NNError::ZeroWidth { layer });
        }
        let mut ni = 1;
        let mut convs = Vec::with_capacity(self.channels.len());
        for (i, &nf) in self.channels.iter().enumerate() {
            // a wider receptive field for the raw pixels
            let kernel = if i == 0 { 5 } else { 3 };
            convs.push(conv2d(ni, nf, kernel, 2, device));
            ni = nf;
        }
        Ok(Cnn {
            resize: Lambda::resize_mnist(),
            convs,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            flatten: Lambda::flatten(),
            head: LinearConfig::new(last, self.num_classes).init(device),
        })
    }
}

/// Stride 2 convolutions, global average pooling and a linear head
#[derive(Module, Debug)]
pub struct Cnn<B: Backend> {
    resize: Lambda,
    convs: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    flatten: Lambda,
    head: Linear<B>,
}

impl<B: Backend> Classifier<B> for Cnn<B> {
    fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x: Tensor<B, 4> = self.resize.forward(images);
        for conv in &self.convs {
            x = conv.forward(x);
        }
        let x = self.pool.forward(x);
        let x: Tensor<B, 2> = self.flatten.forward(x);
        self.head.forward(x)
    }
}

/// Configuration for [`Logistic`]
#[derive(Config, Debug)]
pub struct LogisticConfig {
    #[config(default = 10)]
    pub num_classes: usize,
}

impl LogisticConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Logistic<B> {
        Logistic {
            linear: LinearConfig::new(IMAGE_PIXELS, self.num_classes).init(device),
        }
    }
}

/// Multinomial logistic regression on raw pixels
#[derive(Module, Debug)]
pub struct Logistic<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> Classifier<B> for Logistic<B> {
    fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(images)
    }
}

/// Configuration for [`Mlp`]
#[derive(Config, Debug)]
pub struct MlpConfig {
    #[config(default = 50)]
    pub hidden: usize,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Mlp<B>, NNError> {
        if self.hidden == 0 {
            return Err(NNError::ZeroWidth { layer: 0 });
        }
        Ok(Mlp {
            hidden: LinearConfig::new(IMAGE_PIXELS, self.hidden).init(device),
            activation: Relu::new(),
            output: LinearConfig::new(self.hidden, self.num_classes).init(device),
        })
    }
}

/// A NN with one hidden layer
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    hidden: Linear<B>,
    activation: Relu,
    output: Linear<B>,
}

impl<B: Backend> Classifier<B> for Mlp<B> {
    fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.hidden.forward(images));
        self.output.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use crate::{dataloader::tests::TestBackend, datasets::NUM_CLASSES};

    use super::*;

    fn images(n: usize) -> Tensor<TestBackend, 2> {
        Tensor::random([n, IMAGE_PIXELS], Distribution::Default, &Default::default())
    }

    #[test]
    fn test_lambda_resize_and_flatten() {
        let resize = Lambda::resize_mnist();
        let x: Tensor<TestBackend, 4> = resize.forward(images(3));
        assert_eq!(x.dims(), [3, 1, IMAGE_SIDE, IMAGE_SIDE]);

        let flatten = Lambda::flatten();
        let y: Tensor<TestBackend, 2> = flatten.forward(x.clone());
        assert_eq!(y.dims(), [3, IMAGE_PIXELS]);
        assert_eq!(flatten.op(), LambdaOp::Flatten);
        assert_eq!(format!("{}", resize.op()), "unflatten(-1, 1, 28, 28)");
    }

    #[test]
    fn test_lambda_has_no_params() {
        let lambda = Lambda::flatten();
        assert_eq!(Module::<TestBackend>::num_params(&lambda), 0);
    }

    #[test]
    fn test_conv2d_halves_resolution() {
        let block = conv2d::<TestBackend>(1, 8, 5, 2, &Default::default());
        let x = Tensor::<TestBackend, 4>::random(
            [2, 1, IMAGE_SIDE, IMAGE_SIDE],
            Distribution::Default,
            &Default::default(),
        );
        let y = block.forward(x);
        assert_eq!(y.dims(), [2, 8, 14, 14]);
        // relu output
        let min = y.min().into_scalar();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_cnn_forward() {
        let model = CnnConfig::new().init::<TestBackend>(&Default::default()).unwrap();
        let out = model.forward(images(4));
        assert_eq!(out.dims(), [4, NUM_CLASSES]);
    }

    #[test]
    fn test_cnn_custom_channels() {
        let config = CnnConfig::new()
            .with_channels(vec![4, 6])
            .with_num_classes(3);
        let model = config.init::<TestBackend>(&Default::default()).unwrap();
        assert_eq!(model.forward(images(2)).dims(), [2, 3]);
        // conv weights + biases + head
        let expected = (4 * 25 + 4) + (6 * 4 * 9 + 6) + (6 * 3 + 3);
        assert_eq!(model.num_params(), expected);
    }

    #[test]
    fn test_cnn_config_errors() {
        let err = CnnConfig::new()
            .with_channels(vec![])
            .init::<TestBackend>(&Default::default())
            .unwrap_err();
        assert!(matches!(err, NNError::NoConvLayers));

        let err = CnnConfig::new()
            .with_channels(vec![8, 0, 4])
            .init::<TestBackend>(&Default::default())
            .unwrap_err();
        assert!(matches!(err, NNError::ZeroWidth { layer: 1 }));
    }

    #[test]
    fn test_logistic_and_mlp() {
        let device = Default::default();
        let logistic = LogisticConfig::new().init::<TestBackend>(&device);
        assert_eq!(logistic.forward(images(2)).dims(), [2, NUM_CLASSES]);
        assert_eq!(logistic.num_params(), IMAGE_PIXELS * 10 + 10);

        let mlp = MlpConfig::new()
            .with_hidden(16)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(mlp.forward(images(5)).dims(), [5, NUM_CLASSES]);

        let err = MlpConfig::new()
            .with_hidden(0)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, NNError::ZeroWidth { layer: 0 }));
    }
}
