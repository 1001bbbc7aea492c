//! Small convolutional network trained from scratch
//!
//! Three 3x3 convolution stages (the first two followed by 2x2 max pooling),
//! global average pooling, a 128-unit hidden layer with dropout and the
//! seven-way classification layer.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Convolution (valid padding) + ReLU, optionally followed by 2x2 max pooling
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvStage<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3]).init(device);

        let pool = with_pool.then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());

        Self {
            conv,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.conv.forward(x));

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

#[derive(Module, Debug)]
pub struct CustomCnn<B: Backend> {
    pub stage1: ConvStage<B>,
    pub stage2: ConvStage<B>,
    pub stage3: ConvStage<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub hidden: Linear<B>,
    pub relu: Relu,
    pub dropout: Dropout,
    pub output: Linear<B>,
}

impl<B: Backend> CustomCnn<B> {
    pub fn new(num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            stage1: ConvStage::new(3, 32, true, device),
            stage2: ConvStage::new(32, 32, true, device),
            stage3: ConvStage::new(32, 64, false, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden: LinearConfig::new(64, 128).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(dropout).init(),
            output: LinearConfig::new(128, num_classes).init(device),
        }
    }

    /// Logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stage1.forward(images);
        let x = self.stage2.forward(x);
        let x = self.stage3.forward(x);

        let x = self.global_pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        let x: Tensor<B, 2> = x.reshape([batch, channels]);

        let x = self.relu.forward(self.hidden.forward(x));
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }
}
