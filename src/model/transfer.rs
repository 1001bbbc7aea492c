//! Transfer-learning variant
//!
//! A ResNet-18 feature extractor followed by one linear classification layer.
//! The backbone can start from pretrained weights; either way every layer,
//! the backbone included, is updated during training.

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use crate::utils::error::{LesionError, Result};

/// 1x1 strided projection for blocks that change shape
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

/// Two 3x3 convolutions with a residual connection
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1,
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2,
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.bn.forward(down.conv.forward(input.clone())),
            None => input.clone(),
        };

        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        self.relu.forward(x + identity)
    }
}

/// ResNet-18 without its classification layer
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    maxpool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNetBackbone<B> {
    /// Width of the feature vector produced by [`Self::features`]
    pub const FEATURES: usize = 512;

    pub fn resnet18(device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([3, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // (in, out, stride) for the two blocks of each of the four stages
        let layout = [
            (64, 64, 1),
            (64, 64, 1),
            (64, 128, 2),
            (128, 128, 1),
            (128, 256, 2),
            (256, 256, 1),
            (256, 512, 2),
            (512, 512, 1),
        ];
        let blocks = layout
            .iter()
            .map(|&(i, o, s)| BasicBlock::new(i, o, s, device))
            .collect();

        Self {
            conv1,
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool,
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// Pooled features `[batch, 512]`
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(images)));
        let mut x = self.maxpool.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }

    /// Replace the weights with a record saved by `CompactRecorder`
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        let backbone = self
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .map_err(|e| {
                LesionError::Model(format!(
                    "Failed to load pretrained backbone {}: {:?}",
                    path.display(),
                    e
                ))
            })?;
        info!("Loaded pretrained backbone from {:?}", path);
        Ok(backbone)
    }
}

#[derive(Module, Debug)]
pub struct TransferModel<B: Backend> {
    pub backbone: ResNetBackbone<B>,
    pub head: Linear<B>,
}

impl<B: Backend> TransferModel<B> {
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        Self::with_backbone(ResNetBackbone::resnet18(device), num_classes, device)
    }

    pub fn with_backbone(
        backbone: ResNetBackbone<B>,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            backbone,
            head: LinearConfig::new(ResNetBackbone::<B>::FEATURES, num_classes).init(device),
        }
    }

    /// Logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.features(images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_width() {
        let device = Default::default();
        let backbone = ResNetBackbone::<TestBackend>::resnet18(&device);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(backbone.features(input).dims(), [1, 512]);
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = TransferModel::<TestBackend>::new(7, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [2, 7]);
    }

    #[test]
    fn test_pretrained_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backbone.mpk");
        let device = Default::default();

        let backbone = ResNetBackbone::<TestBackend>::resnet18(&device);
        backbone
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();

        let fresh = ResNetBackbone::<TestBackend>::resnet18(&device);
        let loaded = fresh.load_pretrained(&path, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected: Vec<f32> = backbone.features(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.features(input).into_data().to_vec().unwrap();
        // The compact record stores half precision
        for (e, a) in expected.iter().zip(actual.iter()) {
            assert!((e - a).abs() <= 0.02 * e.abs().max(1.0), "{} vs {}", e, a);
        }
    }

    #[test]
    fn test_missing_pretrained_file() {
        let device = Default::default();
        let backbone = ResNetBackbone::<TestBackend>::resnet18(&device);
        assert!(backbone
            .load_pretrained(Path::new("/nonexistent/backbone.mpk"), &device)
            .is_err());
    }
}
