//! Lesion classifiers
//!
//! Two interchangeable networks map a `[batch, 3, S, S]` image tensor to
//! seven class scores: a ResNet-18 transfer model and a small CNN.

pub mod config;
pub mod custom;
pub mod pretrained;
pub mod transfer;

pub use config::{ModelConfig, ModelVariant};
pub use custom::CustomCnn;
pub use pretrained::resolve_weights;
pub use transfer::{ResNetBackbone, TransferModel};

use burn::{
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};

#[derive(Module, Debug)]
pub enum LesionClassifier<B: Backend> {
    Transfer(TransferModel<B>),
    Custom(CustomCnn<B>),
}

impl<B: Backend> LesionClassifier<B> {
    /// Logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            LesionClassifier::Transfer(model) => model.forward(images),
            LesionClassifier::Custom(model) => model.forward(images),
        }
    }

    /// Class probabilities, each row sums to one
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn variant(&self) -> ModelVariant {
        match self {
            LesionClassifier::Transfer(_) => ModelVariant::Transfer,
            LesionClassifier::Custom(_) => ModelVariant::Custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = ModelConfig::new(ModelVariant::Custom)
            .init::<TestBackend>(&device)
            .unwrap();

        let images = Tensor::<TestBackend, 4>::ones([3, 3, 24, 24], &device);
        let probs: Vec<f32> = model.forward_softmax(images).into_data().to_vec().unwrap();

        assert_eq!(probs.len(), 21);
        for row in probs.chunks(7) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }
}
