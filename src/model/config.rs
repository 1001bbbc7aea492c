//! Model selection and construction settings

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::custom::CustomCnn;
use super::pretrained::resolve_weights;
use super::transfer::{ResNetBackbone, TransferModel};
use super::LesionClassifier;
use crate::utils::error::{LesionError, Result};
use crate::NUM_CLASSES;

/// Which network a classifier is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// ResNet-18 backbone with a linear head
    Transfer,
    /// Small CNN trained from scratch
    Custom,
}

impl ModelVariant {
    /// Suffix used in saved model file names
    pub fn suffix(&self) -> &'static str {
        match self {
            ModelVariant::Transfer => "transfer",
            ModelVariant::Custom => "custom",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    pub num_classes: usize,
    /// Dropout before the output layer of the custom network
    pub dropout: f64,
    /// Backbone weights: a local `.mpk` file or an http(s) URL
    pub pretrained: Option<String>,
    /// Where downloaded weights are kept
    pub cache_dir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::Transfer,
            num_classes: NUM_CLASSES,
            dropout: 0.5,
            pretrained: None,
            cache_dir: PathBuf::from("trained_models/pretrained"),
        }
    }
}

impl ModelConfig {
    pub fn new(variant: ModelVariant) -> Self {
        Self {
            variant,
            ..Default::default()
        }
    }

    pub fn with_pretrained(mut self, reference: impl Into<String>) -> Self {
        self.pretrained = Some(reference.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes != NUM_CLASSES {
            return Err(LesionError::Config(format!(
                "num_classes must be {}, got {}",
                NUM_CLASSES, self.num_classes
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(LesionError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.variant == ModelVariant::Custom && self.pretrained.is_some() {
            warn!("Pretrained weights are ignored by the custom model");
        }
        Ok(())
    }

    /// Network with random weights, the shape saved records are loaded into
    pub fn skeleton<B: Backend>(&self, device: &B::Device) -> LesionClassifier<B> {
        match self.variant {
            ModelVariant::Custom => {
                LesionClassifier::Custom(CustomCnn::new(self.num_classes, self.dropout, device))
            }
            ModelVariant::Transfer => {
                LesionClassifier::Transfer(TransferModel::new(self.num_classes, device))
            }
        }
    }

    /// Build a freshly initialized classifier
    ///
    /// The transfer variant loads backbone weights when `pretrained` is set.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LesionClassifier<B>> {
        self.validate()?;

        match (self.variant, &self.pretrained) {
            (ModelVariant::Transfer, Some(reference)) => {
                let path = resolve_weights(reference, &self.cache_dir)?;
                let backbone = ResNetBackbone::resnet18(device).load_pretrained(&path, device)?;
                info!("Building ResNet-18 transfer model");
                Ok(LesionClassifier::Transfer(TransferModel::with_backbone(
                    backbone,
                    self.num_classes,
                    device,
                )))
            }
            (ModelVariant::Transfer, None) => {
                warn!(
                    "No pretrained weights configured, the backbone starts from random \
                     initialization"
                );
                Ok(self.skeleton(device))
            }
            (ModelVariant::Custom, _) => {
                info!("Building custom CNN (dropout {})", self.dropout);
                Ok(self.skeleton(device))
            }
        }
    }

    /// Write as pretty JSON next to saved weights
    pub fn save_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LesionError::PathNotFound(path.to_path_buf()));
        }
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.variant, ModelVariant::Transfer);
        assert_eq!(config.num_classes, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ModelConfig::new(ModelVariant::Custom);
        config.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = ModelConfig::new(ModelVariant::Custom);
        config.num_classes = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let config = ModelConfig::new(ModelVariant::Custom).with_pretrained("weights.mpk");
        config.save_json(&path).unwrap();

        assert_eq!(ModelConfig::load_json(&path).unwrap(), config);
        assert!(fs::read_to_string(&path).unwrap().contains("\"custom\""));
    }

    #[test]
    fn test_init_variants() {
        let device = Default::default();

        let custom = ModelConfig::new(ModelVariant::Custom)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(custom.variant(), ModelVariant::Custom);

        let transfer = ModelConfig::new(ModelVariant::Transfer)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(transfer.variant(), ModelVariant::Transfer);
    }

    #[test]
    fn test_init_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.mpk");
        let config =
            ModelConfig::new(ModelVariant::Transfer).with_pretrained(missing.to_string_lossy());

        assert!(config.init::<TestBackend>(&Default::default()).is_err());
    }
}
