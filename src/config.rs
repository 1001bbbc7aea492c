//! Pipeline configuration
//!
//! One struct carries every setting the stages need: data locations, image and
//! batch geometry, split and rebalancing, the model and the fit loop. It is
//! read from TOML, every field has a default, and CLI flags override it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::rebalance::RebalancePlan;
use crate::model::ModelConfig;
use crate::utils::error::{LesionError, Result};
use crate::{BATCH_SIZE, DEFAULT_SEED, IMAGE_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// HAM10000 metadata table
    pub metadata_csv: PathBuf,
    /// Directory of `<image_id>.jpg` files
    pub images_dir: PathBuf,
    /// Square edge length images are resized to
    pub image_size: usize,
    pub batch_size: usize,
    /// Seed for the split, shuffles and augmentation flips
    pub seed: u64,
    /// Share of samples held out for validation
    pub validation_fraction: f64,
    /// Cap on the number of samples used after shuffling
    pub max_samples: Option<usize>,
    /// Fail early if an image listed in the metadata is missing
    pub verify_files: bool,
    /// Augment training batches
    pub augment: bool,
    pub augmentation: AugmentationConfig,
    /// Applied to the training split only
    pub rebalance: RebalancePlan,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Epochs without val_accuracy improvement before stopping
    pub patience: usize,
    pub model: ModelConfig,
    /// Root of the per-run metric logs
    pub logs_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metadata_csv: PathBuf::from("data/HAM10000_metadata.csv"),
            images_dir: PathBuf::from("data/train_data"),
            image_size: IMAGE_SIZE,
            batch_size: BATCH_SIZE,
            seed: DEFAULT_SEED,
            validation_fraction: 0.15,
            max_samples: None,
            verify_files: true,
            augment: false,
            augmentation: AugmentationConfig::default(),
            rebalance: RebalancePlan::default(),
            epochs: 50,
            learning_rate: 1e-3,
            patience: 25,
            model: ModelConfig::default(),
            logs_dir: PathBuf::from("logs"),
            models_dir: PathBuf::from("trained_models"),
        }
    }
}

impl PipelineConfig {
    /// Small, fast settings for trying the pipeline end to end
    pub fn smoke_test() -> Self {
        Self {
            image_size: 64,
            batch_size: 8,
            max_samples: Some(256),
            epochs: 2,
            patience: 2,
            ..Self::default()
        }
    }

    pub fn load_toml(path: &Path) -> Result<Self> {
        let config: Self = load_toml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_toml(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(LesionError::Config("image_size must be greater than 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(LesionError::Config("batch_size must be greater than 0".to_string()));
        }
        if self.epochs == 0 {
            return Err(LesionError::Config("epochs must be greater than 0".to_string()));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(LesionError::Config(format!(
                "validation_fraction must be in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        if self.learning_rate <= 0.0 {
            return Err(LesionError::Config("learning_rate must be positive".to_string()));
        }
        if self.max_samples == Some(0) {
            return Err(LesionError::Config("max_samples must be greater than 0".to_string()));
        }
        self.rebalance.validate()?;
        self.model.validate()?;
        Ok(())
    }
}

/// Read and parse a TOML file into any deserializable type
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        LesionError::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;

    toml::from_str(&content).map_err(|e| {
        LesionError::Config(format!("Failed to parse config {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVariant;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.image_size, 224);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.seed, 42);
        assert_eq!(config.epochs, 50);
        assert_eq!(config.rebalance.steps.len(), 7);
        assert!(!config.augment);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
batch_size = 16
augment = true

[model]
variant = "custom"
"#,
        )
        .unwrap();

        let config = PipelineConfig::load_toml(&path).unwrap();
        assert_eq!(config.batch_size, 16);
        assert!(config.augment);
        assert_eq!(config.model.variant, ModelVariant::Custom);
        assert_eq!(config.image_size, 224);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.toml");
        let config = PipelineConfig::smoke_test();

        config.save_toml(&path).unwrap();
        let loaded = PipelineConfig::load_toml(&path).unwrap();
        assert_eq!(loaded.max_samples, Some(256));
        assert_eq!(loaded.rebalance, config.rebalance);
    }

    #[test]
    fn test_validation_errors() {
        let config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            validation_fraction: 1.0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_config() {
        let err = PipelineConfig::load_toml(Path::new("/nonexistent/pipeline.toml")).unwrap_err();
        assert!(matches!(err, LesionError::Config(_)));
    }
}
