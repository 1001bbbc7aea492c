//! Fit loop, model persistence
//!
//! A hand-written Burn training loop: Adam, cross-entropy over the class
//! targets, one optimizer step per batch and a full validation pass on the
//! inner backend after every epoch.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use super::history::TrainingHistory;
use super::observers::{EpochSummary, ObserverSignal, TrainingObserver};
use crate::config::PipelineConfig;
use crate::dataset::{create_batches, BatchMode, SampleSet};
use crate::model::{LesionClassifier, ModelConfig};
use crate::utils::error::{LesionError, Result};
use crate::utils::metrics::{AccuracyTracker, RunningAverage};
use crate::utils::TrainingLogger;

/// Result of [`train_model`]: the final weights and the per-epoch history
pub struct TrainedModel<B: Backend> {
    pub model: LesionClassifier<B>,
    pub history: TrainingHistory,
}

/// Mean loss and accuracy of one pass
#[derive(Debug, Clone, Copy, Default)]
struct PassMetrics {
    loss: f64,
    accuracy: f64,
}

/// Train a freshly built `config.model` on `train_set`, validating on `val_set`.
///
/// Runs at most `config.epochs` epochs; any observer may end the run early.
/// The weights of the last epoch are returned.
pub fn train_model<B: AutodiffBackend>(
    config: &PipelineConfig,
    train_set: &SampleSet,
    val_set: &SampleSet,
    device: &B::Device,
    observers: &mut [Box<dyn TrainingObserver>],
) -> Result<TrainedModel<B>> {
    config.validate()?;
    if train_set.is_empty() {
        return Err(LesionError::Training("training set is empty".to_string()));
    }

    let model = config.model.init::<B>(device)?;
    fit(config, model, train_set, val_set, device, observers)
}

/// Continue training an existing model
pub fn fit<B: AutodiffBackend>(
    config: &PipelineConfig,
    mut model: LesionClassifier<B>,
    train_set: &SampleSet,
    val_set: &SampleSet,
    device: &B::Device,
    observers: &mut [Box<dyn TrainingObserver>],
) -> Result<TrainedModel<B>> {
    info!(
        "Training {} model on {} samples, validating on {} ({} epochs, lr {})",
        model.variant(),
        train_set.len(),
        val_set.len(),
        config.epochs,
        config.learning_rate
    );

    let mut optimizer = AdamConfig::new().init();
    let mut history = TrainingHistory::new(model.variant());
    let mut logger = TrainingLogger::new(config.epochs);
    let mut best_val_accuracy: Option<f64> = None;

    for observer in observers.iter_mut() {
        observer.on_train_begin(config)?;
    }

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);

        let batches = create_batches::<B>(
            train_set,
            BatchMode::Training {
                seed: config.seed.wrapping_add(epoch as u64),
            },
            config,
            device,
        );
        let progress = batch_progress(batches.len() as u64);

        let mut loss_avg = RunningAverage::new();
        let mut accuracy = AccuracyTracker::new();

        for batch in batches {
            let batch = batch?;
            let batch_size = batch.targets.dims()[0];

            let logits = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            loss_avg.add_weighted(loss_value, batch_size);
            accuracy.add_counts(count_correct(logits, batch.targets), batch_size);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);

            progress.set_message(format!("loss {:.4}", loss_value));
            progress.inc(1);
        }
        progress.finish_and_clear();

        let train = PassMetrics {
            loss: loss_avg.average(),
            accuracy: accuracy.accuracy(),
        };
        let val = validate(&model.valid(), val_set, config, device)?;

        let duration_secs = logger.end_epoch(train.loss, train.accuracy, val.loss, val.accuracy);
        if best_val_accuracy.map_or(true, |best| val.accuracy > best) {
            best_val_accuracy = Some(val.accuracy);
            logger.log_new_best(val.accuracy);
        }

        let summary = EpochSummary {
            epoch: epoch + 1,
            train_loss: train.loss,
            train_accuracy: train.accuracy,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
            duration_secs,
        };

        let mut stop = false;
        for observer in observers.iter_mut() {
            if observer.on_epoch_end(&summary)? == ObserverSignal::Stop {
                stop = true;
            }
        }
        history.push(summary);

        if stop {
            history.stopped_early = true;
            logger.log_early_stop();
            break;
        }
    }

    for observer in observers.iter_mut() {
        observer.on_train_end(&history)?;
    }
    logger.log_complete(history.len(), history.best_val_accuracy());

    Ok(TrainedModel { model, history })
}

/// Loss and accuracy over a whole labeled set, in input order
fn validate<B: Backend>(
    model: &LesionClassifier<B>,
    set: &SampleSet,
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<PassMetrics> {
    let mut loss_avg = RunningAverage::new();
    let mut accuracy = AccuracyTracker::new();

    for batch in create_batches::<B>(set, BatchMode::Validation, config, device) {
        let batch = batch?;
        let batch_size = batch.targets.dims()[0];

        let logits = model.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets.clone());

        loss_avg.add_weighted(loss.into_scalar().elem(), batch_size);
        accuracy.add_counts(count_correct(logits, batch.targets), batch_size);
    }

    Ok(PassMetrics {
        loss: loss_avg.average(),
        accuracy: accuracy.accuracy(),
    })
}

/// Number of rows whose arg-max matches the target
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predicted: Tensor<B, 1, Int> = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predicted.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

fn batch_progress(len: u64) -> ProgressBar {
    let progress = ProgressBar::new(len);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress
}

/// Save weights to `dir/<%Y%m%d-%H%M%S>_<suffix>.mpk` with the model config as
/// a `.json` sidecar of the same stem. Returns the `.mpk` path.
pub fn save_model<B: Backend>(
    model: &LesionClassifier<B>,
    model_config: &ModelConfig,
    dir: &Path,
    suffix: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stem = format!("{}_{}", Local::now().format("%Y%m%d-%H%M%S"), suffix);
    let base = dir.join(&stem);

    model
        .clone()
        .save_file(base.clone(), &CompactRecorder::new())
        .map_err(|e| LesionError::Model(format!("Failed to save model: {:?}", e)))?;
    model_config.save_json(&base.with_extension("json"))?;

    let path = base.with_extension("mpk");
    info!("Model saved to: {}", path.display());
    Ok(path)
}

/// Load a model written by [`save_model`]
///
/// `path` may name the `.mpk` file or its stem; the variant comes from the
/// `.json` sidecar next to it.
pub fn load_model<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(LesionClassifier<B>, ModelConfig)> {
    let weights = path.with_extension("mpk");
    if !weights.exists() {
        return Err(LesionError::PathNotFound(weights));
    }
    let model_config = ModelConfig::load_json(&path.with_extension("json"))?;
    debug!("Loading {} model from {:?}", model_config.variant, weights);

    let model = model_config
        .skeleton::<B>(device)
        .load_file(weights, &CompactRecorder::new(), device)
        .map_err(|e| LesionError::Model(format!("Failed to load model: {:?}", e)))?;

    Ok((model, model_config))
}

/// Pipeline settings file kept next to a saved model, `<stem>.pipeline.toml`
pub fn run_config_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("pipeline.toml")
}

/// Store the settings a model was trained with next to its weights.
///
/// Evaluation and prediction read them back so they see the same split and
/// input size as training.
pub fn save_run_config(config: &PipelineConfig, model_path: &Path) -> Result<PathBuf> {
    let path = run_config_path(model_path);
    config.save_toml(&path)?;
    debug!("Pipeline settings saved to {:?}", path);
    Ok(path)
}

/// Settings stored by [`save_run_config`], or `fallback` when the model has none
pub fn load_run_config(model_path: &Path, fallback: &PipelineConfig) -> Result<PipelineConfig> {
    let path = run_config_path(model_path);
    if path.exists() {
        info!("Using pipeline settings from {}", path.display());
        PipelineConfig::load_toml(&path)
    } else {
        warn!(
            "No pipeline settings stored with {}; split and image size may differ from training",
            model_path.display()
        );
        Ok(fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVariant;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_count_correct() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 2], &device);

        assert_eq!(count_correct(logits, targets), 2);
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = ModelConfig::new(ModelVariant::Custom);
        let model = config.init::<TestBackend>(&device).unwrap();

        let path = save_model(&model, &config, dir.path(), "custom").unwrap();
        assert!(path.exists());
        assert!(path.with_extension("json").exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_custom.mpk"));

        let (loaded, loaded_config) = load_model::<TestBackend>(&path, &device).unwrap();
        assert_eq!(loaded.variant(), ModelVariant::Custom);
        assert_eq!(loaded_config, config);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_model::<TestBackend>(&dir.path().join("nope.mpk"), &Default::default());
        assert!(matches!(result, Err(LesionError::PathNotFound(_))));
    }

    #[test]
    fn test_empty_training_set_is_rejected() {
        let config = PipelineConfig {
            model: ModelConfig::new(ModelVariant::Custom),
            ..PipelineConfig::default()
        };
        let empty = SampleSet::from_samples(Vec::new());
        let result = train_model::<burn::backend::Autodiff<TestBackend>>(
            &config,
            &empty,
            &empty,
            &Default::default(),
            &mut [],
        );
        assert!(matches!(result, Err(LesionError::Training(_))));
    }

    #[test]
    fn test_run_config_travels_with_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("20240101-120000_custom.mpk");
        let config = PipelineConfig {
            image_size: 64,
            max_samples: Some(256),
            seed: 7,
            ..PipelineConfig::default()
        };

        let written = save_run_config(&config, &model_path).unwrap();
        assert_eq!(written, dir.path().join("20240101-120000_custom.pipeline.toml"));

        let loaded = load_run_config(&model_path, &PipelineConfig::default()).unwrap();
        assert_eq!(loaded.image_size, 64);
        assert_eq!(loaded.max_samples, Some(256));
        assert_eq!(loaded.seed, 7);
    }

    #[test]
    fn test_run_config_falls_back_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = PipelineConfig::smoke_test();

        let loaded = load_run_config(&dir.path().join("old_model.mpk"), &fallback).unwrap();
        assert_eq!(loaded.image_size, fallback.image_size);
        assert_eq!(loaded.max_samples, fallback.max_samples);
    }
}
