//! # Lesion Classifier
//!
//! Seven-class skin lesion classification on HAM10000 dermoscopy images,
//! built on the Burn framework.
//!
//! ## Features
//!
//! - **Metadata exploration** with console tables and SVG charts
//! - **Class rebalancing** as pure resampling over an immutable sample arena
//! - **Two model variants**: a fine-tuned ResNet-18 and a small CNN trained from scratch
//! - **Observed fit loop** with a per-run metric log and early stopping
//! - **Export** to native, web (JSON) and mobile (half precision) records
//! - **Reports**: confusion matrix, prediction CSV and SVG galleries
//!
//! ## Modules
//!
//! - `dataset`: Label vocabulary, metadata, split, rebalancing, preprocessing and batching
//! - `model`: The classifier variants and pretrained weight loading
//! - `training`: Fit loop, observers and model persistence
//! - `inference`: Predictions, evaluation and reports
//! - `export`: Deployment formats
//! - `utils`: Errors, logging, metrics and charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lesion_classifier::backend::{default_device, TrainingBackend};
//! use lesion_classifier::dataset::prepare_training_data;
//! use lesion_classifier::training::{default_observers, train_model, MetricsSink};
//! use lesion_classifier::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let data = prepare_training_data(&config)?;
//! let sink = MetricsSink::create(&config.logs_dir)?;
//! let mut observers = default_observers(sink, &config);
//! let trained = train_model::<TrainingBackend>(
//!     &config,
//!     &data.split.train,
//!     &data.split.validation,
//!     &default_device(),
//!     &mut observers,
//! )?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod export;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{Diagnosis, LabelVector, Metadata, RebalancePlan, Sample, SampleSet};
pub use export::{export_model, ExportFormat, ExportSummary};
pub use inference::{evaluate, prediction_label, EvaluationReport, Prediction};
pub use model::{LesionClassifier, ModelConfig, ModelVariant};
pub use training::{load_model, save_model, train_model, TrainedModel, TrainingHistory};
pub use utils::error::{LesionError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Number of diagnosis categories
pub const NUM_CLASSES: usize = 7;

/// Default square image edge fed to the models
pub const IMAGE_SIZE: usize = 224;

pub const BATCH_SIZE: usize = 32;

/// Default seed for shuffling, splitting and augmentation
pub const DEFAULT_SEED: u64 = 42;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
