//! Training module
//!
//! This module provides:
//! - The fit loop (Adam, cross-entropy, per-epoch validation)
//! - Observers for metric logging and early stopping
//! - The per-run history and model persistence

pub mod history;
pub mod observers;
pub mod trainer;

pub use history::TrainingHistory;
pub use observers::{
    default_observers, EarlyStopping, EpochSummary, MetricsSink, ObserverSignal, TrainingObserver,
};
pub use trainer::{
    count_correct, fit, load_model, load_run_config, run_config_path, save_model, save_run_config,
    train_model, TrainedModel,
};
