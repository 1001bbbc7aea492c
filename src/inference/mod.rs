//! Inference module
//!
//! This module provides:
//! - Softmax predictions over batch streams
//! - Evaluation against labeled sets
//! - Prediction CSVs and SVG galleries

pub mod predictor;
pub mod report;

pub use predictor::{
    argmax, collect_image_paths, evaluate, predict_paths, predict_probabilities, prediction_label,
    unbatch, EvaluationReport, Prediction, Probabilities,
};
pub use report::{
    write_evaluation_report, write_prediction_gallery, write_predictions_csv,
    write_unlabeled_report,
};
