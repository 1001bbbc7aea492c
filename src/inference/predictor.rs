//! Prediction and evaluation
//!
//! Runs a classifier over batch streams, turns softmax outputs into
//! per-image predictions and scores them against ground truth.

use std::path::{Path, PathBuf};

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use serde::Serialize;
use tracing::info;
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::dataset::{
    create_batches, create_unlabeled_batches, BatchMode, Diagnosis, ImageBatch, LesionBatch,
    SampleSet,
};
use crate::model::LesionClassifier;
use crate::utils::error::{LesionError, Result};
use crate::utils::metrics::{ConfusionMatrix, Metrics, RunningAverage};
use crate::NUM_CLASSES;

pub type Probabilities = [f32; NUM_CLASSES];

/// Batches a classifier can take images from
pub trait ImageInput<B: Backend> {
    fn into_images(self) -> Tensor<B, 4>;
}

impl<B: Backend> ImageInput<B> for LesionBatch<B> {
    fn into_images(self) -> Tensor<B, 4> {
        self.images
    }
}

impl<B: Backend> ImageInput<B> for ImageBatch<B> {
    fn into_images(self) -> Tensor<B, 4> {
        self.images
    }
}

/// Softmax outputs of every sample, in stream order
pub fn predict_probabilities<B, T, I>(
    model: &LesionClassifier<B>,
    batches: I,
) -> Result<Vec<Probabilities>>
where
    B: Backend,
    T: ImageInput<B>,
    I: IntoIterator<Item = Result<T>>,
{
    let mut all = Vec::new();
    for batch in batches {
        let probs = model.forward_softmax(batch?.into_images());
        all.extend(rows(probs)?);
    }
    Ok(all)
}

fn rows<B: Backend>(probs: Tensor<B, 2>) -> Result<Vec<Probabilities>> {
    let [_, classes] = probs.dims();
    if classes != NUM_CLASSES {
        return Err(LesionError::Inference(format!(
            "model produced {} scores per image, expected {}",
            classes, NUM_CLASSES
        )));
    }

    let flat: Vec<f32> = probs
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| LesionError::Inference(format!("{:?}", e)))?;

    Ok(flat
        .chunks_exact(NUM_CLASSES)
        .map(|row| {
            let mut p = [0.0; NUM_CLASSES];
            p.copy_from_slice(row);
            p
        })
        .collect())
}

/// Index of the highest probability, the first one on ties.
///
/// NaN ranks below every number.
pub fn argmax(probs: &[f32]) -> Option<usize> {
    probs
        .iter()
        .map(|&p| if p.is_nan() { f32::NEG_INFINITY } else { p })
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, b)) if p.total_cmp(&b).is_le() => best,
            _ => Some((i, p)),
        })
        .map(|(i, _)| i)
}

/// Class with the highest probability, ties going to the lower class index
pub fn prediction_label(probs: &[f32]) -> Result<Diagnosis> {
    let index = argmax(probs)
        .ok_or_else(|| LesionError::InvalidInput("empty probability vector".to_string()))?;
    Diagnosis::from_index(index).ok_or_else(|| {
        LesionError::InvalidInput(format!("class index {} out of range", index))
    })
}

/// Split labeled batches back into single `[3, S, S]` images with their class
pub fn unbatch<B, I>(batches: I) -> Result<Vec<(Tensor<B, 3>, Diagnosis)>>
where
    B: Backend,
    I: IntoIterator<Item = Result<LesionBatch<B>>>,
{
    let mut samples = Vec::new();
    for batch in batches {
        let batch = batch?;
        let [n, channels, height, width] = batch.images.dims();
        let targets: Vec<i64> = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| LesionError::Inference(format!("{:?}", e)))?;

        for (i, &target) in targets.iter().enumerate().take(n) {
            let image = batch
                .images
                .clone()
                .slice([i..i + 1, 0..channels, 0..height, 0..width])
                .reshape([channels, height, width]);
            let label = Diagnosis::from_index(target as usize).ok_or_else(|| {
                LesionError::Inference(format!("target {} out of range", target))
            })?;
            samples.push((image, label));
        }
    }
    Ok(samples)
}

/// One classified image
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub path: PathBuf,
    pub probabilities: Probabilities,
    pub label: Diagnosis,
    /// Known class, `None` for unlabeled images
    pub truth: Option<Diagnosis>,
}

impl Prediction {
    pub fn new(
        path: PathBuf,
        probabilities: Probabilities,
        truth: Option<Diagnosis>,
    ) -> Result<Self> {
        let label = prediction_label(&probabilities)?;
        Ok(Self {
            path,
            probabilities,
            label,
            truth,
        })
    }

    pub fn confidence(&self) -> f32 {
        self.probabilities[self.label.index()]
    }

    pub fn is_correct(&self) -> bool {
        self.truth == Some(self.label)
    }

    /// File stem, used as the image id
    pub fn image_id(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Classes sorted by descending probability
    pub fn ranked(&self) -> Vec<(Diagnosis, f32)> {
        let mut ranked: Vec<(Diagnosis, f32)> = Diagnosis::ALL
            .iter()
            .map(|d| (*d, self.probabilities[d.index()]))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Scores of a model on a labeled set
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub loss: f64,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub predictions: Vec<Prediction>,
    pub truths: Vec<Diagnosis>,
}

impl EvaluationReport {
    pub fn metrics(&self) -> Result<Metrics> {
        let predicted: Vec<usize> = self.predictions.iter().map(|p| p.label.index()).collect();
        let truths: Vec<usize> = self.truths.iter().map(|d| d.index()).collect();
        Ok(Metrics::from_predictions(&predicted, &truths)?.with_loss(self.loss))
    }

    pub fn misclassified(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.iter().filter(|p| !p.is_correct())
    }
}

/// Run `model` over a labeled set in input order
pub fn evaluate<B: Backend>(
    model: &LesionClassifier<B>,
    set: &SampleSet,
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let stream = create_batches::<B>(set, BatchMode::Validation, config, device);
    let order = stream.order().to_vec();

    let mut loss_avg = RunningAverage::new();
    let mut probabilities = Vec::with_capacity(set.len());
    let mut truths = Vec::with_capacity(set.len());

    for batch in stream {
        let batch = batch?;
        let batch_size = batch.targets.dims()[0];

        let logits = model.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets.clone());
        loss_avg.add_weighted(loss.into_scalar().elem(), batch_size);

        probabilities.extend(rows(burn::tensor::activation::softmax(logits, 1))?);
        truths.extend(target_classes(batch.targets)?);
    }

    let predictions = order
        .iter()
        .zip(probabilities)
        .zip(&truths)
        .map(|((&pos, probs), truth)| {
            let path = set.sample(pos).map(|s| s.path.clone()).unwrap_or_default();
            Prediction::new(path, probs, Some(*truth))
        })
        .collect::<Result<Vec<_>>>()?;

    let predicted: Vec<usize> = predictions.iter().map(|p| p.label.index()).collect();
    let truth_indices: Vec<usize> = truths.iter().map(|d| d.index()).collect();
    let confusion = ConfusionMatrix::from_predictions(&predicted, &truth_indices);
    let accuracy = confusion.accuracy();

    info!(
        "Evaluated {} samples: loss {:.4}, accuracy {:.2}%",
        predictions.len(),
        loss_avg.average(),
        accuracy * 100.0
    );

    Ok(EvaluationReport {
        loss: loss_avg.average(),
        accuracy,
        confusion,
        predictions,
        truths,
    })
}

fn target_classes<B: Backend>(targets: Tensor<B, 1, Int>) -> Result<Vec<Diagnosis>> {
    let values: Vec<i64> = targets
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| LesionError::Inference(format!("{:?}", e)))?;
    values
        .into_iter()
        .map(|t| {
            Diagnosis::from_index(t as usize)
                .ok_or_else(|| LesionError::Inference(format!("target {} out of range", t)))
        })
        .collect()
}

/// Classify image files, keeping their order
pub fn predict_paths<B: Backend>(
    model: &LesionClassifier<B>,
    paths: &[PathBuf],
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<Vec<Prediction>> {
    let stream = create_unlabeled_batches::<B>(paths, config, device);
    let probabilities = predict_probabilities(model, stream)?;

    paths
        .iter()
        .zip(probabilities)
        .map(|(path, probs)| Prediction::new(path.clone(), probs, None))
        .collect()
}

/// Image files under `input`, sorted; `input` may also be a single image
pub fn collect_image_paths(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.exists() {
        return Err(LesionError::PathNotFound(input.to_path_buf()));
    }
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(LesionError::InvalidInput(format!(
            "no images found in {}",
            input.display()
        )));
    }
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}
