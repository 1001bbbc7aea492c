//! Burn batching for lesion images
//!
//! [`LesionBatcher`] and [`ImageBatcher`] implement Burn's `Batcher` for
//! labeled and unlabeled items. [`BatchStream`] is the lazy, pull-based
//! sequence handed to the fit loop and the predictor: every call to `next`
//! decodes exactly one batch, so peak memory stays at one batch of images
//! regardless of the size of the sample set.

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use super::augmentation::Augmenter;
use super::preprocess::Preprocessor;
use super::sample::SampleSet;
use super::{Diagnosis, LabelVector};
use crate::config::PipelineConfig;
use crate::utils::error::{LesionError, Result};

/// A preprocessed image with its label
#[derive(Clone, Debug)]
pub struct LesionItem {
    /// Flattened CHW image `[3 * S * S]`
    pub image: Vec<f32>,
    pub label: LabelVector,
    pub path: PathBuf,
}

/// A preprocessed image without a label
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub image: Vec<f32>,
    pub path: PathBuf,
}

/// Batch of labeled images
#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    /// `[batch, 3, S, S]`
    pub images: Tensor<B, 4>,
    /// One-hot labels `[batch, 7]`
    pub labels: Tensor<B, 2>,
    /// Class indices `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Batch of images for inference; carries no labels
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
}

fn images_tensor<'a, B: Backend>(
    images: impl Iterator<Item = &'a [f32]>,
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let data: Vec<f32> = images.flat_map(|img| img.iter().copied()).collect();
    Tensor::<B, 4>::from_floats(
        TensorData::new(data, [batch_size, 3, image_size, image_size]),
        device,
    )
}

#[derive(Clone, Debug)]
pub struct LesionBatcher {
    image_size: usize,
}

impl LesionBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, LesionItem, LesionBatch<B>> for LesionBatcher {
    fn batch(&self, items: Vec<LesionItem>, device: &B::Device) -> LesionBatch<B> {
        let batch_size = items.len();

        let images = images_tensor::<B>(
            items.iter().map(|item| item.image.as_slice()),
            batch_size,
            self.image_size,
            device,
        );

        let one_hot: Vec<f32> = items.iter().flat_map(|item| item.label.to_f32()).collect();
        let labels = Tensor::<B, 2>::from_floats(
            TensorData::new(one_hot, [batch_size, Diagnosis::COUNT]),
            device,
        );

        let targets_data: Vec<i64> = items
            .iter()
            .map(|item| item.label.class_index() as i64)
            .collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LesionBatch {
            images,
            labels,
            targets,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let images = images_tensor::<B>(
            items.iter().map(|item| item.image.as_slice()),
            items.len(),
            self.image_size,
            device,
        );
        ImageBatch { images }
    }
}

type LoadFn<'a, O> = Box<dyn FnMut(&[usize]) -> Result<O> + 'a>;

/// Lazy sequence of batches.
///
/// Yields `ceil(n / batch_size)` batches, the last one possibly smaller.
/// A failed image load is yielded as an `Err`.
pub struct BatchStream<'a, O> {
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    load: LoadFn<'a, O>,
}

impl<'a, O> BatchStream<'a, O> {
    fn new(order: Vec<usize>, batch_size: usize, load: LoadFn<'a, O>) -> Self {
        Self {
            order,
            batch_size: batch_size.max(1),
            cursor: 0,
            load,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.order.len()
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Positions in the source, in the order they are batched
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl<'a, O> Iterator for BatchStream<'a, O> {
    type Item = Result<O>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let positions = &self.order[self.cursor..end];
        self.cursor = end;

        debug!("Loading batch of {} images", positions.len());
        Some((self.load)(positions))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl<'a, O> ExactSizeIterator for BatchStream<'a, O> {}

/// How a labeled sample set is batched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Full-buffer shuffle with `seed`, augmentation when configured
    Training { seed: u64 },
    /// Input order, never augmented
    Validation,
}

/// Batch a labeled sample set.
pub fn create_batches<'a, B: Backend>(
    set: &'a SampleSet,
    mode: BatchMode,
    config: &PipelineConfig,
    device: &B::Device,
) -> BatchStream<'a, LesionBatch<B>> {
    let mut preprocessor = Preprocessor::new(config.image_size);
    let order: Vec<usize> = match mode {
        BatchMode::Training { seed } => {
            info!("Creating training data batches...");
            let mut order: Vec<usize> = (0..set.len()).collect();
            order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
            if config.augment {
                preprocessor = preprocessor.with_augmentation(
                    Augmenter::new(config.augmentation.clone(), config.image_size as u32),
                    seed,
                );
            }
            order
        }
        BatchMode::Validation => {
            info!("Creating validation data batches...");
            (0..set.len()).collect()
        }
    };

    let batcher = LesionBatcher::new(config.image_size);
    let device = device.clone();
    let load = move |positions: &[usize]| -> Result<LesionBatch<B>> {
        let items = positions
            .par_iter()
            .map(|&pos| -> Result<LesionItem> {
                let sample = set.get(pos).ok_or_else(|| {
                    LesionError::Dataset(format!("position {} outside sample set", pos))
                })?;
                let image = preprocessor.load(&sample.path, pos as u64)?;
                Ok(LesionItem {
                    image,
                    label: sample.label,
                    path: sample.path,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(batcher.batch(items, &device))
    };

    BatchStream::new(order, config.batch_size, Box::new(load))
}

/// Batch image files for inference, preserving order. Yields images only.
pub fn create_unlabeled_batches<'a, B: Backend>(
    paths: &'a [PathBuf],
    config: &PipelineConfig,
    device: &B::Device,
) -> BatchStream<'a, ImageBatch<B>> {
    info!("Creating test data batches...");
    let preprocessor = Preprocessor::new(config.image_size);
    let batcher = ImageBatcher::new(config.image_size);
    let device = device.clone();

    let load = move |positions: &[usize]| -> Result<ImageBatch<B>> {
        let items = positions
            .par_iter()
            .map(|&pos| -> Result<ImageItem> {
                let path = &paths[pos];
                Ok(ImageItem {
                    image: preprocessor.load(path, pos as u64)?,
                    path: path.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(batcher.batch(items, &device))
    };

    BatchStream::new((0..paths.len()).collect(), config.batch_size, Box::new(load))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::sample::Sample;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type TestBackend = NdArray;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            image_size: 8,
            batch_size: 2,
            ..PipelineConfig::default()
        }
    }

    fn write_set(dir: &Path, classes: &[Diagnosis]) -> SampleSet {
        let samples = classes
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let path = dir.join(format!("ISIC_{:07}.jpg", i));
                RgbImage::from_pixel(12, 9, Rgb([(25 * i) as u8, 60, 90]))
                    .save(&path)
                    .unwrap();
                Sample {
                    path,
                    label: LabelVector::new(*d),
                    image_id: format!("ISIC_{:07}", i),
                }
            })
            .collect();
        SampleSet::from_samples(samples)
    }

    #[test]
    fn test_batch_count_is_ceil() {
        use Diagnosis::*;
        let dir = tempfile::tempdir().unwrap();
        let set = write_set(dir.path(), &[Nv, Mel, Df, Bcc, Bkl]);
        let device = Default::default();

        let config = test_config();
        let stream = create_batches::<TestBackend>(&set, BatchMode::Validation, &config, &device);
        assert_eq!(stream.num_batches(), 3);

        let sizes: Vec<usize> = stream.map(|b| b.unwrap().images.dims()[0]).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_batch_shapes_and_labels() {
        use Diagnosis::*;
        let dir = tempfile::tempdir().unwrap();
        let set = write_set(dir.path(), &[Vasc, Akiec]);
        let device = Default::default();

        let config = test_config();
        let batch = create_batches::<TestBackend>(&set, BatchMode::Validation, &config, &device)
            .next()
            .unwrap()
            .unwrap();

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.labels.dims(), [2, 7]);
        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![6, 0]);
        let row_sums: Vec<f32> = batch.labels.sum_dim(1).into_data().to_vec().unwrap();
        assert_eq!(row_sums, vec![1.0, 1.0]);
    }

    #[test]
    fn test_training_order_is_full_shuffle() {
        let dir = tempfile::tempdir().unwrap();
        let classes: Vec<Diagnosis> = (0..10).map(|i| Diagnosis::ALL[i % 7]).collect();
        let set = write_set(dir.path(), &classes);
        let device = Default::default();
        let config = test_config();

        let training = BatchMode::Training { seed: 1 };
        let a = create_batches::<TestBackend>(&set, training, &config, &device);
        let b = create_batches::<TestBackend>(&set, training, &config, &device);
        let v = create_batches::<TestBackend>(&set, BatchMode::Validation, &config, &device);

        assert_eq!(a.order(), b.order());
        assert_eq!(v.order(), (0..10).collect::<Vec<_>>().as_slice());
        let mut sorted = a.order().to_vec();
        sorted.sort();
        assert_eq!(sorted, v.order());
    }

    #[test]
    fn test_empty_set_yields_nothing() {
        let set = SampleSet::from_samples(Vec::new());
        let device = Default::default();
        let config = test_config();
        let mut stream =
            create_batches::<TestBackend>(&set, BatchMode::Validation, &config, &device);
        assert_eq!(stream.num_batches(), 0);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_missing_image_surfaces_error() {
        let set = SampleSet::from_samples(vec![Sample {
            path: PathBuf::from("/nonexistent/ISIC_0000000.jpg"),
            label: LabelVector::new(Diagnosis::Nv),
            image_id: "ISIC_0000000".to_string(),
        }]);
        let device = Default::default();
        let config = test_config();
        let result = create_batches::<TestBackend>(&set, BatchMode::Validation, &config, &device)
            .next()
            .unwrap();
        assert!(matches!(result, Err(LesionError::ImageLoad(_, _))));
    }

    #[test]
    fn test_unlabeled_batches() {
        use Diagnosis::*;
        let dir = tempfile::tempdir().unwrap();
        let set = write_set(dir.path(), &[Nv, Nv, Nv]);
        let paths = set.paths();
        let device = Default::default();

        let batches: Vec<ImageBatch<TestBackend>> =
            create_unlabeled_batches::<TestBackend>(&paths, &test_config(), &device)
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].images.dims(), [1, 3, 8, 8]);
    }
}
