//! Image preprocessing
//!
//! Path in, `[3, S, S]` CHW float tensor data in `[0, 1]` out. Any decode
//! failure is returned as [`LesionError::ImageLoad`] naming the path; callers
//! propagate it and the pipeline stops.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::augmentation::Augmenter;
use crate::utils::error::{LesionError, Result};

#[derive(Clone, Debug)]
pub struct Preprocessor {
    image_size: usize,
    augmenter: Option<Augmenter>,
    seed: u64,
}

impl Preprocessor {
    /// Resize only, no augmentation
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            augmenter: None,
            seed: 0,
        }
    }

    /// Augment before resizing; flips are seeded from `seed`
    pub fn with_augmentation(mut self, augmenter: Augmenter, seed: u64) -> Self {
        self.augmenter = Some(augmenter);
        self.seed = seed;
        self
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn is_augmenting(&self) -> bool {
        self.augmenter.is_some()
    }

    /// Number of floats in one preprocessed image
    pub fn item_len(&self) -> usize {
        3 * self.image_size * self.image_size
    }

    /// Decode, optionally augment, resize and convert to CHW.
    ///
    /// `draw` selects the flip RNG stream for this image: the same
    /// `(seed, draw)` pair always flips the same way.
    pub fn load(&self, path: &Path, draw: u64) -> Result<Vec<f32>> {
        let img = decode(path)?;
        Ok(self.process(img, draw))
    }

    pub fn process(&self, img: DynamicImage, draw: u64) -> Vec<f32> {
        let img = match &self.augmenter {
            Some(augmenter) => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                rng.set_stream(draw);
                augmenter.augment(img, &mut rng)
            }
            None => img,
        };

        let size = self.image_size as u32;
        let rgb = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();
        to_chw(&rgb)
    }
}

/// Open and decode an image, guessing the format from its content
pub fn decode(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| LesionError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| LesionError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| LesionError::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// HWC `u8` to planar CHW `f32` in `[0, 1]`
fn to_chw(img: &image::RgbImage) -> Vec<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use image::{Rgb, RgbImage};

    fn write_jpeg(dir: &Path, name: &str, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(w, h, Rgb([200, 100, 50])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_fixed_output_size_for_any_input() {
        let dir = tempfile::tempdir().unwrap();
        let pre = Preprocessor::new(16);

        for (i, (w, h)) in [(600, 450), (10, 10), (7, 31)].iter().enumerate() {
            let path = write_jpeg(dir.path(), &format!("{}.jpg", i), *w, *h);
            let data = pre.load(&path, 0).unwrap();
            assert_eq!(data.len(), 3 * 16 * 16);
            assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_channel_planes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 51])));
        let data = Preprocessor::new(2).process(img, 0);

        assert_eq!(data.len(), 12);
        assert!(data[..4].iter().all(|&v| (v - 1.0).abs() < 0.01));
        assert!(data[4..8].iter().all(|&v| v.abs() < 0.01));
        assert!(data[8..].iter().all(|&v| (v - 0.2).abs() < 0.01));
    }

    #[test]
    fn test_augmented_output_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_jpeg(dir.path(), "big.jpg", 40, 30);
        let pre = Preprocessor::new(16).with_augmentation(
            Augmenter::new(AugmentationConfig::default(), 16),
            42,
        );

        assert!(pre.is_augmenting());
        assert_eq!(pre.load(&path, 5).unwrap().len(), pre.item_len());
    }

    #[test]
    fn test_unreadable_file_is_image_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let err = Preprocessor::new(8).load(&path, 0).unwrap_err();
        assert!(matches!(err, LesionError::ImageLoad(p, _) if p == path));

        let missing = dir.path().join("missing.jpg");
        assert!(matches!(
            Preprocessor::new(8).load(&missing, 0),
            Err(LesionError::ImageLoad(_, _))
        ));
    }
}
