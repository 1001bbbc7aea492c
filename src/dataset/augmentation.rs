//! Training-time augmentation
//!
//! Applied in order: left-right flip, top-bottom flip, random crop to the
//! target size. The flips draw from the caller's seeded RNG. The crop offset
//! comes from the thread RNG, so crop placement is not reproducible between
//! runs even with a fixed seed.

use image::{DynamicImage, GenericImageView};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of a left-right flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Probability of a top-bottom flip (0.0 - 1.0)
    pub vertical_flip_prob: f32,
    /// Crop a random `image_size` window before the final resize
    pub random_crop: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
            random_crop: true,
        }
    }
}

impl AugmentationConfig {
    /// Leaves images untouched
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            random_crop: false,
        }
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    pub fn with_defaults(image_size: u32) -> Self {
        Self::new(AugmentationConfig::default(), image_size)
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Flip with `rng`, then crop with the thread RNG
    pub fn augment(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage {
        let mut result = img;

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            result = result.fliph();
        }

        if rng.gen::<f32>() < self.config.vertical_flip_prob {
            result = result.flipv();
        }

        if self.config.random_crop {
            result = self.random_crop(&result, &mut rand::thread_rng());
        }

        result
    }

    /// Crop an `image_size` square (clamped to the image extent) at a random offset
    pub fn random_crop<R: Rng>(&self, img: &DynamicImage, rng: &mut R) -> DynamicImage {
        let (width, height) = img.dimensions();
        let crop_w = self.image_size.min(width);
        let crop_h = self.image_size.min(height);

        let x = rng.gen_range(0..=width - crop_w);
        let y = rng.gen_range(0..=height - crop_h);

        img.crop_imm(x, y, crop_w, crop_h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rand::SeedableRng;

    /// Left half black, right half white, top-left pixel red
    fn marker_image(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_flips_are_seeded() {
        let config = AugmentationConfig {
            random_crop: false,
            ..AugmentationConfig::default()
        };
        let augmenter = Augmenter::new(config, 8);

        for seed in 0..10 {
            let a = augmenter.augment(marker_image(8, 8), &mut ChaCha8Rng::seed_from_u64(seed));
            let b = augmenter.augment(marker_image(8, 8), &mut ChaCha8Rng::seed_from_u64(seed));
            assert_eq!(a.to_rgb8().into_raw(), b.to_rgb8().into_raw());
        }
    }

    #[test]
    fn test_certain_flips_move_marker() {
        let config = AugmentationConfig {
            horizontal_flip_prob: 1.0,
            vertical_flip_prob: 1.0,
            random_crop: false,
        };
        let augmenter = Augmenter::new(config, 8);
        let out = augmenter
            .augment(marker_image(8, 6), &mut ChaCha8Rng::seed_from_u64(42))
            .to_rgb8();

        assert_eq!(out.get_pixel(7, 5), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_random_crop_size() {
        let augmenter = Augmenter::with_defaults(4);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let cropped = augmenter.random_crop(&marker_image(10, 6), &mut rng);
        assert_eq!(cropped.dimensions(), (4, 4));

        // Smaller than the target: clamped to the image
        let small = augmenter.random_crop(&marker_image(3, 2), &mut rng);
        assert_eq!(small.dimensions(), (3, 2));
    }

    #[test]
    fn test_none_is_identity() {
        let augmenter = Augmenter::new(AugmentationConfig::none(), 8);
        let img = marker_image(8, 8);
        let out = augmenter.augment(img.clone(), &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(out.to_rgb8().into_raw(), img.to_rgb8().into_raw());
    }
}
