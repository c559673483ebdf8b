//! Training-time augmentation.
//!
//! Random rotation, random resized crop to 224x224, random horizontal flip,
//! then the same normalization as the evaluation transform. Every random
//! decision is drawn from a caller supplied `ChaCha8Rng`, so a seed fully
//! determines the output.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use petal_core::IMAGE_SIZE;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::preprocess::normalize_chw;

/// Parameters of the training transform
#[derive(Debug, Clone)]
pub struct AugmentationConfig {
    /// Rotation is drawn uniformly from `[-rotation_degrees, rotation_degrees]`
    pub rotation_degrees: f32,
    /// Range of the crop area as a fraction of the image area
    pub crop_scale: (f32, f32),
    /// Range of the crop aspect ratio (width / height)
    pub crop_ratio: (f32, f32),
    /// Attempts before falling back to a center crop
    pub crop_attempts: usize,
    pub horizontal_flip_prob: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 30.0,
            crop_scale: (0.08, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            crop_attempts: 10,
            horizontal_flip_prob: 0.5,
        }
    }
}

/// A crop window in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Augmentation pipeline applied to training samples
#[derive(Debug, Clone, Default)]
pub struct AugmentationPipeline {
    config: AugmentationConfig,
}

impl AugmentationPipeline {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Augment an image and return the normalized CHW tensor data
    pub fn apply(&self, image: &RgbImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let angle = rng.gen_range(-self.config.rotation_degrees..=self.config.rotation_degrees);
        let rotated = rotate(image, angle);

        let window = self.sample_crop(rotated.width(), rotated.height(), rng);
        let cropped =
            imageops::crop_imm(&rotated, window.left, window.top, window.width, window.height)
                .to_image();

        let size = IMAGE_SIZE as u32;
        let mut resized = imageops::resize(&cropped, size, size, FilterType::Triangle);

        if rng.gen_bool(self.config.horizontal_flip_prob) {
            imageops::flip_horizontal_in_place(&mut resized);
        }

        normalize_chw(&resized)
    }

    /// Pick a random crop window covering a random area and aspect ratio
    pub fn sample_crop(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> CropWindow {
        let area = (width * height) as f32;
        let (min_scale, max_scale) = self.config.crop_scale;
        let log_ratio = (self.config.crop_ratio.0.ln(), self.config.crop_ratio.1.ln());

        for _ in 0..self.config.crop_attempts {
            let target_area = area * rng.gen_range(min_scale..=max_scale);
            let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();

            let crop_w = (target_area * aspect).sqrt().round() as u32;
            let crop_h = (target_area / aspect).sqrt().round() as u32;

            if crop_w > 0 && crop_w <= width && crop_h > 0 && crop_h <= height {
                let top = rng.gen_range(0..=height - crop_h);
                let left = rng.gen_range(0..=width - crop_w);
                return CropWindow {
                    left,
                    top,
                    width: crop_w,
                    height: crop_h,
                };
            }
        }

        self.center_crop(width, height)
    }

    /// Largest centered window whose aspect ratio lies in `crop_ratio`
    fn center_crop(&self, width: u32, height: u32) -> CropWindow {
        let in_ratio = width as f32 / height as f32;
        let (min_ratio, max_ratio) = self.config.crop_ratio;

        let (crop_w, crop_h) = if in_ratio < min_ratio {
            (width, ((width as f32 / min_ratio).round() as u32).clamp(1, height))
        } else if in_ratio > max_ratio {
            (((height as f32 * max_ratio).round() as u32).clamp(1, width), height)
        } else {
            (width, height)
        };

        CropWindow {
            left: (width - crop_w) / 2,
            top: (height - crop_h) / 2,
            width: crop_w,
            height: crop_h,
        }
    }
}

/// Rotate around the image center, keeping the size; uncovered pixels are black
pub fn rotate(image: &RgbImage, angle_degrees: f32) -> RgbImage {
    if angle_degrees.abs() < 1e-3 {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = cx + dx * cos_a + dy * sin_a;
        let src_y = cy - dx * sin_a + dy * cos_a;
        bilinear_sample(image, src_x, src_y)
    })
}

fn bilinear_sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }

    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_image(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, 128]))
    }

    #[test]
    fn test_apply_output_shape() {
        let pipeline = AugmentationPipeline::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for (w, h) in [(300, 200), (64, 64), (20, 500)] {
            let out = pipeline.apply(&test_image(w, h), &mut rng);
            assert_eq!(out.len(), 3 * IMAGE_SIZE * IMAGE_SIZE);
            assert!(out.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let pipeline = AugmentationPipeline::default();
        let image = test_image(120, 90);

        let a = pipeline.apply(&image, &mut ChaCha8Rng::seed_from_u64(7));
        let b = pipeline.apply(&image, &mut ChaCha8Rng::seed_from_u64(7));
        let c = pipeline.apply(&image, &mut ChaCha8Rng::seed_from_u64(8));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_crop_window_bounds() {
        let pipeline = AugmentationPipeline::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..200 {
            let window = pipeline.sample_crop(150, 80, &mut rng);
            assert!(window.width > 0 && window.height > 0);
            assert!(window.left + window.width <= 150);
            assert!(window.top + window.height <= 80);
        }
    }

    #[test]
    fn test_center_crop_fallback() {
        // Nothing fits: a 1000x10 strip never yields a 3/4..4/3 window
        // covering at least 8% of its area.
        let pipeline = AugmentationPipeline::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let window = pipeline.sample_crop(1000, 10, &mut rng);
        assert_eq!(window.height, 10);
        assert_eq!(window.width, 13);
        assert_eq!(window.left, (1000 - 13) / 2);
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let image = test_image(40, 30);
        assert_eq!(rotate(&image, 0.0), image);
    }

    #[test]
    fn test_rotation_blackens_corners() {
        let image = ImageBuffer::from_pixel(41, 41, Rgb([255u8, 255, 255]));

        let rotated = rotate(&image, 25.0);
        assert_eq!(rotated.dimensions(), (41, 41));
        assert_eq!(*rotated.get_pixel(0, 0), Rgb([0, 0, 0]));
        // Center pixel maps onto itself
        assert_eq!(*rotated.get_pixel(20, 20), Rgb([255, 255, 255]));
    }
}
