//! Evaluation-time image preprocessing.
//!
//! The dataset's validation/test transform and the inference [`Preprocessor`]
//! both go through [`eval_transform`], so a checkpoint always sees the same
//! tensor layout and statistics it was validated with.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use petal_core::{Error, Result, IMAGENET_MEAN, IMAGENET_STD, IMAGE_SIZE, RESIZE_SHORTER_SIDE};

/// Open and decode an image file as RGB8
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path)
        .map_err(|e| Error::ImageDecode(format!("{}: {}", path.display(), e)))?;

    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(Error::ImageDecode(format!("{}: image has no pixels", path.display())));
    }

    Ok(rgb)
}

/// Dimensions after scaling the shorter side to `target`.
///
/// The longer side becomes `target * long / short`, truncated.
pub fn shorter_side_dims(width: u32, height: u32, target: u32) -> (u32, u32) {
    let scale = |long: u32, short: u32| ((target as u64 * long as u64) / short as u64) as u32;

    if width <= height {
        (target, scale(height, width))
    } else {
        (scale(width, height), target)
    }
}

/// Resize the shorter side to 256 with bilinear filtering, center-crop to
/// 224x224 and normalize into a CHW buffer.
pub fn eval_transform(image: &RgbImage) -> Vec<f32> {
    let (new_w, new_h) = shorter_side_dims(image.width(), image.height(), RESIZE_SHORTER_SIDE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = IMAGE_SIZE as u32;
    let left = (new_w - size) / 2;
    let top = (new_h - size) / 2;
    let cropped = imageops::crop_imm(&resized, left, top, size, size).to_image();

    normalize_chw(&cropped)
}

/// Scale to [0, 1], apply ImageNet mean/std and lay out channel-first
pub fn normalize_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let num_pixels = (width * height) as usize;
    let mut normalized = Vec::with_capacity(num_pixels * 3);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let value = image.get_pixel(x, y)[channel] as f32 / 255.0;
                normalized.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
            }
        }
    }

    normalized
}

/// Maps an image file to the normalized tensor the model consumes
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Decode `path` and run the evaluation transform on it
    pub fn process(&self, path: &Path) -> Result<Vec<f32>> {
        let image = load_rgb(path)?;
        Ok(eval_transform(&image))
    }

    /// Same as [`Preprocessor::process`] for an already decoded image
    pub fn process_image(&self, image: &DynamicImage) -> Vec<f32> {
        eval_transform(&image.to_rgb8())
    }

    /// Shape of the produced tensor, channel-first
    pub fn output_shape(&self) -> [usize; 3] {
        [3, IMAGE_SIZE, IMAGE_SIZE]
    }
}
