//! Image folder loading, augmentation and preprocessing for petal.
//!
//! This crate turns a directory with one subdirectory per class into
//! normalized `[3, 224, 224]` samples, and provides the deterministic
//! preprocessing shared by evaluation and inference.

pub mod augmentation;
pub mod dataset;
pub mod loader;
pub mod preprocess;
pub mod statistics;

pub use augmentation::{AugmentationConfig, AugmentationPipeline};
pub use dataset::{BatchLoader, ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem};
pub use loader::{ImageFolder, ImageSample};
pub use preprocess::{eval_transform, Preprocessor};
pub use statistics::DatasetStatistics;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::augmentation::*;
    pub use crate::dataset::*;
    pub use crate::loader::*;
    pub use crate::preprocess::*;
    pub use crate::statistics::*;
}
