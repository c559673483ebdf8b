//! Burn dataset and batching for image folders.
//!
//! - `ImageFolderDataset` decodes and transforms samples on demand
//! - `ImageBatcher` stacks items into `[N, 3, 224, 224]` tensors
//! - `BatchLoader` decides batch order (shuffled per epoch for training,
//!   stable for evaluation) and decodes each batch on the rayon pool

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use petal_core::{Error, LabelMapping, Result, IMAGE_SIZE};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::warn;

use crate::augmentation::AugmentationPipeline;
use crate::loader::{ImageFolder, ImageSample};
use crate::preprocess::{eval_transform, load_rgb};

/// A single sample ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Image data as flattened, normalized CHW array [3 * 224 * 224]
    pub image: Vec<f32>,
    /// Class index
    pub label: usize,
}

/// Transform applied when a sample is decoded
#[derive(Debug, Clone)]
pub enum SplitTransform {
    /// Random augmentation, seeded per sample and epoch
    Train(AugmentationPipeline),
    /// Resize, center crop, normalize
    Eval,
}

/// Dataset over an [`ImageFolder`] that decodes images lazily
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    folder: ImageFolder,
    transform: SplitTransform,
    seed: u64,
}

impl ImageFolderDataset {
    /// Training split with random augmentation
    pub fn train(folder: ImageFolder, seed: u64) -> Self {
        Self {
            folder,
            transform: SplitTransform::Train(AugmentationPipeline::default()),
            seed,
        }
    }

    /// Validation or test split with the deterministic transform
    pub fn eval(folder: ImageFolder) -> Self {
        Self {
            folder,
            transform: SplitTransform::Eval,
            seed: 0,
        }
    }

    pub fn mapping(&self) -> &LabelMapping {
        self.folder.mapping()
    }

    pub fn samples(&self) -> &[ImageSample] {
        self.folder.samples()
    }

    pub fn num_classes(&self) -> usize {
        self.folder.mapping().len()
    }

    pub fn is_training(&self) -> bool {
        matches!(self.transform, SplitTransform::Train(_))
    }

    /// Decode and transform one sample.
    ///
    /// Training augmentation is drawn from a stream derived from the dataset
    /// seed, the epoch and the sample index, so the result does not depend
    /// on which thread decodes it.
    pub fn load(&self, index: usize, epoch: usize) -> Result<ImageItem> {
        let sample = self.folder.samples().get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "sample index {} out of range for {} samples",
                index,
                self.folder.len()
            ))
        })?;

        let image = load_rgb(&sample.path)?;
        let data = match &self.transform {
            SplitTransform::Train(pipeline) => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                rng.set_stream(((epoch as u64) << 32) | index as u64);
                pipeline.apply(&image, &mut rng)
            }
            SplitTransform::Eval => eval_transform(&image),
        };

        Ok(ImageItem {
            image: data,
            label: sample.label,
        })
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        match self.load(index, 0) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping sample {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.folder.len()
    }
}

/// Batch of images and targets
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images [batch_size, 3, 224, 224]
    pub images: Tensor<B, 4>,
    /// Class indices [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`ImageItem`]s into tensors on one device
#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, IMAGE_SIZE, IMAGE_SIZE]),
            &self.device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets_data, [batch_size]),
            &self.device,
        );

        ImageBatch { images, targets }
    }
}

/// Splits a dataset into batches of indices and decodes them
pub struct BatchLoader<'a> {
    dataset: &'a ImageFolderDataset,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl<'a> BatchLoader<'a> {
    /// Shuffled order, reshuffled every epoch from `seed`
    pub fn shuffled(dataset: &'a ImageFolderDataset, batch_size: usize, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: true,
            seed,
        }
    }

    /// Dataset order, identical every pass
    pub fn sequential(dataset: &'a ImageFolderDataset, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            seed: 0,
        }
    }

    pub fn dataset(&self) -> &ImageFolderDataset {
        self.dataset
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Sample indices of every batch of `epoch`, in delivery order
    pub fn batches(&self, epoch: usize) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();

        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }

        indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Decode the given samples in parallel, keeping their order.
    ///
    /// Samples that fail to decode are skipped with a warning; a batch where
    /// every sample fails is an error.
    pub fn load(&self, indices: &[usize], epoch: usize) -> Result<Vec<ImageItem>> {
        let results: Vec<Result<ImageItem>> = indices
            .par_iter()
            .map(|&index| self.dataset.load(index, epoch))
            .collect();

        let mut items = Vec::with_capacity(results.len());
        for (index, result) in indices.iter().zip(results) {
            match result {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping sample {}: {}", index, e),
            }
        }

        if items.is_empty() && !indices.is_empty() {
            return Err(Error::DataLoad(format!(
                "all {} samples of the batch failed to load",
                indices.len()
            )));
        }

        Ok(items)
    }

    /// Decode a batch and stack it with `batcher`
    pub fn load_batch<B: Backend>(
        &self,
        indices: &[usize],
        epoch: usize,
        batcher: &ImageBatcher<B>,
    ) -> Result<ImageBatch<B>> {
        let items = self.load(indices, epoch)?;
        Ok(batcher.batch(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn make_split(root: &Path, classes: &[(&str, usize)]) {
        for (class, count) in classes {
            let dir = root.join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..*count {
                let img = image::ImageBuffer::from_fn(32, 24, |x, y| {
                    image::Rgb([(x * 8) as u8, (y * 10) as u8, (i * 40) as u8])
                });
                img.save(dir.join(format!("img_{i}.png"))).unwrap();
            }
        }
    }

    fn eval_dataset(root: &Path) -> ImageFolderDataset {
        ImageFolderDataset::eval(ImageFolder::scan(root).unwrap())
    }

    #[test]
    fn test_eval_items_are_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("a", 2), ("b", 2)]);
        let dataset = eval_dataset(temp_dir.path());

        let first = dataset.load(1, 0).unwrap();
        let second = dataset.load(1, 5).unwrap();
        assert_eq!(first.image, second.image);
        assert_eq!(first.image.len(), 3 * IMAGE_SIZE * IMAGE_SIZE);
        assert_eq!(first.label, 0);
    }

    #[test]
    fn test_train_items_depend_on_epoch_only() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("a", 2)]);
        let dataset = ImageFolderDataset::train(ImageFolder::scan(temp_dir.path()).unwrap(), 11);

        let a = dataset.load(0, 0).unwrap();
        let b = dataset.load(0, 0).unwrap();
        let c = dataset.load(0, 1).unwrap();
        assert_eq!(a.image, b.image);
        assert_ne!(a.image, c.image);
        assert!(dataset.is_training());
    }

    #[test]
    fn test_sequential_batches_are_stable() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("a", 3), ("b", 4)]);
        let dataset = eval_dataset(temp_dir.path());

        let loader = BatchLoader::sequential(&dataset, 3);
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.batches(0), vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
        assert_eq!(loader.batches(0), loader.batches(4));
    }

    #[test]
    fn test_shuffled_batches_change_per_epoch() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("a", 10), ("b", 10)]);
        let dataset = eval_dataset(temp_dir.path());

        let loader = BatchLoader::shuffled(&dataset, 6, 42);
        let epoch0: Vec<usize> = loader.batches(0).concat();
        let epoch1: Vec<usize> = loader.batches(1).concat();

        assert_ne!(epoch0, epoch1);
        assert_eq!(epoch0, loader.batches(0).concat());

        let mut sorted = epoch0.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_load_skips_failed_samples() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("a", 3)]);
        let dataset = eval_dataset(temp_dir.path());

        // Corrupt a file after scanning, the way a disk error would
        fs::write(&dataset.samples()[1].path, b"garbage").unwrap();

        let loader = BatchLoader::sequential(&dataset, 3);
        let items = loader.load(&[0, 1, 2], 0).unwrap();
        assert_eq!(items.len(), 2);

        let all_bad = loader.load(&[1], 0);
        assert!(matches!(all_bad, Err(Error::DataLoad(_))));
    }

    #[test]
    fn test_batcher_shapes() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("a", 1), ("b", 2)]);
        let dataset = eval_dataset(temp_dir.path());

        let device = Default::default();
        let batcher = ImageBatcher::<TestBackend>::new(device);
        let loader = BatchLoader::sequential(&dataset, 8);

        let batch = loader.load_batch(&[0, 1, 2], 0, &batcher).unwrap();
        assert_eq!(batch.images.dims(), [3, 3, IMAGE_SIZE, IMAGE_SIZE]);
        assert_eq!(batch.targets.dims(), [3]);

        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![0, 1, 1]);
    }
}
