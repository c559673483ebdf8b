//! Image folder scanning.
//!
//! A split directory holds one subdirectory per class. Class indices come
//! from the sorted subdirectory names of the training split; evaluation
//! splits are resolved against that mapping.

use std::fs;
use std::path::{Path, PathBuf};

use petal_core::{Error, LabelMapping, Result};
use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File extensions treated as images (compared lowercase)
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "gif", "webp", "tif", "tiff"];

/// Represents an image file with its class index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label (index)
    pub label: usize,
}

impl ImageSample {
    pub fn new(path: PathBuf, label: usize) -> Self {
        Self { path, label }
    }
}

/// Scanned contents of one split directory
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    samples: Vec<ImageSample>,
    mapping: LabelMapping,
}

impl ImageFolder {
    /// Scan a training split and derive the label mapping from it
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let class_dirs = class_directories(&root)?;
        let mapping = LabelMapping::from_class_names(class_dirs.iter().map(|(name, _)| name.clone()));

        Self::collect(root, class_dirs, mapping)
    }

    /// Scan an evaluation split against an existing mapping.
    ///
    /// A class directory unknown to `mapping` is an error; classes of the
    /// mapping that have no directory here are allowed.
    pub fn scan_with_mapping(root: impl Into<PathBuf>, mapping: &LabelMapping) -> Result<Self> {
        let root = root.into();
        let class_dirs = class_directories(&root)?;

        if let Some((name, _)) = class_dirs.iter().find(|(name, _)| mapping.index_of(name).is_none()) {
            return Err(Error::DataLoad(format!(
                "class directory '{}' in {} is not part of the training classes",
                name,
                root.display()
            )));
        }

        Self::collect(root, class_dirs, mapping.clone())
    }

    fn collect(root: PathBuf, class_dirs: Vec<(String, PathBuf)>, mapping: LabelMapping) -> Result<Self> {
        let mut candidates = Vec::new();
        for (name, dir) in &class_dirs {
            let label = mapping.index_of(name).ok_or_else(|| {
                Error::DataLoad(format!("class '{}' has no index", name))
            })?;
            for path in image_files(dir) {
                candidates.push(ImageSample::new(path, label));
            }
        }

        let total = candidates.len();
        let samples: Vec<ImageSample> = candidates
            .into_par_iter()
            .filter(|sample| match image::image_dimensions(&sample.path) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Skipping unreadable image {}: {}", sample.path.display(), e);
                    false
                }
            })
            .collect();

        if samples.is_empty() {
            return Err(Error::DataLoad(format!(
                "no readable images found in {}",
                root.display()
            )));
        }

        debug!(
            "Scanned {}: {} classes, {} of {} images readable",
            root.display(),
            class_dirs.len(),
            samples.len(),
            total
        );

        Ok(Self {
            root,
            samples,
            mapping,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Class subdirectories of `root`, sorted by name
fn class_directories(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !root.exists() {
        return Err(Error::DataLoad(format!("directory not found: {}", root.display())));
    }
    if !root.is_dir() {
        return Err(Error::DataLoad(format!("not a directory: {}", root.display())));
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                dirs.push((name.to_string(), path.clone()));
            } else {
                warn!("Skipping class directory with non UTF-8 name: {}", path.display());
            }
        }
    }

    if dirs.is_empty() {
        return Err(Error::DataLoad(format!(
            "no class subdirectories in {}",
            root.display()
        )));
    }

    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

/// Image files directly inside `dir`, sorted by path
fn image_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_image_extension(path))
        .collect();

    files.sort();
    files
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_image(path: &Path) {
        let img = image::ImageBuffer::from_fn(10, 10, |_, _| image::Rgb([255u8, 0u8, 0u8]));
        img.save(path).unwrap();
    }

    fn make_split(root: &Path, classes: &[(&str, usize)]) {
        for (class, count) in classes {
            let dir = root.join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..*count {
                create_test_image(&dir.join(format!("img_{i}.png")));
            }
        }
    }

    #[test]
    fn test_scan_assigns_sorted_indices() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("tulip", 2), ("daisy", 3), ("rose", 1)]);

        let folder = ImageFolder::scan(temp_dir.path()).unwrap();
        assert_eq!(folder.len(), 6);
        assert_eq!(folder.mapping().label(0), Some("daisy"));
        assert_eq!(folder.mapping().label(1), Some("rose"));
        assert_eq!(folder.mapping().label(2), Some("tulip"));

        let daisies = folder.samples().iter().filter(|s| s.label == 0).count();
        assert_eq!(daisies, 3);
    }

    #[test]
    fn test_scan_skips_non_images_and_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        make_split(temp_dir.path(), &[("a", 2)]);
        fs::write(temp_dir.path().join("a/notes.txt"), "text").unwrap();
        fs::write(temp_dir.path().join("a/broken.jpg"), "not an image").unwrap();

        let folder = ImageFolder::scan(temp_dir.path()).unwrap();
        assert_eq!(folder.len(), 2);
    }

    #[test]
    fn test_scan_errors() {
        let temp_dir = TempDir::new().unwrap();

        let missing = ImageFolder::scan(temp_dir.path().join("missing"));
        assert!(matches!(missing, Err(Error::DataLoad(_))));

        let file = temp_dir.path().join("file.png");
        create_test_image(&file);
        assert!(matches!(ImageFolder::scan(&file), Err(Error::DataLoad(_))));

        let no_classes = temp_dir.path().join("flat");
        fs::create_dir(&no_classes).unwrap();
        create_test_image(&no_classes.join("x.png"));
        assert!(matches!(ImageFolder::scan(&no_classes), Err(Error::DataLoad(_))));

        let no_images = temp_dir.path().join("empty");
        fs::create_dir_all(no_images.join("class")).unwrap();
        assert!(matches!(ImageFolder::scan(&no_images), Err(Error::DataLoad(_))));
    }

    #[test]
    fn test_scan_with_mapping() {
        let temp_dir = TempDir::new().unwrap();
        let train = temp_dir.path().join("train");
        let valid = temp_dir.path().join("valid");
        make_split(&train, &[("a", 1), ("b", 1), ("c", 1)]);
        make_split(&valid, &[("c", 2)]);

        let train_folder = ImageFolder::scan(&train).unwrap();
        let valid_folder = ImageFolder::scan_with_mapping(&valid, train_folder.mapping()).unwrap();

        // "c" keeps its training index even though it is alone here
        assert!(valid_folder.samples().iter().all(|s| s.label == 2));
        assert_eq!(valid_folder.mapping(), train_folder.mapping());
    }

    #[test]
    fn test_scan_with_mapping_rejects_unknown_class() {
        let temp_dir = TempDir::new().unwrap();
        let train = temp_dir.path().join("train");
        let valid = temp_dir.path().join("valid");
        make_split(&train, &[("a", 1)]);
        make_split(&valid, &[("a", 1), ("z", 1)]);

        let train_folder = ImageFolder::scan(&train).unwrap();
        let result = ImageFolder::scan_with_mapping(&valid, train_folder.mapping());
        assert!(matches!(result, Err(Error::DataLoad(_))));
    }

    #[test]
    fn test_has_image_extension() {
        assert!(has_image_extension(Path::new("a.JPG")));
        assert!(has_image_extension(Path::new("a.webp")));
        assert!(has_image_extension(Path::new("dir/a.tiff")));
        assert!(!has_image_extension(Path::new("a.txt")));
        assert!(!has_image_extension(Path::new("jpg")));
    }
}
