//! Dataset statistics computation.

use std::collections::BTreeMap;

use crate::loader::ImageFolder;

/// Sample counts of one split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetStatistics {
    pub num_samples: usize,
    pub num_classes: usize,
    /// Samples per class index
    pub class_distribution: BTreeMap<usize, usize>,
}

impl DatasetStatistics {
    pub fn from_folder(folder: &ImageFolder) -> Self {
        let mut class_distribution = BTreeMap::new();
        for sample in folder.samples() {
            *class_distribution.entry(sample.label).or_insert(0) += 1;
        }

        Self {
            num_samples: folder.len(),
            num_classes: folder.mapping().len(),
            class_distribution,
        }
    }

    /// Smallest and largest class sizes, ignoring classes without samples
    pub fn class_size_range(&self) -> Option<(usize, usize)> {
        let min = self.class_distribution.values().min()?;
        let max = self.class_distribution.values().max()?;
        Some((*min, *max))
    }

    /// Classes of the mapping with no sample in this split
    pub fn missing_classes(&self) -> Vec<usize> {
        (0..self.num_classes)
            .filter(|class| !self.class_distribution.contains_key(class))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_statistics_from_folder() {
        let temp_dir = TempDir::new().unwrap();
        for (class, count) in [("a", 3), ("b", 1)] {
            let dir = temp_dir.path().join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                image::ImageBuffer::from_pixel(4, 4, image::Rgb([0u8, 0, 0]))
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
        fs::create_dir_all(temp_dir.path().join("c")).unwrap();

        let folder = ImageFolder::scan(temp_dir.path()).unwrap();
        let stats = DatasetStatistics::from_folder(&folder);

        assert_eq!(stats.num_samples, 4);
        assert_eq!(stats.num_classes, 3);
        assert_eq!(stats.class_distribution.get(&0), Some(&3));
        assert_eq!(stats.class_size_range(), Some((1, 3)));
        assert_eq!(stats.missing_classes(), vec![2]);
    }
}
