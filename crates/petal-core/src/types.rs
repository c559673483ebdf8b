//! Core type definitions for petal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use crate::error::Error;

/// Side length of the square network input
pub const IMAGE_SIZE: usize = 224;

/// Shorter side length images are resized to before center cropping
pub const RESIZE_SHORTER_SIDE: u32 = 256;

/// Per-channel ImageNet mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel ImageNet standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Backbone family, decides the default classifier width
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ArchitectureFamily {
    /// Classic plain conv stacks with a very wide stock classifier
    WideHead,
    /// Densely connected feature extractors
    DeepFeature,
}

/// Supported pretrained backbones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Vgg13,
    Vgg16,
    Densenet161,
}

impl Architecture {
    pub const ALL: [Architecture; 3] = [
        Architecture::Vgg13,
        Architecture::Vgg16,
        Architecture::Densenet161,
    ];

    /// Canonical identifier, as stored in checkpoints
    pub fn id(&self) -> &'static str {
        match self {
            Architecture::Vgg13 => "vgg13",
            Architecture::Vgg16 => "vgg16",
            Architecture::Densenet161 => "densenet161",
        }
    }

    pub fn family(&self) -> ArchitectureFamily {
        match self {
            Architecture::Vgg13 | Architecture::Vgg16 => ArchitectureFamily::WideHead,
            Architecture::Densenet161 => ArchitectureFamily::DeepFeature,
        }
    }

    /// Width of the feature vector the backbone produces per image
    pub fn feature_width(&self) -> usize {
        match self {
            Architecture::Vgg13 | Architecture::Vgg16 => 256,
            Architecture::Densenet161 => 120,
        }
    }

    /// Hidden units used when the caller does not choose any
    pub fn default_hidden_units(&self) -> usize {
        match self.family() {
            ArchitectureFamily::WideHead => 4096,
            ArchitectureFamily::DeepFeature => 512,
        }
    }

    /// Seed used to initialize the backbone when no pretrained weights exist.
    ///
    /// Fixed per architecture so that training and prediction processes
    /// rebuild the same extractor.
    pub fn init_seed(&self) -> u64 {
        match self {
            Architecture::Vgg13 => 0x5667_3133,
            Architecture::Vgg16 => 0x5667_3136,
            Architecture::Densenet161 => 0x4473_3136,
        }
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vgg13" => Ok(Architecture::Vgg13),
            "vgg16" => Ok(Architecture::Vgg16),
            "densenet161" => Ok(Architecture::Densenet161),
            other => Err(Error::UnknownArchitecture(other.to_string())),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Data split type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSplit {
    /// Training data
    Train,
    /// Validation data
    Validation,
    /// Test data
    Test,
}

impl DataSplit {
    /// Subdirectory name of the split inside a data directory
    pub fn dir_name(&self) -> &'static str {
        match self {
            DataSplit::Train => "train",
            DataSplit::Validation => "valid",
            DataSplit::Test => "test",
        }
    }
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Validation => write!(f, "validation"),
            DataSplit::Test => write!(f, "test"),
        }
    }
}

/// Bijection between class indices and canonical class identifiers.
///
/// Indices follow the sorted order of the class directory names of the
/// training split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMapping {
    classes: BTreeMap<usize, String>,
}

impl LabelMapping {
    /// Builds a mapping from class identifiers, sorting them first
    pub fn from_class_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();

        Self {
            classes: names.into_iter().enumerate().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Canonical identifier for a class index
    pub fn label(&self, index: usize) -> Option<&str> {
        self.classes.get(&index).map(String::as_str)
    }

    /// Class index for a canonical identifier
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.classes
            .iter()
            .find(|(_, name)| name.as_str() == label)
            .map(|(index, _)| *index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.classes.iter().map(|(i, name)| (*i, name.as_str()))
    }

    /// Checks that indices are `0..len` and identifiers are unique
    pub fn validate(&self) -> Result<(), String> {
        for (expected, index) in self.classes.keys().enumerate() {
            if *index != expected {
                return Err(format!(
                    "class indices must be contiguous from 0, found {} at position {}",
                    index, expected
                ));
            }
        }

        let mut seen = HashSet::new();
        for name in self.classes.values() {
            if !seen.insert(name.as_str()) {
                return Err(format!("class identifier '{}' appears twice", name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_lookup() {
        assert_eq!("vgg13".parse::<Architecture>().unwrap(), Architecture::Vgg13);
        assert_eq!("vgg16".parse::<Architecture>().unwrap(), Architecture::Vgg16);
        assert_eq!(
            "densenet161".parse::<Architecture>().unwrap(),
            Architecture::Densenet161
        );
    }

    #[test]
    fn test_unknown_architecture() {
        for name in ["resnet18", "VGG16", "", "vgg16; rm -rf /", "models.vgg16()"] {
            let err = name.parse::<Architecture>().unwrap_err();
            assert!(matches!(err, Error::UnknownArchitecture(_)), "{name}");
        }
    }

    #[test]
    fn test_architecture_round_trip_through_id() {
        for arch in Architecture::ALL {
            assert_eq!(arch.id().parse::<Architecture>().unwrap(), arch);
            assert_eq!(arch.to_string(), arch.id());
        }
    }

    #[test]
    fn test_default_hidden_units() {
        assert_eq!(Architecture::Vgg13.default_hidden_units(), 4096);
        assert_eq!(Architecture::Vgg16.default_hidden_units(), 4096);
        assert_eq!(Architecture::Densenet161.default_hidden_units(), 512);
    }

    #[test]
    fn test_data_split_display() {
        assert_eq!(DataSplit::Train.to_string(), "train");
        assert_eq!(DataSplit::Validation.dir_name(), "valid");
        assert_eq!(DataSplit::Test.dir_name(), "test");
    }

    #[test]
    fn test_label_mapping_sorted() {
        let mapping = LabelMapping::from_class_names(["3", "10", "1"]);
        assert_eq!(mapping.len(), 3);
        // Lexicographic order, the way directory names sort
        assert_eq!(mapping.label(0), Some("1"));
        assert_eq!(mapping.label(1), Some("10"));
        assert_eq!(mapping.label(2), Some("3"));
        assert_eq!(mapping.index_of("3"), Some(2));
        assert_eq!(mapping.label(3), None);
        assert!(mapping.validate().is_ok());
    }

    #[test]
    fn test_label_mapping_json_shape() {
        let mapping = LabelMapping::from_class_names(["daisy", "rose"]);
        let json = serde_json::to_string(&mapping).unwrap();
        assert_eq!(json, r#"{"0":"daisy","1":"rose"}"#);

        let back: LabelMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mapping);
    }

    #[test]
    fn test_label_mapping_validation() {
        let gap: LabelMapping = serde_json::from_str(r#"{"0":"a","2":"b"}"#).unwrap();
        assert!(gap.validate().is_err());

        let dup: LabelMapping = serde_json::from_str(r#"{"0":"a","1":"a"}"#).unwrap();
        assert!(dup.validate().is_err());
    }
}
