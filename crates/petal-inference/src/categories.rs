//! Display names for class labels.

use petal_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Canonical class label to human-readable name, e.g. `"21" -> "fire lily"`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryNames {
    names: HashMap<String, String>,
}

impl CategoryNames {
    /// Read a JSON object of label/name pairs
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let names: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Serialization(format!("Invalid category names in {}: {}", path.display(), e)))?;
        debug!("Loaded {} category names from {:?}", names.len(), path);
        Ok(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.names.get(label).map(String::as_str)
    }

    /// Name for `label`, or the label itself when the table has no entry
    pub fn display_name(&self, label: &str) -> String {
        match self.get(label) {
            Some(name) => name.to_string(),
            None => {
                warn!("No display name for class {}, using the label", label);
                label.to_string()
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CategoryNames {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cat_to_name.json");
        fs::write(&path, r#"{"21": "fire lily", "3": "canterbury bells"}"#).unwrap();

        let names = CategoryNames::load(&path).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names.get("21"), Some("fire lily"));
        assert_eq!(names.display_name("3"), "canterbury bells");
    }

    #[test]
    fn test_missing_name_falls_back_to_label() {
        let names: CategoryNames = [("1", "pink primrose")].into_iter().collect();
        assert_eq!(names.display_name("2"), "2");
    }

    #[test]
    fn test_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("names.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(CategoryNames::load(&path), Err(Error::Serialization(_))));
    }
}
