//! Configuration structures for petal training runs.
//!
//! Every section has defaults, so a TOML file only needs the keys it
//! overrides. Command-line flags of the tools are applied on top.

use crate::error::{Error, Result};
use crate::types::Architecture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Model configuration
    pub model: ModelConfig,
    /// Training hyperparameters
    pub training: TrainingParams,
    /// Data configuration
    pub data: DataConfig,
    /// Device configuration
    pub device: DeviceConfig,
    /// Random seed for shuffling and augmentation
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            training: TrainingParams::default(),
            data: DataConfig::default(),
            device: DeviceConfig::default(),
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Rejects configurations that would fail only after compute started
    pub fn validate(&self) -> Result<()> {
        self.model.architecture()?;

        if let Some(0) = self.model.hidden_units {
            return Err(Error::Config("hidden_units must be at least 1".to_string()));
        }
        if self.training.epochs == 0 {
            return Err(Error::Config("epochs must be at least 1".to_string()));
        }
        if self.training.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.training.print_every == 0 {
            return Err(Error::Config("print_every must be at least 1".to_string()));
        }
        if !(self.training.learning_rate.is_finite() && self.training.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be a positive number, got {}",
                self.training.learning_rate
            )));
        }

        Ok(())
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Backbone identifier, one of `vgg13`, `vgg16`, `densenet161`
    pub architecture: String,
    /// Hidden units of the classifier head (architecture default when unset)
    pub hidden_units: Option<usize>,
    /// Directory holding `<architecture>.mpk` pretrained backbone records
    pub weights_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::Densenet161.id().to_string(),
            hidden_units: None,
            weights_dir: None,
        }
    }
}

impl ModelConfig {
    pub fn architecture(&self) -> Result<Architecture> {
        self.architecture.parse()
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of training epochs
    pub epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Learning rate for Adam
    pub learning_rate: f64,
    /// Validate every this many training steps
    pub print_every: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 50,
            learning_rate: 0.01,
            print_every: 30,
        }
    }
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory containing `train/`, `valid/` and `test/`
    pub data_dir: PathBuf,
    /// Directory the checkpoint is written to
    pub save_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("flowers"),
            save_dir: PathBuf::from("."),
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Run on the accelerator when the build has one
    pub use_accelerator: bool,
    /// Accelerator ordinal
    pub device_id: usize,
}
