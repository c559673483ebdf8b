//! Checkpoint persistence.
//!
//! A checkpoint is one JSON document holding the architecture identifier,
//! the label mapping, the head definition and the head weights. Backbones are
//! not stored; they are rebuilt from the architecture on load.

use burn::module::Param;
use burn::prelude::*;
use chrono::Utc;
use petal_core::{Architecture, Error, LabelMapping, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::backbone::BackboneProvider;
use crate::head::HeadDefinition;
use crate::model::{FineTunedModel, TransferModel};

/// Newest checkpoint layout this build reads and writes
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// File name inside the save directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

const TEMP_FILE: &str = ".checkpoint.json.tmp";

const FC1_WEIGHT: &str = "fc1.weight";
const FC1_BIAS: &str = "fc1.bias";
const FC2_WEIGHT: &str = "fc2.weight";
const FC2_BIAS: &str = "fc2.bias";

/// Flat tensor values with their shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl StoredTensor {
    fn from_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Serialization(format!("Failed to read tensor values: {:?}", e)))?;
        Ok(Self { shape, values })
    }

    fn to_tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        expected: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        if self.shape != expected {
            return Err(Error::CheckpointCorrupt(format!(
                "{} has shape {:?}, expected {:?}",
                name, self.shape, expected
            )));
        }
        let numel: usize = expected.iter().product();
        if self.values.len() != numel {
            return Err(Error::CheckpointCorrupt(format!(
                "{} holds {} values, expected {}",
                name,
                self.values.len(),
                numel
            )));
        }
        Ok(Tensor::from_data(TensorData::new(self.values.clone(), expected), device))
    }
}

/// What the run that produced a checkpoint achieved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub steps: usize,
    pub learning_rate: f64,
    pub training_samples: usize,
    pub final_valid_loss: Option<f64>,
    pub final_valid_accuracy: Option<f64>,
    pub test_accuracy: Option<f64>,
}

/// Serialized form of a fine-tuned model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub architecture: String,
    pub label_mapping: LabelMapping,
    pub head_definition: HeadDefinition,
    pub head_weights: BTreeMap<String, StoredTensor>,
    pub created_at: String,
    #[serde(default)]
    pub summary: Option<TrainingSummary>,
}

impl Checkpoint {
    /// Capture the head weights and identity of `model`
    pub fn from_model<B: Backend>(model: &FineTunedModel<B>, summary: Option<TrainingSummary>) -> Result<Self> {
        let head = &model.model.head;
        let mut head_weights = BTreeMap::new();

        head_weights.insert(FC1_WEIGHT.to_string(), StoredTensor::from_tensor(head.fc1.weight.val())?);
        head_weights.insert(FC2_WEIGHT.to_string(), StoredTensor::from_tensor(head.fc2.weight.val())?);
        if let Some(bias) = &head.fc1.bias {
            head_weights.insert(FC1_BIAS.to_string(), StoredTensor::from_tensor(bias.val())?);
        }
        if let Some(bias) = &head.fc2.bias {
            head_weights.insert(FC2_BIAS.to_string(), StoredTensor::from_tensor(bias.val())?);
        }

        Ok(Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            architecture: model.architecture.id().to_string(),
            label_mapping: model.labels.clone(),
            head_definition: model.head_definition,
            head_weights,
            created_at: Utc::now().to_rfc3339(),
            summary,
        })
    }

    /// Write `checkpoint.json` into `dir`, replacing any previous one atomically
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        ensure_destination(dir)?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize checkpoint: {}", e)))?;

        let temp_path = dir.join(TEMP_FILE);
        let final_path = dir.join(CHECKPOINT_FILE);

        fs::write(&temp_path, json).map_err(|e| {
            Error::InvalidDestination(format!("Cannot write to {}: {}", dir.display(), e))
        })?;
        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::Io(e));
        }

        info!("Checkpoint saved to {:?}", final_path);
        Ok(final_path)
    }

    /// Read a checkpoint from a file, or from `checkpoint.json` inside a directory
    pub fn read(source: &Path) -> Result<Self> {
        let path = resolve_source(source);
        let json = fs::read_to_string(&path)?;

        let checkpoint: Checkpoint = serde_json::from_str(&json)
            .map_err(|e| Error::CheckpointCorrupt(format!("{}: {}", path.display(), e)))?;

        if checkpoint.format_version > CHECKPOINT_FORMAT_VERSION {
            return Err(Error::CheckpointCorrupt(format!(
                "format version {} is newer than supported version {}",
                checkpoint.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }

        debug!("Read checkpoint {:?} ({} classes)", path, checkpoint.label_mapping.len());
        Ok(checkpoint)
    }

    /// Parsed architecture identifier
    pub fn architecture(&self) -> Result<Architecture> {
        self.architecture.parse()
    }

    /// Check the document is self-consistent for `architecture`
    fn verify(&self, architecture: Architecture) -> Result<()> {
        self.label_mapping
            .validate()
            .map_err(|e| Error::CheckpointCorrupt(format!("label mapping: {}", e)))?;

        let definition = &self.head_definition;
        if definition.hidden_units == 0 || definition.num_classes == 0 {
            return Err(Error::CheckpointCorrupt(format!(
                "head has {} hidden units and {} classes",
                definition.hidden_units, definition.num_classes
            )));
        }
        if !(0.0..=1.0).contains(&definition.dropout) {
            return Err(Error::CheckpointCorrupt(format!(
                "dropout probability {} is outside [0, 1]",
                definition.dropout
            )));
        }
        if self.label_mapping.len() != definition.num_classes {
            return Err(Error::CheckpointCorrupt(format!(
                "label mapping has {} classes but the head has {}",
                self.label_mapping.len(),
                definition.num_classes
            )));
        }
        if definition.input_features != architecture.feature_width() {
            return Err(Error::CheckpointCorrupt(format!(
                "head expects {} features but {} produces {}",
                definition.input_features,
                architecture,
                architecture.feature_width()
            )));
        }
        Ok(())
    }

    fn weight(&self, name: &str) -> Result<&StoredTensor> {
        self.head_weights
            .get(name)
            .ok_or_else(|| Error::CheckpointCorrupt(format!("missing head weight {}", name)))
    }

    /// Rebuild the model: backbone from `provider`, head from stored values
    pub fn restore<B: Backend, P: BackboneProvider>(
        &self,
        provider: &P,
        device: &B::Device,
    ) -> Result<FineTunedModel<B>> {
        let architecture = self.architecture()?;
        self.verify(architecture)?;

        let definition = self.head_definition;
        let mut head = definition.init::<B>(device);

        head.fc1.weight = Param::from_tensor(self.weight(FC1_WEIGHT)?.to_tensor(
            FC1_WEIGHT,
            [definition.input_features, definition.hidden_units],
            device,
        )?);
        head.fc1.bias = Some(Param::from_tensor(self.weight(FC1_BIAS)?.to_tensor(
            FC1_BIAS,
            [definition.hidden_units],
            device,
        )?));
        head.fc2.weight = Param::from_tensor(self.weight(FC2_WEIGHT)?.to_tensor(
            FC2_WEIGHT,
            [definition.hidden_units, definition.num_classes],
            device,
        )?);
        head.fc2.bias = Some(Param::from_tensor(self.weight(FC2_BIAS)?.to_tensor(
            FC2_BIAS,
            [definition.num_classes],
            device,
        )?));

        let backbone = provider.backbone::<B>(architecture, device)?;

        Ok(FineTunedModel {
            model: TransferModel { backbone, head },
            architecture,
            labels: self.label_mapping.clone(),
            head_definition: definition,
        })
    }
}

/// Save `model` as `checkpoint.json` in `dir`
pub fn save<B: Backend>(model: &FineTunedModel<B>, dir: &Path, summary: Option<TrainingSummary>) -> Result<PathBuf> {
    Checkpoint::from_model(model, summary)?.save(dir)
}

/// Load a model saved with [`save`]
pub fn load<B: Backend, P: BackboneProvider>(
    source: &Path,
    provider: &P,
    device: &B::Device,
) -> Result<FineTunedModel<B>> {
    let checkpoint = Checkpoint::read(source)?;
    let model = checkpoint.restore(provider, device)?;
    info!(
        "Loaded {} checkpoint with {} classes (created {})",
        model.architecture,
        model.num_classes(),
        checkpoint.created_at
    );
    Ok(model)
}

/// Fail unless `dir` is an existing directory we can create files in
pub fn ensure_destination(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(Error::InvalidDestination(format!("{} is not a directory", dir.display()))),
        Err(e) => return Err(Error::InvalidDestination(format!("{}: {}", dir.display(), e))),
    }

    let check_path = dir.join(TEMP_FILE);
    fs::write(&check_path, b"")
        .map_err(|e| Error::InvalidDestination(format!("Cannot write to {}: {}", dir.display(), e)))?;
    if let Err(e) = fs::remove_file(&check_path) {
        warn!("Failed to remove {:?}: {}", check_path, e);
    }
    Ok(())
}

fn resolve_source(source: &Path) -> PathBuf {
    if source.is_dir() {
        source.join(CHECKPOINT_FILE)
    } else {
        source.to_path_buf()
    }
}
