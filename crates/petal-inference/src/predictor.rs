//! Top-K prediction for single images.
//!
//! The model output is a row of log-probabilities. It is exponentiated,
//! ranked (ties go to the lower class index), and each selected index is
//! mapped to its canonical label and then to a display name.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use burn::prelude::*;
use petal_core::{Error, LabelMapping, Result, IMAGE_SIZE};
use petal_dataset::Preprocessor;
use petal_training::{BackboneProvider, FineTunedModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::categories::CategoryNames;

/// Number of classes returned when the caller does not ask for a count
pub const DEFAULT_TOP_K: usize = 5;

/// Ranked classes for one image; all sequences are parallel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Descending
    pub probabilities: Vec<f32>,
    pub class_indices: Vec<usize>,
    /// Canonical class labels
    pub labels: Vec<String>,
    pub names: Vec<String>,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Most probable (name, probability), if any
    pub fn top(&self) -> Option<(&str, f32)> {
        Some((self.names.first()?.as_str(), *self.probabilities.first()?))
    }

    /// (display name, probability) pairs in rank order
    pub fn ranked(&self) -> impl Iterator<Item = (&str, f32)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.probabilities.iter().copied())
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rank, (name, probability)) in self.ranked().enumerate() {
            writeln!(
                f,
                "Rank {}: {}, likelihood: {}%",
                rank + 1,
                name,
                (probability as f64 * 100.0).ceil()
            )?;
        }
        Ok(())
    }
}

/// Rank log-probabilities and resolve the best `k` through `mapping` and `names`
pub fn decode_top_k(
    log_probs: &[f32],
    k: usize,
    mapping: &LabelMapping,
    names: Option<&CategoryNames>,
) -> Result<Prediction> {
    let probabilities: Vec<f32> = log_probs.iter().map(|p| p.exp()).collect();

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    // Stable sort keeps lower indices first among equal probabilities
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    order.truncate(k.min(probabilities.len()));

    let mut prediction = Prediction {
        probabilities: Vec::with_capacity(order.len()),
        class_indices: Vec::with_capacity(order.len()),
        labels: Vec::with_capacity(order.len()),
        names: Vec::with_capacity(order.len()),
    };

    for index in order {
        let label = mapping.label(index).ok_or(Error::LabelMappingMissing(index))?;
        let name = match names {
            Some(names) => names.display_name(label),
            None => label.to_string(),
        };
        prediction.probabilities.push(probabilities[index]);
        prediction.class_indices.push(index);
        prediction.labels.push(label.to_string());
        prediction.names.push(name);
    }

    Ok(prediction)
}

/// Runs a loaded model on single images
pub struct Predictor<B: Backend> {
    model: FineTunedModel<B>,
    preprocessor: Preprocessor,
    names: Option<CategoryNames>,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: FineTunedModel<B>, device: B::Device) -> Self {
        Self {
            model,
            preprocessor: Preprocessor::new(),
            names: None,
            device,
        }
    }

    /// Restore the model from a checkpoint file or directory
    pub fn load<P: BackboneProvider>(checkpoint: &Path, provider: &P, device: B::Device) -> Result<Self> {
        let model = petal_training::checkpoint::load::<B, P>(checkpoint, provider, &device)?;
        Ok(Self::new(model, device))
    }

    pub fn with_category_names(mut self, names: CategoryNames) -> Self {
        self.names = Some(names);
        self
    }

    pub fn model(&self) -> &FineTunedModel<B> {
        &self.model
    }

    /// Predict the top `top_k` classes for the image at `path`
    pub fn predict(&self, path: &Path, top_k: Option<usize>) -> Result<Prediction> {
        let image = self.preprocessor.process(path)?;
        self.predict_processed(image, top_k)
    }

    /// Predict from an already preprocessed `[3, 224, 224]` buffer
    pub fn predict_processed(&self, image: Vec<f32>, top_k: Option<usize>) -> Result<Prediction> {
        let k = match top_k {
            Some(0) => return Err(Error::InvalidArgument("top_k must be at least 1".to_string())),
            Some(k) => k,
            None => {
                info!("No top_k given, returning the {} most likely classes", DEFAULT_TOP_K);
                DEFAULT_TOP_K
            }
        };

        let shape = self.preprocessor.output_shape();
        if image.len() != shape.iter().product::<usize>() {
            return Err(Error::InvalidArgument(format!(
                "expected {} values for a [3, {}, {}] image, got {}",
                shape.iter().product::<usize>(),
                IMAGE_SIZE,
                IMAGE_SIZE,
                image.len()
            )));
        }

        let start = Instant::now();
        let input = Tensor::<B, 4>::from_data(TensorData::new(image, [1, 3, IMAGE_SIZE, IMAGE_SIZE]), &self.device);
        let log_probs = self
            .model
            .forward(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Serialization(format!("Failed to read model output: {:?}", e)))?;
        debug!("Forward pass took {:.2} ms", start.elapsed().as_secs_f64() * 1000.0);

        decode_top_k(&log_probs, k, &self.model.labels, self.names.as_ref())
    }
}
