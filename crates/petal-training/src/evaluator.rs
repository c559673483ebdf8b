//! Validation and test-set evaluation.
//!
//! Runs a model over a dataset in stable order and accumulates NLL loss per
//! batch and top-1 correctness per sample. Callers pass the inference copy
//! of the model (inner backend), so dropout is off and nothing is tracked.

use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn::tensor::ElementConversion;
use petal_core::{Error, Result};
use petal_dataset::{BatchLoader, ImageBatch, ImageBatcher, ImageFolderDataset};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::TransferModel;
use crate::trainer::nll_loss;

/// Totals of one evaluation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    /// Sum of the per-batch mean losses
    pub total_loss: f64,
    pub batches: usize,
    pub correct: usize,
    pub samples: usize,
}

impl EvaluationOutcome {
    /// Loss averaged over batches
    pub fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.total_loss / self.batches as f64
    }

    /// Fraction of samples whose top-1 prediction is correct
    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.correct as f64 / self.samples as f64
    }

    fn add_batch(&mut self, loss: f64, correct: usize, samples: usize) {
        self.total_loss += loss;
        self.batches += 1;
        self.correct += correct;
        self.samples += samples;
    }
}

/// Evaluates a model against labeled data
#[derive(Debug, Clone)]
pub struct Validator {
    batch_size: usize,
}

impl Validator {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Evaluate on every sample of `dataset`, in dataset order
    pub fn evaluate<B: Backend>(
        &self,
        model: &TransferModel<B>,
        dataset: &ImageFolderDataset,
        device: &B::Device,
    ) -> Result<EvaluationOutcome> {
        if dataset.is_empty() {
            return Err(Error::EmptyDataset("evaluation dataset has no samples".to_string()));
        }

        let loader = BatchLoader::sequential(dataset, self.batch_size);
        let batcher = ImageBatcher::<B>::new(device.clone());

        let mut outcome = EvaluationOutcome::default();
        for indices in loader.batches(0) {
            let batch = loader.load_batch(&indices, 0, &batcher)?;
            self.accumulate(model, batch, &mut outcome);
        }

        debug!(
            "Evaluated {} samples in {} batches: loss={:.4}, accuracy={:.4}",
            outcome.samples,
            outcome.batches,
            outcome.mean_loss(),
            outcome.accuracy()
        );

        Ok(outcome)
    }

    /// Evaluate on already assembled batches
    pub fn evaluate_batches<B: Backend>(
        &self,
        model: &TransferModel<B>,
        batches: impl IntoIterator<Item = ImageBatch<B>>,
    ) -> EvaluationOutcome {
        let mut outcome = EvaluationOutcome::default();
        for batch in batches {
            self.accumulate(model, batch, &mut outcome);
        }
        outcome
    }

    fn accumulate<B: Backend>(
        &self,
        model: &TransferModel<B>,
        batch: ImageBatch<B>,
        outcome: &mut EvaluationOutcome,
    ) {
        let [samples] = batch.targets.dims();
        let log_probs = model.forward(batch.images);

        let predictions = log_probs.clone().argmax(1).reshape([samples]);
        let correct: i64 = predictions
            .equal(batch.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem();

        let loss: f64 = nll_loss(log_probs, batch.targets).into_scalar().elem();
        outcome.add_batch(loss, correct as usize, samples);
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(50)
    }
}
