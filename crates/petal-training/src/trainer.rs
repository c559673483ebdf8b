//! Transfer-learning training loop.
//!
//! Batches go forward through the frozen backbone and the head, NLL loss is
//! backpropagated (only head parameters receive gradients) and Adam updates
//! the head. Every `print_every` steps the inference copy of the model is
//! validated and a [`ValidationReport`] is recorded.

use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use petal_core::{Error, Result, TrainingConfig};
use petal_dataset::{BatchLoader, ImageBatcher, ImageFolderDataset};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::evaluator::{EvaluationOutcome, Validator};
use crate::model::FineTunedModel;

/// Mean negative log-likelihood of `targets` under `log_probs`
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    log_probs
        .gather(1, targets.unsqueeze_dim(1))
        .mean()
        .neg()
}

/// Configuration for the trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Validate every this many training steps
    pub print_every: usize,
    /// Seed for shuffling and augmentation
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 50,
            learning_rate: 0.01,
            print_every: 30,
            seed: 42,
        }
    }
}

impl From<&TrainingConfig> for TrainerConfig {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.training.epochs,
            batch_size: config.training.batch_size,
            learning_rate: config.training.learning_rate,
            print_every: config.training.print_every,
            seed: config.seed,
        }
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Idle,
    Training { epoch: usize, batch: usize },
    Validating { epoch: usize },
    Done,
}

/// One periodic validation result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Zero-based epoch
    pub epoch: usize,
    /// Training steps taken so far
    pub step: usize,
    /// Running training loss divided by `print_every`
    pub train_loss: f64,
    /// Validation loss averaged over validation batches
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

/// Everything reported during a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub reports: Vec<ValidationReport>,
    pub epochs_completed: usize,
    pub steps: usize,
}

impl TrainingHistory {
    pub fn last_report(&self) -> Option<&ValidationReport> {
        self.reports.last()
    }
}

/// Notifications for progress displays
#[derive(Debug, Clone, Copy)]
pub enum TrainingEvent {
    EpochStarted { epoch: usize, epochs: usize },
    Report(ValidationReport),
    EpochFinished { epoch: usize },
}

/// Mutable state of one training run
#[derive(Debug)]
pub struct TrainingSession {
    pub phase: TrainingPhase,
    pub step: usize,
    /// Sum of batch losses since the last report
    pub running_loss: f64,
    pub history: TrainingHistory,
}

impl TrainingSession {
    fn new() -> Self {
        Self {
            phase: TrainingPhase::Idle,
            step: 0,
            running_loss: 0.0,
            history: TrainingHistory::default(),
        }
    }

    /// Record a finished batch; true when a validation is due
    fn record_batch(&mut self, loss: f64, print_every: usize) -> bool {
        self.step += 1;
        self.running_loss += loss;
        self.step % print_every == 0
    }

    fn record_validation(&mut self, epoch: usize, print_every: usize, outcome: &EvaluationOutcome) -> ValidationReport {
        let report = ValidationReport {
            epoch,
            step: self.step,
            train_loss: self.running_loss / print_every as f64,
            valid_loss: outcome.mean_loss(),
            valid_accuracy: outcome.accuracy(),
        };
        self.history.reports.push(report);
        self.running_loss = 0.0;
        report
    }
}

/// Runs the epoch/batch loop with periodic validation
pub struct Trainer<B: AutodiffBackend> {
    config: TrainerConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainerConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train `model` and return it with the run's history
    pub fn train(
        &self,
        model: FineTunedModel<B>,
        train: &ImageFolderDataset,
        valid: &ImageFolderDataset,
    ) -> Result<(FineTunedModel<B>, TrainingHistory)> {
        self.train_with(model, train, valid, |_| {})
    }

    /// Same as [`Trainer::train`], calling `on_event` as the run progresses
    pub fn train_with<F>(
        &self,
        model: FineTunedModel<B>,
        train: &ImageFolderDataset,
        valid: &ImageFolderDataset,
        mut on_event: F,
    ) -> Result<(FineTunedModel<B>, TrainingHistory)>
    where
        F: FnMut(TrainingEvent),
    {
        if train.is_empty() {
            return Err(Error::EmptyDataset("training dataset has no samples".to_string()));
        }
        if valid.is_empty() {
            return Err(Error::EmptyDataset("validation dataset has no samples".to_string()));
        }

        let print_every = self.config.print_every.max(1);
        let loader = BatchLoader::shuffled(train, self.config.batch_size, self.config.seed);
        let batcher = ImageBatcher::<B>::new(self.device.clone());
        let validator = Validator::new(self.config.batch_size);
        let mut optimizer = AdamConfig::new().init();

        let mut session = TrainingSession::new();
        let mut module = model.model.clone();

        info!(
            "Training for {} epochs: {} training samples in {} batches, {} validation samples",
            self.config.epochs,
            train.len(),
            loader.num_batches(),
            valid.len()
        );

        for epoch in 0..self.config.epochs {
            on_event(TrainingEvent::EpochStarted {
                epoch,
                epochs: self.config.epochs,
            });

            for (batch_index, indices) in loader.batches(epoch).into_iter().enumerate() {
                session.phase = TrainingPhase::Training {
                    epoch,
                    batch: batch_index,
                };

                let batch = loader.load_batch(&indices, epoch, &batcher)?;
                let log_probs = module.forward(batch.images);
                let loss = nll_loss(log_probs, batch.targets);

                let loss_value: f64 = loss.clone().into_scalar().elem();
                if !loss_value.is_finite() {
                    return Err(Error::TrainingDiverged(format!(
                        "loss became {} at epoch {}, step {}",
                        loss_value,
                        epoch + 1,
                        session.step + 1
                    )));
                }

                let grads = GradientsParams::from_grads(loss.backward(), &module);
                module = optimizer.step(self.config.learning_rate, module, grads);

                if session.record_batch(loss_value, print_every) {
                    session.phase = TrainingPhase::Validating { epoch };
                    let outcome = validator.evaluate(&module.valid(), valid, &self.device)?;
                    let report = session.record_validation(epoch, print_every, &outcome);

                    info!(
                        "Epoch: {}/{}.. Training Loss: {:.3}.. Validation Loss: {:.3}.. Validation Accuracy: {:.3}",
                        epoch + 1,
                        self.config.epochs,
                        report.train_loss,
                        report.valid_loss,
                        report.valid_accuracy
                    );
                    on_event(TrainingEvent::Report(report));
                }
            }

            session.history.epochs_completed = epoch + 1;
            debug!("Finished epoch {} after {} steps", epoch + 1, session.step);
            on_event(TrainingEvent::EpochFinished { epoch });
        }

        session.phase = TrainingPhase::Done;
        session.history.steps = session.step;

        Ok((model.with_model(module), session.history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::PretrainedBackbones;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use petal_core::Architecture;
    use petal_dataset::ImageFolder;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    type TrainBackend = Autodiff<NdArray<f32>>;

    fn make_split(root: &Path, classes: &[&str], per_class: u8) {
        for (c, class) in classes.iter().enumerate() {
            let dir = root.join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let color = image::Rgb([(c as u8) * 100, i * 20, 255 - (c as u8) * 100]);
                image::ImageBuffer::from_pixel(48, 40, color)
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
    }

    fn build_model(folder: &ImageFolder) -> FineTunedModel<TrainBackend> {
        FineTunedModel::build(
            &PretrainedBackbones::default(),
            Architecture::Densenet161,
            folder.mapping().clone(),
            Some(16),
            &Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_nll_loss() {
        let device = Default::default();
        let log_probs = Tensor::<NdArray<f32>, 2>::from_data(
            TensorData::new(
                vec![0.5f32.ln(), 0.5f32.ln(), 0.25f32.ln(), 0.75f32.ln()],
                [2, 2],
            ),
            &device,
        );
        let targets = Tensor::<NdArray<f32>, 1, Int>::from_data(TensorData::new(vec![0i64, 1], [2]), &device);

        let loss: f32 = nll_loss(log_probs, targets).into_scalar();
        let expected = -(0.5f32.ln() + 0.75f32.ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_session_reports_every_n_steps() {
        let mut session = TrainingSession::new();
        assert_eq!(session.phase, TrainingPhase::Idle);

        assert!(!session.record_batch(1.0, 2));
        assert!(session.record_batch(3.0, 2));

        let outcome = EvaluationOutcome {
            total_loss: 1.0,
            batches: 2,
            correct: 1,
            samples: 4,
        };
        let report = session.record_validation(0, 2, &outcome);
        assert_eq!(report.train_loss, 2.0);
        assert_eq!(report.valid_loss, 0.5);
        assert_eq!(report.valid_accuracy, 0.25);
        assert_eq!(session.running_loss, 0.0);
        assert_eq!(session.history.reports.len(), 1);
    }

    #[test]
    fn test_train_records_reports() {
        let temp_dir = TempDir::new().unwrap();
        let classes = ["a", "b"];
        make_split(&temp_dir.path().join("train"), &classes, 4);
        make_split(&temp_dir.path().join("valid"), &classes, 1);

        let train_folder = ImageFolder::scan(temp_dir.path().join("train")).unwrap();
        let valid_folder =
            ImageFolder::scan_with_mapping(temp_dir.path().join("valid"), train_folder.mapping()).unwrap();
        let model = build_model(&train_folder);

        let config = TrainerConfig {
            epochs: 2,
            batch_size: 4,
            learning_rate: 0.001,
            print_every: 1,
            seed: 1,
        };
        let trainer = Trainer::<TrainBackend>::new(config, Default::default());

        let mut events = Vec::new();
        let (trained, history) = trainer
            .train_with(
                model,
                &ImageFolderDataset::train(train_folder, 1),
                &ImageFolderDataset::eval(valid_folder),
                |event| events.push(event),
            )
            .unwrap();

        assert_eq!(history.steps, 4);
        assert_eq!(history.epochs_completed, 2);
        assert_eq!(history.reports.len(), 4);
        assert!(history.reports.iter().all(|r| r.train_loss.is_finite()));
        assert_eq!(trained.labels.len(), 2);
        assert!(matches!(events.first(), Some(TrainingEvent::EpochStarted { epoch: 0, epochs: 2 })));
        assert!(matches!(events.last(), Some(TrainingEvent::EpochFinished { epoch: 1 })));
    }

    #[test]
    fn test_non_finite_loss_diverges() {
        let temp_dir = TempDir::new().unwrap();
        make_split(&temp_dir.path().join("train"), &["a", "b"], 2);
        let train_folder = ImageFolder::scan(temp_dir.path().join("train")).unwrap();

        let mut model = build_model(&train_folder);
        // Poison the head so every output is NaN
        let device = Default::default();
        let nan_bias = Tensor::<TrainBackend, 1>::full([16], f32::NAN, &device);
        model.model.head.fc1.bias = Some(burn::module::Param::from_tensor(nan_bias));

        let trainer = Trainer::<TrainBackend>::new(TrainerConfig::default(), device);
        let dataset = ImageFolderDataset::eval(train_folder);
        let result = trainer.train(model, &dataset, &dataset);

        assert!(matches!(result, Err(Error::TrainingDiverged(_))));
    }

    #[test]
    fn test_zero_epochs_produces_no_reports() {
        let temp_dir = TempDir::new().unwrap();
        make_split(&temp_dir.path().join("train"), &["a"], 1);
        let train_folder = ImageFolder::scan(temp_dir.path().join("train")).unwrap();
        let model = build_model(&train_folder);

        let trainer = Trainer::<TrainBackend>::new(
            TrainerConfig {
                epochs: 0,
                ..TrainerConfig::default()
            },
            Default::default(),
        );
        let dataset = ImageFolderDataset::eval(train_folder);
        let (_, history) = trainer.train(model, &dataset, &dataset).unwrap();
        assert!(history.reports.is_empty());
        assert_eq!(history.steps, 0);
    }
}
