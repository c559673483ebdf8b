//! End-to-end training run: scan splits, build, train, test, save.

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use petal_core::{DataSplit, Result, TrainingConfig};
use petal_dataset::{DatasetStatistics, ImageFolder, ImageFolderDataset};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::backbone::PretrainedBackbones;
use crate::checkpoint::{self, TrainingSummary};
use crate::evaluator::{EvaluationOutcome, Validator};
use crate::model::FineTunedModel;
use crate::trainer::{Trainer, TrainerConfig, TrainingEvent, TrainingHistory};

/// Result of a completed run
#[derive(Debug)]
pub struct TrainingRun<B: AutodiffBackend> {
    pub model: FineTunedModel<B>,
    pub history: TrainingHistory,
    pub statistics: DatasetStatistics,
    pub test_outcome: EvaluationOutcome,
    pub checkpoint_path: PathBuf,
}

/// Train according to `config` and write the checkpoint to its save directory.
///
/// Configuration, destination and dataset problems are reported before any
/// compute; the checkpoint is written only after training and testing finish.
pub fn run_training<B, F>(config: &TrainingConfig, device: &B::Device, on_event: F) -> Result<TrainingRun<B>>
where
    B: AutodiffBackend,
    F: FnMut(TrainingEvent),
{
    config.validate()?;
    checkpoint::ensure_destination(&config.data.save_dir)?;
    let architecture = config.model.architecture()?;

    let data_dir = &config.data.data_dir;
    let train_folder = ImageFolder::scan(data_dir.join(DataSplit::Train.dir_name()))?;
    let mapping = train_folder.mapping().clone();
    let valid_folder = ImageFolder::scan_with_mapping(data_dir.join(DataSplit::Validation.dir_name()), &mapping)?;
    let test_folder = ImageFolder::scan_with_mapping(data_dir.join(DataSplit::Test.dir_name()), &mapping)?;

    let statistics = DatasetStatistics::from_folder(&train_folder);
    info!(
        "Dataset: {} training images over {} classes, {} validation, {} test",
        statistics.num_samples,
        statistics.num_classes,
        valid_folder.len(),
        test_folder.len()
    );
    let missing = statistics.missing_classes();
    if !missing.is_empty() {
        warn!("{} classes have no training images: {:?}", missing.len(), missing);
    }

    let provider = PretrainedBackbones::new(config.model.weights_dir.clone());
    let model = FineTunedModel::<B>::build(&provider, architecture, mapping, config.model.hidden_units, device)?;

    let trainer_config = TrainerConfig::from(config);
    let trainer = Trainer::<B>::new(trainer_config.clone(), device.clone());
    let train_dataset = ImageFolderDataset::train(train_folder, config.seed);
    let valid_dataset = ImageFolderDataset::eval(valid_folder);
    let (model, history) = trainer.train_with(model, &train_dataset, &valid_dataset, on_event)?;

    let test_dataset = ImageFolderDataset::eval(test_folder);
    let test_outcome = Validator::new(trainer_config.batch_size).evaluate(&model.model.valid(), &test_dataset, device)?;
    info!(
        "Accuracy achieved by the network on test images: {:.3}",
        test_outcome.accuracy()
    );

    let last = history.last_report();
    let summary = TrainingSummary {
        epochs: history.epochs_completed,
        steps: history.steps,
        learning_rate: trainer_config.learning_rate,
        training_samples: statistics.num_samples,
        final_valid_loss: last.map(|r| r.valid_loss),
        final_valid_accuracy: last.map(|r| r.valid_accuracy),
        test_accuracy: Some(test_outcome.accuracy()),
    };
    let checkpoint_path = checkpoint::save(&model, &config.data.save_dir, Some(summary))?;

    Ok(TrainingRun {
        model,
        history,
        statistics,
        test_outcome,
        checkpoint_path,
    })
}
