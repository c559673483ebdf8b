//! Transfer-learning training for petal.
//!
//! This crate provides:
//! - Frozen backbone feature extractors and their provider
//! - The replaceable classifier head
//! - The training loop with periodic validation
//! - Evaluation of a model against a labeled split
//! - Checkpoint save and load
//! - The end-to-end training run used by the tools

pub mod backbone;
pub mod checkpoint;
pub mod evaluator;
pub mod head;
pub mod model;
pub mod pipeline;
pub mod trainer;

pub use backbone::{Backbone, BackboneProvider, PretrainedBackbones};
pub use checkpoint::{Checkpoint, StoredTensor, TrainingSummary, CHECKPOINT_FILE, CHECKPOINT_FORMAT_VERSION};
pub use evaluator::{EvaluationOutcome, Validator};
pub use head::{ClassifierHead, HeadDefinition, HEAD_DROPOUT};
pub use model::{FineTunedModel, TransferModel};
pub use pipeline::{run_training, TrainingRun};
pub use trainer::{
    nll_loss, Trainer, TrainerConfig, TrainingEvent, TrainingHistory, TrainingPhase, TrainingSession,
    ValidationReport,
};

/// Re-export commonly used types
pub mod prelude {
    pub use super::backbone::{BackboneProvider, PretrainedBackbones};
    pub use super::checkpoint::{self, Checkpoint};
    pub use super::evaluator::{EvaluationOutcome, Validator};
    pub use super::model::FineTunedModel;
    pub use super::trainer::{Trainer, TrainerConfig, TrainingEvent};
}
