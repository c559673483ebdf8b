//! Replacement classifier head.
//!
//! linear(features -> hidden) -> ReLU -> dropout -> linear(hidden -> classes)
//! -> log-softmax over classes.

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    tensor::{activation::log_softmax, backend::Backend, Tensor},
};
use petal_core::Architecture;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Dropout probability between the two linear layers
pub const HEAD_DROPOUT: f64 = 0.5;

/// Serializable description of a classifier head
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadDefinition {
    pub input_features: usize,
    pub hidden_units: usize,
    pub num_classes: usize,
    pub dropout: f64,
}

impl HeadDefinition {
    /// Head sized for `architecture`.
    ///
    /// Without `hidden_units` the architecture default is used and logged.
    pub fn for_architecture(architecture: Architecture, num_classes: usize, hidden_units: Option<usize>) -> Self {
        let hidden_units = hidden_units.unwrap_or_else(|| {
            let default = architecture.default_hidden_units();
            info!(
                "No hidden unit count given, using the {} default of {}",
                architecture, default
            );
            default
        });

        Self {
            input_features: architecture.feature_width(),
            hidden_units,
            num_classes,
            dropout: HEAD_DROPOUT,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            fc1: LinearConfig::new(self.input_features, self.hidden_units).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
        }
    }
}

/// Trainable classifier on top of the frozen backbone
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub fc1: Linear<B>,
    activation: Relu,
    dropout: Dropout,
    pub fc2: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// Features [N, input_features] to log-probabilities [N, num_classes]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(features);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        let x = self.fc2.forward(x);
        log_softmax(x, 1)
    }
}
