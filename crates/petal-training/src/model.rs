//! Backbone + head composition.
//!
//! `TransferModel` is the burn module (what the optimizer sees).
//! `FineTunedModel` adds the identity a checkpoint needs: architecture,
//! label mapping and head definition.

use burn::{
    module::{AutodiffModule, Module},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use petal_core::{Architecture, Error, LabelMapping, Result};

use crate::backbone::{Backbone, BackboneProvider};
use crate::head::{ClassifierHead, HeadDefinition};

/// Frozen backbone followed by a trainable classifier head
#[derive(Module, Debug)]
pub struct TransferModel<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> TransferModel<B> {
    /// Images [N, 3, H, W] to log-probabilities [N, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    /// Backbone features only
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.backbone.forward(images)
    }
}

/// A transfer model together with what identifies it outside the process
#[derive(Debug, Clone)]
pub struct FineTunedModel<B: Backend> {
    pub model: TransferModel<B>,
    pub architecture: Architecture,
    pub labels: LabelMapping,
    pub head_definition: HeadDefinition,
}

impl<B: Backend> FineTunedModel<B> {
    /// Frozen backbone from `provider` plus a freshly initialized head
    pub fn build<P: BackboneProvider>(
        provider: &P,
        architecture: Architecture,
        labels: LabelMapping,
        hidden_units: Option<usize>,
        device: &B::Device,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::EmptyDataset("label mapping has no classes".to_string()));
        }

        let head_definition = HeadDefinition::for_architecture(architecture, labels.len(), hidden_units);
        let backbone = provider.backbone::<B>(architecture, device)?;
        let head = head_definition.init::<B>(device);

        Ok(Self {
            model: TransferModel { backbone, head },
            architecture,
            labels,
            head_definition,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.head_definition.num_classes
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.model.forward(images)
    }

    /// Replace the module, keeping the identity
    pub fn with_model(self, model: TransferModel<B>) -> Self {
        Self { model, ..self }
    }
}

impl<B: AutodiffBackend> FineTunedModel<B> {
    /// Inference copy on the inner backend (dropout disabled)
    pub fn valid(&self) -> FineTunedModel<B::InnerBackend> {
        FineTunedModel {
            model: self.model.valid(),
            architecture: self.architecture,
            labels: self.labels.clone(),
            head_definition: self.head_definition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::PretrainedBackbones;
    use crate::trainer::nll_loss;
    use burn::backend::Autodiff;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::{Distribution, Int, TensorData};
    use burn_ndarray::NdArray;

    type TrainBackend = Autodiff<NdArray<f32>>;

    fn to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_build_sizes_head() {
        let device = Default::default();
        let labels = LabelMapping::from_class_names(["a", "b", "c"]);
        let model = FineTunedModel::<NdArray<f32>>::build(
            &PretrainedBackbones::default(),
            Architecture::Densenet161,
            labels,
            Some(16),
            &device,
        )
        .unwrap();

        assert_eq!(model.num_classes(), 3);
        let images = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);
        assert_eq!(model.forward(images).dims(), [2, 3]);
    }

    #[test]
    fn test_build_rejects_empty_mapping() {
        let device = Default::default();
        let result = FineTunedModel::<NdArray<f32>>::build(
            &PretrainedBackbones::default(),
            Architecture::Vgg13,
            LabelMapping::default(),
            None,
            &device,
        );
        assert!(matches!(result, Err(Error::EmptyDataset(_))));
    }

    #[test]
    fn test_only_head_is_updated() {
        let device = Default::default();

        for architecture in Architecture::ALL {
            let labels = LabelMapping::from_class_names(["a", "b"]);
            let model = FineTunedModel::<TrainBackend>::build(
                &PretrainedBackbones::default(),
                architecture,
                labels,
                Some(8),
                &device,
            )
            .unwrap();

            let images = Tensor::<TrainBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
            let features_before = to_vec(model.model.valid().features(images.clone().inner()));
            let output_before = to_vec(model.model.valid().forward(images.clone().inner()));

            let targets = Tensor::<TrainBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 1], [2]), &device);
            let log_probs = model.forward(images.clone());
            let loss = nll_loss(log_probs, targets);

            let mut optimizer = AdamConfig::new().init();
            let grads = GradientsParams::from_grads(loss.backward(), &model.model);
            let updated = optimizer.step(0.1, model.model.clone(), grads);

            let features_after = to_vec(updated.valid().features(images.clone().inner()));
            let output_after = to_vec(updated.valid().forward(images.inner()));

            assert_eq!(features_before, features_after, "{architecture} backbone moved");
            assert_ne!(output_before, output_after, "{architecture} head did not move");
        }
    }
}
