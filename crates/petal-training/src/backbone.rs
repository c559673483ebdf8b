//! Frozen feature extractors.
//!
//! Implements:
//! - VGG-style plain conv stacks (`vgg13`, `vgg16`)
//! - DenseNet-style densely connected blocks (`densenet161`)
//! - `BackboneProvider` and the file-backed `PretrainedBackbones`
//!
//! Every backbone ends in global average pooling and returns one feature
//! vector of `Architecture::feature_width()` values per image. No batch norm
//! or dropout: a frozen extractor must behave identically in training and
//! inference mode.

use std::path::PathBuf;

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        Initializer, PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use petal_core::{Architecture, Error, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

/// Channel widths of the five VGG stages
const VGG_WIDTHS: [usize; 5] = [8, 16, 32, 64, 128];

/// DenseNet stem width, growth rate and layers per dense block
const DENSE_STEM: usize = 32;
const DENSE_GROWTH: usize = 16;
const DENSE_BLOCKS: [usize; 3] = [4, 4, 4];

/// Conv layer with He-uniform weights drawn from `rng` and zero bias
fn seeded_conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    rng: &mut ChaCha8Rng,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = kernel / 2;
    let mut conv = Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_initializer(Initializer::Zeros)
        .init(device);

    let [in_channels, out_channels] = channels;
    let fan_in = (in_channels * kernel * kernel) as f32;
    let bound = (6.0 / fan_in).sqrt();
    let values: Vec<f32> = (0..out_channels * in_channels * kernel * kernel)
        .map(|_| rng.gen_range(-bound..bound))
        .collect();

    conv.weight = Param::from_tensor(Tensor::from_data(
        TensorData::new(values, [out_channels, in_channels, kernel, kernel]),
        device,
    ));
    conv
}

/// One VGG stage: 3x3 convs with ReLU, then 2x2 max pooling
#[derive(Module, Debug)]
pub struct VggStage<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> VggStage<B> {
    fn new(in_channels: usize, out_channels: usize, depth: usize, rng: &mut ChaCha8Rng, device: &B::Device) -> Self {
        let convs = (0..depth)
            .map(|i| {
                let input = if i == 0 { in_channels } else { out_channels };
                seeded_conv([input, out_channels], 3, 1, rng, device)
            })
            .collect();

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(input, |x, conv| self.activation.forward(conv.forward(x)));
        self.pool.forward(x)
    }
}

/// VGG-style feature extractor
#[derive(Module, Debug)]
pub struct VggFeatures<B: Backend> {
    stages: Vec<VggStage<B>>,
    projection: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> VggFeatures<B> {
    /// `depths` holds the number of convs in each of the five stages
    pub fn new(depths: [usize; 5], feature_width: usize, rng: &mut ChaCha8Rng, device: &B::Device) -> Self {
        let mut in_channels = 3;
        let mut stages = Vec::with_capacity(depths.len());
        for (width, depth) in VGG_WIDTHS.iter().zip(depths) {
            stages.push(VggStage::new(in_channels, *width, depth, rng, device));
            in_channels = *width;
        }

        Self {
            stages,
            projection: seeded_conv([in_channels, feature_width], 1, 1, rng, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stages.iter().fold(input, |x, stage| stage.forward(x));
        let x = self.activation.forward(self.projection.forward(x));
        self.pool.forward(x).flatten(1, 3)
    }
}

/// Dense block: every layer sees the concatenation of all previous outputs
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    layers: Vec<Conv2d<B>>,
    activation: Relu,
}

impl<B: Backend> DenseBlock<B> {
    fn new(in_channels: usize, num_layers: usize, rng: &mut ChaCha8Rng, device: &B::Device) -> Self {
        let layers = (0..num_layers)
            .map(|i| seeded_conv([in_channels + i * DENSE_GROWTH, DENSE_GROWTH], 3, 1, rng, device))
            .collect();

        Self {
            layers,
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(input, |x, layer| {
            let new_features = layer.forward(self.activation.forward(x.clone()));
            Tensor::cat(vec![x, new_features], 1)
        })
    }
}

/// 1x1 conv halving the channels, then 2x2 average pooling
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    conv: Conv2d<B>,
    pool: AvgPool2d,
    activation: Relu,
}

impl<B: Backend> Transition<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(self.activation.forward(input));
        self.pool.forward(x)
    }
}

/// DenseNet-style feature extractor
#[derive(Module, Debug)]
pub struct DenseFeatures<B: Backend> {
    stem: Conv2d<B>,
    stem_pool: MaxPool2d,
    blocks: Vec<DenseBlock<B>>,
    transitions: Vec<Transition<B>>,
    pool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> DenseFeatures<B> {
    pub fn new(rng: &mut ChaCha8Rng, device: &B::Device) -> Self {
        let stem = seeded_conv([3, DENSE_STEM], 3, 2, rng, device);

        let mut channels = DENSE_STEM;
        let mut blocks = Vec::with_capacity(DENSE_BLOCKS.len());
        let mut transitions = Vec::with_capacity(DENSE_BLOCKS.len() - 1);

        for (i, num_layers) in DENSE_BLOCKS.iter().enumerate() {
            blocks.push(DenseBlock::new(channels, *num_layers, rng, device));
            channels += num_layers * DENSE_GROWTH;

            if i + 1 < DENSE_BLOCKS.len() {
                transitions.push(Transition {
                    conv: seeded_conv([channels, channels / 2], 1, 1, rng, device),
                    pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                    activation: Relu::new(),
                });
                channels /= 2;
            }
        }

        Self {
            stem,
            stem_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            transitions,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }

    /// Number of channels the last dense block produces
    pub fn output_channels() -> usize {
        let mut channels = DENSE_STEM;
        for (i, num_layers) in DENSE_BLOCKS.iter().enumerate() {
            channels += num_layers * DENSE_GROWTH;
            if i + 1 < DENSE_BLOCKS.len() {
                channels /= 2;
            }
        }
        channels
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.stem.forward(input));
        let mut x = self.stem_pool.forward(x);

        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if let Some(transition) = self.transitions.get(i) {
                x = transition.forward(x);
            }
        }

        let x = self.activation.forward(x);
        self.pool.forward(x).flatten(1, 3)
    }
}

/// Feature extractor for one of the supported architectures
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    Vgg(VggFeatures<B>),
    Dense(DenseFeatures<B>),
}

impl<B: Backend> Backbone<B> {
    /// Build the extractor for `architecture` from a seed
    pub fn init(architecture: Architecture, seed: u64, device: &B::Device) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let width = architecture.feature_width();

        match architecture {
            Architecture::Vgg13 => Backbone::Vgg(VggFeatures::new([2, 2, 2, 2, 2], width, &mut rng, device)),
            Architecture::Vgg16 => Backbone::Vgg(VggFeatures::new([2, 2, 3, 3, 3], width, &mut rng, device)),
            Architecture::Densenet161 => Backbone::Dense(DenseFeatures::new(&mut rng, device)),
        }
    }

    /// Images [N, 3, H, W] to features [N, feature_width]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::Vgg(features) => features.forward(images),
            Backbone::Dense(features) => features.forward(images),
        }
    }
}

#[cfg(test)]
impl<B: Backend> Backbone<B> {
    /// Same extractor with a NaN final conv, so every output holds NaN
    pub(crate) fn with_nan_features(self) -> Self {
        let poison = |conv: &mut Conv2d<B>| {
            conv.weight = Param::from_tensor(conv.weight.val().mul_scalar(f32::NAN));
        };

        match self {
            Backbone::Vgg(mut features) => {
                poison(&mut features.projection);
                Backbone::Vgg(features)
            }
            Backbone::Dense(mut features) => {
                if let Some(conv) = features.blocks.last_mut().and_then(|block| block.layers.last_mut()) {
                    poison(conv);
                }
                Backbone::Dense(features)
            }
        }
    }
}

/// Supplies frozen feature extractors by architecture
pub trait BackboneProvider {
    /// Return the extractor for `architecture` with every parameter frozen
    fn backbone<B: Backend>(&self, architecture: Architecture, device: &B::Device) -> Result<Backbone<B>>;
}

/// Loads `<weights_dir>/<architecture>.mpk` when present, otherwise builds
/// the extractor from the architecture's fixed seed
#[derive(Debug, Clone, Default)]
pub struct PretrainedBackbones {
    weights_dir: Option<PathBuf>,
}

impl PretrainedBackbones {
    pub fn new(weights_dir: Option<PathBuf>) -> Self {
        Self { weights_dir }
    }

    /// Path of the weight record for `architecture`, if it exists
    pub fn weights_path(&self, architecture: Architecture) -> Option<PathBuf> {
        let path = self.weights_dir.as_ref()?.join(format!("{}.mpk", architecture.id()));
        path.is_file().then_some(path)
    }
}

impl BackboneProvider for PretrainedBackbones {
    fn backbone<B: Backend>(&self, architecture: Architecture, device: &B::Device) -> Result<Backbone<B>> {
        let backbone = Backbone::<B>::init(architecture, architecture.init_seed(), device);

        let backbone = match self.weights_path(architecture) {
            Some(path) => {
                info!("Loading pretrained {} weights from {}", architecture, path.display());
                let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
                backbone.load_file(path.clone(), &recorder, device).map_err(|e| {
                    Error::Config(format!(
                        "Failed to load backbone weights {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => {
                warn!(
                    "No pretrained weights for {}, using seeded initialization",
                    architecture
                );
                backbone
            }
        };

        Ok(backbone.no_grad())
    }
}
