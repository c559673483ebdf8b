//! Prediction CLI Tool
//!
//! Loads a checkpoint written by `petal-train` and prints the most likely
//! classes for one image.

use anyhow::{Context, Result};
use burn::prelude::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use colored::Colorize;
use petal_core::{resolve_device, setup_cli_logging, DeviceConfig};
use petal_inference::{CategoryNames, Predictor};
use petal_training::PretrainedBackbones;
use std::path::PathBuf;
use tracing::info;

/// Flower classifier prediction tool
#[derive(Parser, Debug)]
#[command(
    name = "petal-predict",
    about = "Predict the class of an image with a trained checkpoint"
)]
struct Args {
    /// Image to classify
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// Checkpoint file, or the directory containing checkpoint.json
    #[arg(value_name = "CHECKPOINT")]
    checkpoint: PathBuf,

    /// Number of most likely classes to show
    #[arg(short = 'k', long, value_name = "K")]
    top_k: Option<usize>,

    /// JSON file mapping class labels to display names
    #[arg(short = 'n', long, value_name = "FILE")]
    category_names: Option<PathBuf>,

    /// Directory holding pretrained backbone weights
    #[arg(long, value_name = "DIR")]
    weights_dir: Option<PathBuf>,

    /// Run on the GPU when this build supports it
    #[arg(long)]
    gpu: bool,

    /// GPU index
    #[arg(long, default_value = "0")]
    device_id: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let device_config = DeviceConfig {
        use_accelerator: args.gpu,
        device_id: args.device_id,
    };

    match resolve_device(&device_config, cfg!(feature = "cuda")) {
        #[cfg(feature = "cuda")]
        petal_core::Device::Gpu(index) => predict::<burn_cuda::Cuda>(&args, burn_cuda::CudaDevice::new(index)),
        _ => predict::<NdArray<f32>>(&args, NdArrayDevice::Cpu),
    }
}

fn predict<B: Backend>(args: &Args, device: B::Device) -> Result<()> {
    let provider = PretrainedBackbones::new(args.weights_dir.clone());
    let mut predictor = Predictor::<B>::load(&args.checkpoint, &provider, device)
        .with_context(|| format!("Failed to load checkpoint {}", args.checkpoint.display()))?;

    if let Some(path) = &args.category_names {
        let names = CategoryNames::load(path)
            .with_context(|| format!("Failed to load category names from {}", path.display()))?;
        predictor = predictor.with_category_names(names);
    }

    info!("Classifying {}", args.image.display());
    let prediction = predictor
        .predict(&args.image, args.top_k)
        .with_context(|| format!("Failed to classify {}", args.image.display()))?;

    println!("{}", "Predictions:".cyan().bold());
    print!("{}", prediction);

    if let Some((name, probability)) = prediction.top() {
        println!();
        println!(
            "{} {} ({:.1}%)",
            "Most likely:".green().bold(),
            name,
            probability * 100.0
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::parse_from(["petal-predict", "flower.jpg", "save", "--top-k", "3", "--gpu"]);
        assert_eq!(args.image, PathBuf::from("flower.jpg"));
        assert_eq!(args.checkpoint, PathBuf::from("save"));
        assert_eq!(args.top_k, Some(3));
        assert!(args.gpu);
        assert!(args.category_names.is_none());
    }
}
