//! Evaluation CLI Tool
//!
//! Runs a trained checkpoint over a labeled directory and reports loss and
//! accuracy.

use anyhow::{Context, Result};
use burn::prelude::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use petal_core::{resolve_device, setup_cli_logging, DeviceConfig};
use petal_dataset::{DatasetStatistics, ImageFolder, ImageFolderDataset};
use petal_training::{checkpoint, PretrainedBackbones, Validator};
use std::path::PathBuf;
use tracing::info;

/// Flower classifier evaluation tool
#[derive(Parser, Debug)]
#[command(
    name = "petal-evaluate",
    about = "Evaluate a trained checkpoint on a labeled directory",
    long_about = "Evaluate a trained checkpoint on a directory with one subdirectory per class. \
                  Class directories are resolved against the label mapping stored in the checkpoint."
)]
struct Args {
    /// Checkpoint file, or the directory containing checkpoint.json
    #[arg(short, long, value_name = "FILE")]
    checkpoint: PathBuf,

    /// Labeled dataset directory
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: PathBuf,

    /// Batch size for evaluation
    #[arg(short, long, default_value = "50")]
    batch_size: usize,

    /// Directory holding pretrained backbone weights
    #[arg(long, value_name = "DIR")]
    weights_dir: Option<PathBuf>,

    /// Print the per-class sample counts
    #[arg(long)]
    detailed: bool,

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
        petal_core::Device::Gpu(index) => evaluate::<burn_cuda::Cuda>(&args, burn_cuda::CudaDevice::new(index)),
        _ => evaluate::<NdArray<f32>>(&args, NdArrayDevice::Cpu),
    }
}

fn evaluate<B: Backend>(args: &Args, device: B::Device) -> Result<()> {
    let provider = PretrainedBackbones::new(args.weights_dir.clone());
    let model = checkpoint::load::<B, _>(&args.checkpoint, &provider, &device)
        .with_context(|| format!("Failed to load checkpoint {}", args.checkpoint.display()))?;

    let folder = ImageFolder::scan_with_mapping(&args.data_dir, &model.labels)
        .with_context(|| format!("Failed to scan {}", args.data_dir.display()))?;
    let statistics = DatasetStatistics::from_folder(&folder);

    println!("{}", "Evaluation Configuration:".cyan().bold());
    println!("  Checkpoint:   {}", args.checkpoint.display());
    println!("  Architecture: {}", model.architecture);
    println!("  Data dir:     {}", args.data_dir.display());
    println!("  Samples:      {}", statistics.num_samples);
    println!("  Classes:      {}", statistics.num_classes);
    println!();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg} [{elapsed_precise}]")?);
    spinner.set_message("Evaluating");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let dataset = ImageFolderDataset::eval(folder);
    let outcome = Validator::new(args.batch_size).evaluate(&model.model, &dataset, &device);
    spinner.finish_and_clear();
    let outcome = outcome.context("Evaluation failed")?;
    info!("Evaluated {} samples in {} batches", outcome.samples, outcome.batches);

    println!("{}", "Evaluation Results:".green().bold());
    println!("  Loss:     {:.4}", outcome.mean_loss());
    println!("  Accuracy: {:.4} ({}/{})", outcome.accuracy(), outcome.correct, outcome.samples);

    if args.detailed {
        println!();
        println!("{}", "Class Distribution:".cyan().bold());
        for (index, count) in &statistics.class_distribution {
            let label = model.labels.label(*index).unwrap_or("?");
            let pct = 100.0 * *count as f64 / statistics.num_samples as f64;
            println!("  {:30} {:>5} ({:>5.1}%)", label, count, pct);
        }
        let missing = statistics.missing_classes();
        if !missing.is_empty() {
            println!("  {} {} classes have no samples", "Note:".yellow(), missing.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::parse_from(["petal-evaluate", "-c", "save", "-d", "flowers/test", "--detailed"]);
        assert_eq!(args.checkpoint, PathBuf::from("save"));
        assert_eq!(args.data_dir, PathBuf::from("flowers/test"));
        assert_eq!(args.batch_size, 50);
        assert!(args.detailed);
    }
}
