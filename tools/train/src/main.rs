//! Training CLI Tool
//!
//! Fine-tunes a classifier head on top of a frozen backbone for a directory
//! with `train/`, `valid/` and `test/` splits, and writes `checkpoint.json`
//! into the save directory.

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::tensor::backend::AutodiffBackend;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use petal_core::{load_toml_config, resolve_device, setup_cli_logging, TrainingConfig};
use petal_training::{run_training, TrainingEvent};
use std::path::PathBuf;
use tracing::info;

/// Flower classifier training tool
#[derive(Parser, Debug)]
#[command(
    name = "petal-train",
    about = "Train a classifier head on a frozen pretrained backbone",
    long_about = "Train a classifier head on a frozen pretrained backbone. The data directory \
                  must contain train/, valid/ and test/ splits with one subdirectory per class."
)]
struct Args {
    /// Dataset directory (overrides the config file)
    #[arg(value_name = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to training configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory to save the checkpoint in
    #[arg(short, long, value_name = "DIR")]
    save_dir: Option<PathBuf>,

    /// Backbone architecture (vgg13, vgg16, densenet161)
    #[arg(short, long, value_name = "NAME")]
    arch: Option<String>,

    /// Learning rate
    #[arg(short, long, value_name = "LR")]
    learning_rate: Option<f64>,

    /// Hidden units of the classifier head
    #[arg(long, value_name = "N")]
    hidden_units: Option<usize>,

    /// Number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Validate every N training steps
    #[arg(long, value_name = "N")]
    print_every: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Directory holding pretrained backbone weights
    #[arg(long, value_name = "DIR")]
    weights_dir: Option<PathBuf>,

    /// Train on the GPU when this build supports it
    #[arg(long)]
    gpu: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration without training
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    println!("{}", "petal: transfer-learning trainer".green().bold());

    let mut config = match &args.config {
        Some(path) => load_toml_config::<TrainingConfig>(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid training configuration")?;

    print_config_summary(&config);

    if args.dry_run {
        println!("{}", "Configuration is valid (dry run)".green());
        return Ok(());
    }

    match resolve_device(&config.device, cfg!(feature = "cuda")) {
        #[cfg(feature = "cuda")]
        petal_core::Device::Gpu(index) => train::<Autodiff<burn_cuda::Cuda>>(&config, burn_cuda::CudaDevice::new(index)),
        _ => train::<Autodiff<NdArray<f32>>>(&config, NdArrayDevice::Cpu),
    }
}

fn apply_overrides(config: &mut TrainingConfig, args: &Args) {
    if let Some(data_dir) = &args.data_dir {
        config.data.data_dir = data_dir.clone();
    }
    if let Some(save_dir) = &args.save_dir {
        config.data.save_dir = save_dir.clone();
    }
    if let Some(arch) = &args.arch {
        config.model.architecture = arch.clone();
    }
    if let Some(hidden_units) = args.hidden_units {
        config.model.hidden_units = Some(hidden_units);
    }
    if let Some(weights_dir) = &args.weights_dir {
        config.model.weights_dir = Some(weights_dir.clone());
    }
    if let Some(lr) = args.learning_rate {
        config.training.learning_rate = lr;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(print_every) = args.print_every {
        config.training.print_every = print_every;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.gpu {
        config.device.use_accelerator = true;
    }
}

fn print_config_summary(config: &TrainingConfig) {
    let hidden = config
        .model
        .hidden_units
        .map(|h| h.to_string())
        .unwrap_or_else(|| "architecture default".to_string());

    println!("{}", "Configuration:".cyan().bold());
    println!("  Architecture:   {}", config.model.architecture);
    println!("  Hidden units:   {}", hidden);
    println!("  Epochs:         {}", config.training.epochs);
    println!("  Batch size:     {}", config.training.batch_size);
    println!("  Learning rate:  {}", config.training.learning_rate);
    println!("  Print every:    {}", config.training.print_every);
    println!("  Seed:           {}", config.seed);
    println!("  Data dir:       {}", config.data.data_dir.display());
    println!("  Save dir:       {}", config.data.save_dir.display());
    println!();
}

fn train<B: AutodiffBackend>(config: &TrainingConfig, device: B::Device) -> Result<()> {
    let progress = ProgressBar::new(config.training.epochs as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs ({eta})")?
            .progress_chars("=>-"),
    );

    let run = run_training::<B, _>(config, &device, |event| match event {
        TrainingEvent::EpochStarted { epoch, .. } => progress.set_position(epoch as u64),
        TrainingEvent::Report(report) => progress.println(format!(
            "Epoch: {}/{}.. Training Loss: {:.3}.. Validation Loss: {:.3}.. Validation Accuracy: {:.3}",
            report.epoch + 1,
            config.training.epochs,
            report.train_loss,
            report.valid_loss,
            report.valid_accuracy
        )),
        TrainingEvent::EpochFinished { epoch } => progress.set_position(epoch as u64 + 1),
    });
    progress.finish_and_clear();
    let run = run.context("Training failed")?;

    let config_path = config.data.save_dir.join("train_config.toml");
    let config_text = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    std::fs::write(&config_path, config_text)
        .with_context(|| format!("Failed to save configuration to {}", config_path.display()))?;
    info!("Configuration saved to {}", config_path.display());

    println!();
    println!("{}", "Training complete".green().bold());
    println!("  Steps:          {}", run.history.steps);
    if let Some(report) = run.history.last_report() {
        println!("  Valid accuracy: {:.3}", report.valid_accuracy);
    }
    println!(
        "  {} {:.3}",
        "Accuracy achieved by the network on test images:".bold(),
        run.test_outcome.accuracy()
    );
    println!("  Checkpoint:     {}", run.checkpoint_path.display());

    Ok(())
}
