//! Trains an FCN variant from a JSON training configuration.
//!
//! ```bash
//! # Train the coarsest variant from scratch
//! cargo run --bin train -- --config train.json --variant 32s
//!
//! # Seed the 16s variant from a trained 32s snapshot
//! cargo run --bin train -- --config train.json --variant 16s \
//!     --seed-from runs/fcn32s/model
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use clap::Parser;
use fcn_burn::{checkpoint, training, FcnConfig, FcnVariant, DEFAULT_NUM_CLASSES};

use fcn_cli::backend::{create_device, SelectedBackend, BACKEND_NAME};

type TrainBackend = Autodiff<SelectedBackend>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train an FCN segmentation model")]
struct Args {
    /// Training configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Architecture variant: 32s, 16s, 8s or 8s-at-once
    #[arg(long, default_value = "32s")]
    variant: FcnVariant,

    /// Number of output classes
    #[arg(long, default_value_t = DEFAULT_NUM_CLASSES)]
    num_classes: usize,

    /// Device index; negative selects the CPU
    #[arg(short, long, default_value_t = -1)]
    device: i32,

    /// Fall back to the CPU when the requested device is unavailable
    #[arg(long)]
    allow_cpu_fallback: bool,

    /// Checkpoint stem of a trained predecessor to seed weights from
    #[arg(long)]
    seed_from: Option<PathBuf>,
}

fn main() -> Result<()> {
    fcn_cli::init_logging();
    let args = Args::parse();

    let device = create_device(args.device, args.allow_cpu_fallback)?;
    tracing::info!(backend = BACKEND_NAME, ?device, "backend selected");

    let config = training::TrainingConfig::from_file(&args.config)
        .with_context(|| format!("loading training config {}", args.config.display()))?;

    let mut model = FcnConfig::new()
        .with_variant(args.variant)
        .with_num_classes(args.num_classes)
        .init::<TrainBackend>(&device)?;

    if let Some(stem) = &args.seed_from {
        let (source, meta) = checkpoint::load::<TrainBackend>(stem, &device)
            .with_context(|| format!("loading seed checkpoint {}", stem.display()))?;
        let (seeded, report) = model.seed_from(&source)?;
        model = seeded;
        tracing::info!(
            source_variant = %meta.variant,
            matched = report.matched.len(),
            fresh = ?report.fresh,
            source_only = ?report.source_only,
            "seeded from predecessor"
        );
        tracing::debug!(copied = ?report.matched, "seeded layers");
    }

    training::run(device, model, &config)?;
    Ok(())
}
