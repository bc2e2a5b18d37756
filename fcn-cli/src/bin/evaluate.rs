//! Scores a trained model over a dataset split with the confusion-matrix
//! metrics.
//!
//! ```bash
//! cargo run --bin evaluate -- --model runs/fcn8s/model --dataset data/voc
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::data::dataloader::DataLoaderBuilder;
use clap::Parser;
use fcn_burn::{
    checkpoint,
    dataset::{SegmentationBatcher, SegmentationDataset},
    training,
};

use fcn_cli::backend::{create_device, SelectedBackend, BACKEND_NAME};

#[derive(Parser, Debug)]
#[command(author, version, about = "Evaluate a trained FCN model on a dataset split")]
struct Args {
    /// Checkpoint stem (without extension)
    #[arg(short, long)]
    model: PathBuf,

    /// Dataset root containing the split directory
    #[arg(long)]
    dataset: PathBuf,

    /// Split to evaluate
    #[arg(long, default_value = "val")]
    split: String,

    /// Device index; negative selects the CPU
    #[arg(short, long, default_value_t = -1)]
    device: i32,

    /// Fall back to the CPU when the requested device is unavailable
    #[arg(long)]
    allow_cpu_fallback: bool,

    /// Label value excluded from scoring
    #[arg(long, default_value_t = fcn_burn::DEFAULT_IGNORE_INDEX)]
    ignore_index: usize,
}

fn main() -> Result<()> {
    fcn_cli::init_logging();
    let args = Args::parse();

    let device = create_device(args.device, args.allow_cpu_fallback)?;
    tracing::info!(backend = BACKEND_NAME, ?device, "backend selected");

    let (model, meta) = checkpoint::load::<SelectedBackend>(&args.model, &device)
        .with_context(|| format!("loading checkpoint {}", args.model.display()))?;
    tracing::info!(variant = %meta.variant, num_classes = meta.num_classes, "model loaded");

    let dataset =
        SegmentationDataset::<SelectedBackend>::new(Path::new(&args.dataset), &args.split, &device)?;
    let loader = DataLoaderBuilder::new(SegmentationBatcher::<SelectedBackend>::new())
        .batch_size(1)
        .build(dataset);

    let (loss, report) = training::evaluate(&model, loader.as_ref(), args.ignore_index)?;

    println!("split:            {}", args.split);
    println!("mean loss:        {loss:.6}");
    println!("overall accuracy: {:.6}", report.overall_accuracy);
    println!("mean accuracy:    {:.6}", report.mean_accuracy);
    println!("mean IU:          {:.6}", report.mean_iou);
    println!("FWAVACC:          {:.6}", report.fwavacc);
    if !report.excluded_classes.is_empty() {
        println!(
            "classes without ground truth (excluded from means): {:?}",
            report.excluded_classes
        );
    }

    Ok(())
}
