//! Runs a trained model over images, writing a class-index label map and
//! a color overlay per input.
//!
//! ```bash
//! # Single image
//! cargo run --bin inference -- --model runs/fcn8s/model image.jpg
//!
//! # Every image in a directory
//! cargo run --bin inference -- --model runs/fcn8s/model photos/ --output out/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use fcn_burn::{checkpoint, Fcn};

use fcn_cli::backend::{create_device, SelectedBackend, SelectedDevice, BACKEND_NAME};
use fcn_cli::{images, palette};

#[derive(Parser, Debug)]
#[command(author, version, about = "Segment images with a trained FCN model")]
struct Args {
    /// Checkpoint stem (without extension)
    #[arg(short, long)]
    model: PathBuf,

    /// Input image or directory of images
    input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "outputs")]
    output: PathBuf,

    /// Device index; negative selects the CPU
    #[arg(short, long, default_value_t = -1)]
    device: i32,

    /// Fall back to the CPU when the requested device is unavailable
    #[arg(long)]
    allow_cpu_fallback: bool,
}

fn main() -> Result<()> {
    fcn_cli::init_logging();
    let args = Args::parse();

    let device = create_device(args.device, args.allow_cpu_fallback)?;
    tracing::info!(backend = BACKEND_NAME, ?device, "backend selected");

    let (model, meta) = checkpoint::load::<SelectedBackend>(&args.model, &device)
        .with_context(|| format!("loading checkpoint {}", args.model.display()))?;
    tracing::info!(variant = %meta.variant, num_classes = meta.num_classes, "model loaded");

    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating output directory {}", args.output.display()))?;

    let inputs = collect_inputs(&args.input)?;
    anyhow::ensure!(!inputs.is_empty(), "no images under {}", args.input.display());

    let mut failures = 0usize;
    for path in &inputs {
        if let Err(err) = segment_one(&model, path, &args.output, &device) {
            tracing::warn!(image = %path.display(), %err, "skipping image");
            failures += 1;
        }
    }

    tracing::info!(
        processed = inputs.len() - failures,
        failures,
        output = %args.output.display(),
        "inference finished"
    );
    anyhow::ensure!(failures < inputs.len(), "every input failed");
    Ok(())
}

fn segment_one(
    model: &Fcn<SelectedBackend>,
    path: &Path,
    output: &Path,
    device: &SelectedDevice,
) -> Result<()> {
    let (batch, rgb) = images::load_image::<SelectedBackend>(path, device)?;
    let (width, height) = rgb.dimensions();

    let prediction = model.predict(batch)?;
    let labels = images::labels_to_vec(prediction)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("prediction");
    images::save_label_png(&labels, width, height, &output.join(format!("{stem}-labels.png")))?;

    let colors = palette::colorize(&labels, width, height);
    palette::overlay(&rgb, &colors)
        .save(output.join(format!("{stem}-overlay.png")))
        .with_context(|| format!("writing overlay for {}", path.display()))?;

    Ok(())
}

fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let valid_extensions = ["png", "jpg", "jpeg", "PNG", "JPG", "JPEG"];
    let mut paths = Vec::new();
    for entry in fs::read_dir(input)
        .with_context(|| format!("reading input directory {}", input.display()))?
    {
        let path = entry?.path();
        let valid = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| valid_extensions.contains(&ext));
        if path.is_file() && valid {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
