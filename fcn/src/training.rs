//! Iteration-based training loop.
//!
//! Training is counted in iterations rather than epochs: the dataloader
//! is cycled until the configured iteration budget is spent, with
//! validation passes and atomic snapshots on fixed iteration intervals.
//! The staged variants ship one loss over the final score map; the
//! at-once variant adds weighted auxiliary losses on its intermediate
//! branch maps, lifted to input resolution with a fixed bilinear
//! interpolation (no extra learned parameters).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::{
    config::Config,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::{
        backend::AutodiffBackend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        ElementConversion,
    },
};

use crate::{
    checkpoint,
    config::FcnVariant,
    dataset::{SegmentationBatch, SegmentationBatcher, SegmentationDataset},
    error::{FcnError, FcnResult},
    losses::{MaskedCrossEntropy, MaskedCrossEntropyConfig},
    metrics::{ConfusionMatrix, MetricReport},
    models::Fcn,
};

/// Hyperparameters and bookkeeping for one training run. Loaded from and
/// saved to JSON.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Dataset root containing `train/` and `val/` splits.
    pub dataset_root: String,

    /// Directory receiving snapshots and the metric log.
    pub output_dir: String,

    #[config(default = 1e-4)]
    pub learning_rate: f64,

    #[config(default = 0.99)]
    pub momentum: f64,

    #[config(default = 5e-4)]
    pub weight_decay: f64,

    /// Total optimization steps.
    #[config(default = 100000)]
    pub max_iterations: usize,

    /// Snapshot cadence, in iterations.
    #[config(default = 4000)]
    pub snapshot_interval: usize,

    /// Validation cadence, in iterations.
    #[config(default = 1000)]
    pub validation_interval: usize,

    /// Images per step. Sizes within a batch must agree, so variable-size
    /// datasets train with a batch of one.
    #[config(default = 1)]
    pub batch_size: usize,

    #[config(default = 1)]
    pub num_workers: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 255)]
    pub ignore_index: usize,

    /// Auxiliary loss weight on the stride-32 branch (at-once variant).
    #[config(default = 0.25)]
    pub aux_weight_stride32: f64,

    /// Auxiliary loss weight on the fused stride-16 branch (at-once
    /// variant).
    #[config(default = 0.5)]
    pub aux_weight_stride16: f64,
}

impl TrainingConfig {
    /// Reads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// [`FcnError::InvalidConfiguration`] when the file is unreadable or
    /// malformed.
    pub fn from_file(path: impl AsRef<Path>) -> FcnResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| FcnError::InvalidConfiguration {
            reason: format!("reading {}: {err}", path.display()),
        })?;
        serde_json::from_str(&text).map_err(|err| FcnError::InvalidConfiguration {
            reason: format!("parsing {}: {err}", path.display()),
        })
    }

    /// Writes this configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// [`FcnError::InvalidConfiguration`] when the file cannot be written.
    pub fn to_file(&self, path: impl AsRef<Path>) -> FcnResult<()> {
        let path = path.as_ref();
        let text =
            serde_json::to_string_pretty(self).map_err(|err| FcnError::InvalidConfiguration {
                reason: format!("encoding configuration: {err}"),
            })?;
        fs::write(path, text).map_err(|err| FcnError::InvalidConfiguration {
            reason: format!("writing {}: {err}", path.display()),
        })
    }
}

/// Trains `model` per `config`, returning the final model. Snapshots land
/// in `output_dir` as `snapshot-<iteration>` plus a final `model`.
///
/// # Errors
///
/// Any dataset, shape, label or checkpoint error aborts the run.
pub fn run<B: AutodiffBackend>(
    device: B::Device,
    mut model: Fcn<B>,
    config: &TrainingConfig,
) -> FcnResult<Fcn<B>> {
    B::seed(config.seed);

    let output_dir = PathBuf::from(&config.output_dir);
    fs::create_dir_all(&output_dir).map_err(|err| FcnError::Checkpoint {
        message: format!("creating {}: {err}", output_dir.display()),
    })?;
    config.to_file(output_dir.join("training-config.json"))?;

    let train_loader = dataloader::<B>(config, "train", &device)?;
    let valid_loader = dataloader::<B::InnerBackend>(config, "val", &device)?;

    let loss_fn = MaskedCrossEntropyConfig::new(model.num_classes())
        .with_ignore_index(config.ignore_index)
        .init();
    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(MomentumConfig::new().with_momentum(config.momentum)))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
        .init();

    let mut log = MetricLog::create(&output_dir.join("log.csv"))?;

    tracing::info!(
        variant = %model.variant(),
        max_iterations = config.max_iterations,
        learning_rate = config.learning_rate,
        "starting training"
    );

    let mut iteration = 0usize;
    'training: loop {
        for batch in train_loader.iter() {
            iteration += 1;

            let loss = batch_loss(&model, &batch, &loss_fn, config)?;
            let loss_value = f64::from(loss.clone().into_scalar().elem::<f32>());

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);

            tracing::debug!(iteration, loss = loss_value, "step");
            log.train_row(iteration, loss_value)?;

            if iteration % config.validation_interval == 0 {
                let (val_loss, report) =
                    evaluate(&model.valid(), valid_loader.as_ref(), config.ignore_index)?;
                tracing::info!(
                    iteration,
                    loss = val_loss,
                    mean_iou = report.mean_iou,
                    overall_accuracy = report.overall_accuracy,
                    "validation"
                );
                log.validation_row(iteration, val_loss, &report)?;
            }

            if iteration % config.snapshot_interval == 0 {
                let stem = output_dir.join(format!("snapshot-{iteration}"));
                checkpoint::save(&model, &stem)?;
                tracing::info!(iteration, path = %stem.display(), "snapshot saved");
            }

            if iteration >= config.max_iterations {
                break 'training;
            }
        }
    }

    checkpoint::save(&model, &output_dir.join("model"))?;
    tracing::info!(iteration, "training finished");
    Ok(model)
}

/// Mean loss and confusion-matrix metrics over one dataloader pass.
///
/// The same ignore sentinel the run trains with must be scored with, or
/// sentinel pixels read as invalid labels.
///
/// # Errors
///
/// Propagates shape and label errors; [`FcnError::EmptyEvaluation`] when
/// the loader yields no pixels to score.
pub fn evaluate<B: Backend>(
    model: &Fcn<B>,
    loader: &dyn DataLoader<B, SegmentationBatch<B>>,
    ignore_index: usize,
) -> FcnResult<(f64, MetricReport)> {
    let loss_fn = MaskedCrossEntropyConfig::new(model.num_classes())
        .with_ignore_index(ignore_index)
        .init();
    let mut matrix = ConfusionMatrix::new(model.num_classes(), ignore_index);
    let mut loss_sum = 0.0;
    let mut batches = 0usize;

    for batch in loader.iter() {
        let scores = model.forward(batch.images)?;
        let loss = loss_fn.forward(scores.clone(), batch.targets.clone())?;
        loss_sum += f64::from(loss.into_scalar().elem::<f32>());
        batches += 1;
        matrix.update_scores(scores, batch.targets)?;
    }

    if batches == 0 {
        return Err(FcnError::EmptyEvaluation);
    }
    Ok((loss_sum / batches as f64, matrix.report()?))
}

/// Builds the dataloader for one split.
///
/// # Errors
///
/// Propagates dataset discovery errors.
pub fn dataloader<B: Backend>(
    config: &TrainingConfig,
    split: &str,
    device: &B::Device,
) -> FcnResult<Arc<dyn DataLoader<B, SegmentationBatch<B>>>> {
    let dataset =
        SegmentationDataset::<B>::new(Path::new(&config.dataset_root), split, device)?;
    let batcher = SegmentationBatcher::<B>::new();

    Ok(DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(dataset))
}

fn batch_loss<B: AutodiffBackend>(
    model: &Fcn<B>,
    batch: &SegmentationBatch<B>,
    loss_fn: &MaskedCrossEntropy,
    config: &TrainingConfig,
) -> FcnResult<Tensor<B, 1>> {
    let [_, _, h, w] = batch.images.dims();
    let scores = model.forward_scores(batch.images.clone())?;

    let mut loss = loss_fn.forward(scores.full, batch.targets.clone())?;

    if model.variant() == FcnVariant::Fcn8sAtOnce {
        let aux = |map: Tensor<B, 4>| {
            interpolate(
                map,
                [h, w],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            )
        };

        let stride32 = loss_fn.forward(aux(scores.stride32), batch.targets.clone())?;
        loss = loss + stride32.mul_scalar(config.aux_weight_stride32);

        if let Some(fused) = scores.stride16_fused {
            let stride16 = loss_fn.forward(aux(fused), batch.targets.clone())?;
            loss = loss + stride16.mul_scalar(config.aux_weight_stride16);
        }
    }

    Ok(loss)
}

/// Append-only CSV of per-iteration losses and validation metrics. The
/// columns follow the classic FCN training logs (`i_iter,type,loss,acc,
/// acc_cls,iu,fwavacc`) so existing plotting tooling reads it unchanged.
struct MetricLog {
    file: fs::File,
}

impl MetricLog {
    const HEADER: &'static str = "i_iter,type,loss,acc,acc_cls,iu,fwavacc";

    fn create(path: &Path) -> FcnResult<Self> {
        let fresh = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| FcnError::Checkpoint {
                message: format!("opening {}: {err}", path.display()),
            })?;
        if fresh {
            writeln!(file, "{}", Self::HEADER).map_err(Self::write_error)?;
        }
        Ok(Self { file })
    }

    fn train_row(&mut self, iteration: usize, loss: f64) -> FcnResult<()> {
        writeln!(self.file, "{iteration},train,{loss},,,,").map_err(Self::write_error)
    }

    fn validation_row(
        &mut self,
        iteration: usize,
        loss: f64,
        report: &MetricReport,
    ) -> FcnResult<()> {
        writeln!(
            self.file,
            "{iteration},valid,{loss},{},{},{},{}",
            report.overall_accuracy, report.mean_accuracy, report.mean_iou, report.fwavacc
        )
        .map_err(Self::write_error)
    }

    fn write_error(err: std::io::Error) -> FcnError {
        FcnError::Checkpoint {
            message: format!("writing metric log: {err}"),
        }
    }
}
