//! Progressive weight seeding between decoder variants.
//!
//! The coarse-to-fine training protocol initializes each finer variant
//! from its trained predecessor: every layer both networks share is
//! copied, every layer new to the finer variant keeps its fresh
//! initialization. Copying is a typed, layer-by-layer transfer; a shared
//! layer whose parameter shapes disagree is an error naming that layer,
//! never a silent partial copy.

use burn::{
    module::Param,
    nn::conv::{Conv2d, ConvTranspose2d},
    prelude::*,
};

use crate::{
    error::{FcnError, FcnResult},
    models::{Fcn, ScoreHead, Upsampler},
};

/// What a seeding transfer did, layer by layer. Each list holds layer
/// names, so a surprising transfer can be diagnosed from the report
/// alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Shared layers whose parameters were copied from the source.
    pub matched: Vec<String>,
    /// Destination layers with no source counterpart, left at their fresh
    /// initialization.
    pub fresh: Vec<String>,
    /// Source layers the destination has no compatible counterpart for.
    pub source_only: Vec<String>,
}

impl<B: Backend> Fcn<B> {
    /// Seeds this freshly initialized model from a trained predecessor.
    ///
    /// Only the pairing prescribed by the training protocol is accepted:
    /// 16s from 32s, and 8s from 16s. The at-once variant trains from
    /// scratch and is neither a valid source nor destination here.
    ///
    /// # Errors
    ///
    /// [`FcnError::InvalidConfiguration`] when the source variant is not
    /// this variant's predecessor, and [`FcnError::SeedIncompatibility`]
    /// when a shared layer's shapes disagree (for instance a differing
    /// class count).
    pub fn seed_from(mut self, source: &Self) -> FcnResult<(Self, SeedReport)> {
        let expected = self.variant().seeding_predecessor();
        if expected != Some(source.variant()) {
            return Err(FcnError::InvalidConfiguration {
                reason: match expected {
                    Some(predecessor) => format!(
                        "variant {} seeds from {}, not {}",
                        self.variant(),
                        predecessor,
                        source.variant()
                    ),
                    None => format!("variant {} trains from scratch", self.variant()),
                },
            });
        }

        let mut report = SeedReport::default();

        let (encoder, copied) = self.encoder.seed_from(&source.encoder)?;
        self.encoder = encoder;
        report.matched.extend(copied);

        self.score_stride32 =
            copy_score_head(self.score_stride32, &source.score_stride32, "score_stride32")?;
        report.matched.push("score_stride32".to_string());

        self.score_stride16 = transfer_optional(
            self.score_stride16,
            &source.score_stride16,
            "score_stride16",
            &mut report,
            copy_score_head,
        )?;
        self.upsample_32_to_16 = transfer_optional(
            self.upsample_32_to_16,
            &source.upsample_32_to_16,
            "upsample_32_to_16",
            &mut report,
            copy_upsampler,
        )?;
        self.score_stride8 = transfer_optional(
            self.score_stride8,
            &source.score_stride8,
            "score_stride8",
            &mut report,
            copy_score_head,
        )?;
        self.upsample_16_to_8 = transfer_optional(
            self.upsample_16_to_8,
            &source.upsample_16_to_8,
            "upsample_16_to_8",
            &mut report,
            copy_upsampler,
        )?;

        // The final upsampler's factor differs between variants, so its
        // kernel shapes never line up; both sides keep their own.
        report.fresh.push("upsample_final".to_string());
        report.source_only.push("upsample_final".to_string());

        Ok((self, report))
    }
}

fn transfer_optional<M>(
    destination: Option<M>,
    source: &Option<M>,
    layer: &str,
    report: &mut SeedReport,
    copy: impl Fn(M, &M, &str) -> FcnResult<M>,
) -> FcnResult<Option<M>> {
    match (destination, source) {
        (Some(dst), Some(src)) => {
            let dst = copy(dst, src, layer)?;
            report.matched.push(layer.to_string());
            Ok(Some(dst))
        }
        (Some(dst), None) => {
            report.fresh.push(layer.to_string());
            Ok(Some(dst))
        }
        (None, Some(_)) => {
            report.source_only.push(layer.to_string());
            Ok(None)
        }
        (None, None) => Ok(None),
    }
}

fn copy_score_head<B: Backend>(
    mut destination: ScoreHead<B>,
    source: &ScoreHead<B>,
    layer: &str,
) -> FcnResult<ScoreHead<B>> {
    destination.conv = copy_conv2d(destination.conv, &source.conv, layer)?;
    Ok(destination)
}

fn copy_upsampler<B: Backend>(
    mut destination: Upsampler<B>,
    source: &Upsampler<B>,
    layer: &str,
) -> FcnResult<Upsampler<B>> {
    destination.conv = copy_conv_transpose2d(destination.conv, &source.conv, layer)?;
    Ok(destination)
}

pub(crate) fn copy_conv2d<B: Backend>(
    mut destination: Conv2d<B>,
    source: &Conv2d<B>,
    layer: &str,
) -> FcnResult<Conv2d<B>> {
    check_shapes(layer, destination.weight.dims(), source.weight.dims())?;
    destination.weight = Param::from_tensor(source.weight.val());
    destination.bias = copy_bias(destination.bias, &source.bias, layer)?;
    Ok(destination)
}

pub(crate) fn copy_conv_transpose2d<B: Backend>(
    mut destination: ConvTranspose2d<B>,
    source: &ConvTranspose2d<B>,
    layer: &str,
) -> FcnResult<ConvTranspose2d<B>> {
    check_shapes(layer, destination.weight.dims(), source.weight.dims())?;
    destination.weight = Param::from_tensor(source.weight.val());
    destination.bias = copy_bias(destination.bias, &source.bias, layer)?;
    Ok(destination)
}

fn copy_bias<B: Backend>(
    destination: Option<Param<Tensor<B, 1>>>,
    source: &Option<Param<Tensor<B, 1>>>,
    layer: &str,
) -> FcnResult<Option<Param<Tensor<B, 1>>>> {
    match (destination, source) {
        (Some(dst), Some(src)) => {
            check_shapes(layer, dst.dims(), src.dims())?;
            Ok(Some(Param::from_tensor(src.val())))
        }
        (None, None) => Ok(None),
        (dst, src) => Err(FcnError::SeedIncompatibility {
            layer: layer.to_string(),
            source_shape: describe_bias(src.is_some()),
            destination: describe_bias(dst.is_some()),
        }),
    }
}

fn describe_bias(present: bool) -> String {
    if present { "biased" } else { "bias-free" }.to_string()
}

fn check_shapes<const D: usize>(
    layer: &str,
    destination: [usize; D],
    source: [usize; D],
) -> FcnResult<()> {
    if destination != source {
        return Err(FcnError::SeedIncompatibility {
            layer: layer.to_string(),
            source_shape: format!("{source:?}"),
            destination: format!("{destination:?}"),
        });
    }
    Ok(())
}
