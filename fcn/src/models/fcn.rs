//! The FCN model family.
//!
//! One module type covers all four variants; construction consults the
//! [`FcnVariant`] tag to decide which score heads and inter-stride
//! upsamplers exist, and the forward pass composes the same three stage
//! primitives (score, upsample + crop, fuse) in variant order. There is no
//! inheritance between variants: a more complex variant relates to a
//! simpler one only through progressive weight seeding.

use burn::{module::Ignored, prelude::*};

use super::{
    encoder::{Encoder, EncoderConfig, EncoderFeatures},
    fusion::fuse,
    head::{ScoreHead, ScoreHeadConfig},
    upsample::{Upsampler, UpsamplerConfig},
};
use crate::{
    config::{FcnVariant, DEFAULT_NUM_CLASSES},
    error::{FcnError, FcnResult},
};

/// Configuration for the [`Fcn`] model.
#[derive(Config, Debug)]
pub struct FcnConfig {
    /// Number of output classes K.
    #[config(default = "DEFAULT_NUM_CLASSES")]
    pub num_classes: usize,
    /// Which pipeline of the family to build.
    #[config(default = "FcnVariant::Fcn32s")]
    pub variant: FcnVariant,
    /// Feature encoder configuration.
    #[config(default = "EncoderConfig::new()")]
    pub encoder: EncoderConfig,
}

impl FcnConfig {
    /// Initializes an [`Fcn`] model for the configured variant.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> FcnResult<Fcn<B>> {
        if self.num_classes < 2 {
            return Err(FcnError::InvalidConfiguration {
                reason: format!(
                    "segmentation needs at least 2 classes, got {}",
                    self.num_classes
                ),
            });
        }

        let variant = self.variant;
        let k = self.num_classes;

        let score_stride16 = variant
            .fuses_stride16()
            .then(|| ScoreHeadConfig::new(Encoder::<B>::STRIDE16_CHANNELS, k).init(device));
        let upsample_32_to_16 = variant
            .fuses_stride16()
            .then(|| UpsamplerConfig::new(k, 2).init(device));
        let score_stride8 = variant
            .fuses_stride8()
            .then(|| ScoreHeadConfig::new(Encoder::<B>::STRIDE8_CHANNELS, k).init(device));
        let upsample_16_to_8 = variant
            .fuses_stride8()
            .then(|| UpsamplerConfig::new(k, 2).init(device));

        Ok(Fcn {
            encoder: self.encoder.init(device),
            score_stride32: ScoreHeadConfig::new(Encoder::<B>::STRIDE32_CHANNELS, k).init(device),
            score_stride16,
            score_stride8,
            upsample_32_to_16,
            upsample_16_to_8,
            upsample_final: UpsamplerConfig::new(k, variant.final_factor()).init(device),
            variant: Ignored(variant),
            num_classes: k,
        })
    }
}

/// Score maps produced by one forward pass.
///
/// The intermediate maps exist so the jointly-trained variant can attach
/// auxiliary losses to its coarser branches; plain inference only consumes
/// `full`.
#[derive(Debug, Clone)]
pub struct FcnScores<B: Backend> {
    /// Final fused scores at input resolution, `[N, K, H, W]`.
    pub full: Tensor<B, 4>,
    /// Stride-32 score map before any fusion.
    pub stride32: Tensor<B, 4>,
    /// Fused stride-16 score map, when the variant has that branch.
    pub stride16_fused: Option<Tensor<B, 4>>,
}

/// A fully convolutional segmentation network.
#[derive(Module, Debug)]
pub struct Fcn<B: Backend> {
    pub(crate) encoder: Encoder<B>,
    pub(crate) score_stride32: ScoreHead<B>,
    pub(crate) score_stride16: Option<ScoreHead<B>>,
    pub(crate) score_stride8: Option<ScoreHead<B>>,
    pub(crate) upsample_32_to_16: Option<Upsampler<B>>,
    pub(crate) upsample_16_to_8: Option<Upsampler<B>>,
    pub(crate) upsample_final: Upsampler<B>,
    variant: Ignored<FcnVariant>,
    num_classes: usize,
}

impl<B: Backend> Fcn<B> {
    /// The variant this model was built as.
    pub fn variant(&self) -> FcnVariant {
        self.variant.0
    }

    /// Number of output classes K.
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Runs the full pipeline, returning per-pixel class scores at input
    /// resolution, `[N, K, H, W]`.
    ///
    /// # Errors
    ///
    /// Propagates shape errors from the encoder, heads, upsamplers and
    /// fusion steps.
    pub fn forward(&self, images: Tensor<B, 4>) -> FcnResult<Tensor<B, 4>> {
        Ok(self.forward_scores(images)?.full)
    }

    /// Runs the pipeline and keeps the intermediate branch score maps.
    ///
    /// # Errors
    ///
    /// Propagates shape errors from any stage.
    pub fn forward_scores(&self, images: Tensor<B, 4>) -> FcnResult<FcnScores<B>> {
        let [_, _, h, w] = images.dims();
        let features = self.encoder.forward(images)?;

        let stride32 = self.score_stride32.forward(features.stride32.clone())?;
        let mut current = stride32.clone();

        let stride16_fused = match (&self.score_stride16, &self.upsample_32_to_16) {
            (Some(head), Some(upsampler)) => {
                current = Self::fuse_skip(current, upsampler, head, &features.stride16)?;
                Some(current.clone())
            }
            _ => None,
        };

        if let (Some(head), Some(upsampler)) = (&self.score_stride8, &self.upsample_16_to_8) {
            current = Self::fuse_skip(current, upsampler, head, &features.stride8)?;
        }

        let full = self.upsample_final.forward(current, [h, w])?;
        Ok(FcnScores {
            full,
            stride32,
            stride16_fused,
        })
    }

    /// One skip-fusion stage: score the finer feature map, lift the coarse
    /// running scores to its size, add.
    fn fuse_skip(
        coarse: Tensor<B, 4>,
        upsampler: &Upsampler<B>,
        head: &ScoreHead<B>,
        fine_features: &Tensor<B, 4>,
    ) -> FcnResult<Tensor<B, 4>> {
        let fine = head.forward(fine_features.clone())?;
        let [_, _, fh, fw] = fine.dims();
        let lifted = upsampler.forward(coarse, [fh, fw])?;
        fuse(lifted, fine)
    }

    /// Per-pixel class prediction: `argmax` over the class axis, `[N, H, W]`.
    ///
    /// # Errors
    ///
    /// Propagates shape errors from the forward pass.
    pub fn predict(&self, images: Tensor<B, 4>) -> FcnResult<Tensor<B, 3, Int>> {
        let scores = self.forward(images)?;
        Ok(scores.argmax(1).squeeze::<3>(1))
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    type TestBackend = NdArray;

    fn random_images(h: usize, w: usize) -> Tensor<TestBackend, 4> {
        Tensor::random([1, 3, h, w], Distribution::Normal(0.0, 1.0), &Default::default())
    }

    #[test]
    fn every_variant_produces_scores_at_input_resolution() {
        let device = Default::default();
        for variant in [
            FcnVariant::Fcn32s,
            FcnVariant::Fcn16s,
            FcnVariant::Fcn8s,
            FcnVariant::Fcn8sAtOnce,
        ] {
            let model = FcnConfig::new()
                .with_num_classes(4)
                .with_variant(variant)
                .init::<TestBackend>(&device)
                .unwrap();

            // Deliberately not a multiple of 32 on either axis.
            let scores = model.forward(random_images(97, 113)).unwrap();
            assert_eq!(scores.dims(), [1, 4, 97, 113], "variant {variant}");
        }
    }

    #[test]
    fn at_once_topology_matches_8s() {
        let device = Default::default();
        let staged = FcnConfig::new()
            .with_num_classes(5)
            .with_variant(FcnVariant::Fcn8s)
            .init::<TestBackend>(&device)
            .unwrap();
        let joint = FcnConfig::new()
            .with_num_classes(5)
            .with_variant(FcnVariant::Fcn8sAtOnce)
            .init::<TestBackend>(&device)
            .unwrap();

        assert!(staged.score_stride8.is_some() && joint.score_stride8.is_some());
        assert_eq!(
            staged.upsample_final.factor(),
            joint.upsample_final.factor()
        );
        assert_ne!(staged.variant(), joint.variant());
    }

    #[test]
    fn branch_scores_exposed_for_fused_variants() {
        let device = Default::default();
        let model = FcnConfig::new()
            .with_num_classes(3)
            .with_variant(FcnVariant::Fcn8sAtOnce)
            .init::<TestBackend>(&device)
            .unwrap();

        let scores = model.forward_scores(random_images(64, 64)).unwrap();
        assert_eq!(scores.stride32.dims(), [1, 3, 2, 2]);
        assert_eq!(scores.stride16_fused.unwrap().dims(), [1, 3, 4, 4]);
        assert_eq!(scores.full.dims(), [1, 3, 64, 64]);
    }

    #[test]
    fn predictions_are_one_label_per_pixel() {
        let device = Default::default();
        let model = FcnConfig::new()
            .with_num_classes(4)
            .with_variant(FcnVariant::Fcn32s)
            .init::<TestBackend>(&device)
            .unwrap();

        let labels = model.predict(random_images(64, 96)).unwrap();
        assert_eq!(labels.dims(), [1, 64, 96]);

        let values: Vec<i64> = labels.into_data().convert::<i64>().to_vec().unwrap();
        assert!(values.iter().all(|&v| (0..4).contains(&v)));
    }
}
