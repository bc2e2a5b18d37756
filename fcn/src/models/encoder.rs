//! Convolutional feature encoder.
//!
//! A compact VGG-style backbone standing in for a full pretrained feature
//! extractor: five stride-2 stages followed by a convolutionalized
//! classifier head at stride 32. The encoder exposes the three tap points
//! the FCN decoder family consumes (strides 8, 16 and 32); everything else
//! about the backbone is opaque to the rest of the network.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::{
    error::{FcnError, FcnResult},
    seeding::copy_conv2d,
};

/// Intermediate feature maps at the strides the decoder fuses.
#[derive(Debug, Clone)]
pub struct EncoderFeatures<B: Backend> {
    /// `[N, 256, H/8, W/8]`
    pub stride8: Tensor<B, 4>,
    /// `[N, 512, H/16, W/16]`
    pub stride16: Tensor<B, 4>,
    /// `[N, 1024, H/32, W/32]`
    pub stride32: Tensor<B, 4>,
}

/// One encoder stage: two 3x3 convolutions followed by a 2x2 max pool.
#[derive(Module, Debug)]
struct ConvStage<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvStage<B> {
    fn init(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let conv = |cin: usize, cout: usize| {
            Conv2dConfig::new([cin, cout], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        Self {
            conv1: conv(in_channels, out_channels),
            conv2: conv(out_channels, out_channels),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.conv1.forward(x));
        let x = self.relu.forward(self.conv2.forward(x));
        self.pool.forward(x)
    }

    fn seed_from(
        mut self,
        source: &Self,
        stage: &str,
        copied: &mut Vec<String>,
    ) -> FcnResult<Self> {
        let name = format!("{stage}.conv1");
        self.conv1 = copy_conv2d(self.conv1, &source.conv1, &name)?;
        copied.push(name);

        let name = format!("{stage}.conv2");
        self.conv2 = copy_conv2d(self.conv2, &source.conv2, &name)?;
        copied.push(name);
        Ok(self)
    }
}

/// Configuration for the [`Encoder`].
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Number of input image channels.
    #[config(default = 3)]
    pub in_channels: usize,
}

impl EncoderConfig {
    /// Initializes an [`Encoder`] on the given device.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Encoder<B> {
        let widths = Encoder::<B>::STAGE_CHANNELS;
        Encoder {
            stage1: ConvStage::init(self.in_channels, widths[0], device),
            stage2: ConvStage::init(widths[0], widths[1], device),
            stage3: ConvStage::init(widths[1], widths[2], device),
            stage4: ConvStage::init(widths[2], widths[3], device),
            stage5: ConvStage::init(widths[3], widths[4], device),
            conv6: Conv2dConfig::new([widths[4], Encoder::<B>::STRIDE32_CHANNELS], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv7: Conv2dConfig::new(
                [
                    Encoder::<B>::STRIDE32_CHANNELS,
                    Encoder::<B>::STRIDE32_CHANNELS,
                ],
                [1, 1],
            )
            .with_padding(PaddingConfig2d::Valid)
            .init(device),
            relu: Relu::new(),
        }
    }
}

/// The feature encoder.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub(crate) stage1: ConvStage<B>,
    pub(crate) stage2: ConvStage<B>,
    pub(crate) stage3: ConvStage<B>,
    pub(crate) stage4: ConvStage<B>,
    pub(crate) stage5: ConvStage<B>,
    pub(crate) conv6: Conv2d<B>,
    pub(crate) conv7: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> Encoder<B> {
    /// Output widths of the five pooled stages.
    pub const STAGE_CHANNELS: [usize; 5] = [64, 128, 256, 512, 512];
    /// Channels of the stride-8 tap.
    pub const STRIDE8_CHANNELS: usize = Self::STAGE_CHANNELS[2];
    /// Channels of the stride-16 tap.
    pub const STRIDE16_CHANNELS: usize = Self::STAGE_CHANNELS[3];
    /// Channels of the stride-32 head.
    pub const STRIDE32_CHANNELS: usize = 1024;
    /// Minimum input extent so that the stride-32 map is non-empty.
    pub const MIN_INPUT_SIZE: usize = 32;

    /// Runs the encoder, producing the three tapped feature maps.
    ///
    /// # Errors
    ///
    /// Returns [`FcnError::ShapeMismatch`] when either spatial extent of the
    /// input is below [`Self::MIN_INPUT_SIZE`].
    pub fn forward(&self, x: Tensor<B, 4>) -> FcnResult<EncoderFeatures<B>> {
        let [_, _, h, w] = x.dims();
        if h < Self::MIN_INPUT_SIZE || w < Self::MIN_INPUT_SIZE {
            return Err(FcnError::ShapeMismatch {
                context: "encoder input".to_string(),
                expected: format!(
                    "spatial extents of at least {0}x{0}",
                    Self::MIN_INPUT_SIZE
                ),
                actual: format!("{h}x{w}"),
            });
        }

        let x = self.stage1.forward(x);
        let x = self.stage2.forward(x);
        let stride8 = self.stage3.forward(x);
        let stride16 = self.stage4.forward(stride8.clone());
        let x = self.stage5.forward(stride16.clone());
        let x = self.relu.forward(self.conv6.forward(x));
        let stride32 = self.relu.forward(self.conv7.forward(x));

        Ok(EncoderFeatures {
            stride8,
            stride16,
            stride32,
        })
    }

    /// Copies all encoder parameters from `source`, returning the names of
    /// the convolutions transferred.
    ///
    /// # Errors
    ///
    /// [`FcnError::SeedIncompatibility`] naming the first layer whose
    /// parameter shapes disagree.
    pub(crate) fn seed_from(mut self, source: &Self) -> FcnResult<(Self, Vec<String>)> {
        let mut copied = Vec::new();
        self.stage1 = self
            .stage1
            .seed_from(&source.stage1, "encoder.stage1", &mut copied)?;
        self.stage2 = self
            .stage2
            .seed_from(&source.stage2, "encoder.stage2", &mut copied)?;
        self.stage3 = self
            .stage3
            .seed_from(&source.stage3, "encoder.stage3", &mut copied)?;
        self.stage4 = self
            .stage4
            .seed_from(&source.stage4, "encoder.stage4", &mut copied)?;
        self.stage5 = self
            .stage5
            .seed_from(&source.stage5, "encoder.stage5", &mut copied)?;
        self.conv6 = copy_conv2d(self.conv6, &source.conv6, "encoder.conv6")?;
        copied.push("encoder.conv6".to_string());
        self.conv7 = copy_conv2d(self.conv7, &source.conv7, "encoder.conv7")?;
        copied.push("encoder.conv7".to_string());
        Ok((self, copied))
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn encoder_taps_have_expected_strides_and_channels() {
        let device = Default::default();
        let encoder = EncoderConfig::new().init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 96], &device);

        let features = encoder.forward(input).unwrap();
        assert_eq!(features.stride8.dims(), [1, 256, 8, 12]);
        assert_eq!(features.stride16.dims(), [1, 512, 4, 6]);
        assert_eq!(features.stride32.dims(), [1, 1024, 2, 3]);
    }

    #[test]
    fn encoder_handles_sizes_that_are_not_multiples_of_32() {
        let device = Default::default();
        let encoder = EncoderConfig::new().init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 97, 113], &device);

        let features = encoder.forward(input).unwrap();
        assert_eq!(features.stride8.dims(), [1, 256, 12, 14]);
        assert_eq!(features.stride16.dims(), [1, 512, 6, 7]);
        assert_eq!(features.stride32.dims(), [1, 1024, 3, 3]);
    }

    #[test]
    fn encoder_rejects_undersized_input() {
        let device = Default::default();
        let encoder = EncoderConfig::new().init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 64], &device);

        match encoder.forward(input) {
            Err(FcnError::ShapeMismatch { context, .. }) => {
                assert_eq!(context, "encoder input");
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }
}
