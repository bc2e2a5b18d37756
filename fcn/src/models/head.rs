//! Score heads: 1x1 projections from feature space to per-class scores.

use core::ops::Deref;

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};

use crate::error::{FcnError, FcnResult};

/// Configuration for a [`ScoreHead`].
#[derive(Config, Debug)]
pub struct ScoreHeadConfig {
    /// Expected channel count of the incoming feature map.
    pub in_channels: usize,
    /// Number of output classes K.
    pub num_classes: usize,
}

impl ScoreHeadConfig {
    /// Initializes a [`ScoreHead`].
    ///
    /// Weights and bias start at zero, the FCN scoring convention: a freshly
    /// added head contributes nothing until training moves it, so a fused
    /// pipeline initially reproduces the prediction of its seed.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ScoreHead<B> {
        let mut conv = Conv2dConfig::new([self.in_channels, self.num_classes], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        conv.weight = Param::from_tensor(conv.weight.deref().zeros_like());
        conv.bias = conv
            .bias
            .map(|bias| Param::from_tensor(bias.deref().zeros_like()));

        ScoreHead {
            conv,
            in_channels: self.in_channels,
        }
    }
}

/// A 1x1 convolution projecting a feature map `[N, C, h, w]` to per-pixel
/// class scores `[N, K, h, w]`. Pure function of its input and parameters.
#[derive(Module, Debug)]
pub struct ScoreHead<B: Backend> {
    pub(crate) conv: Conv2d<B>,
    in_channels: usize,
}

impl<B: Backend> ScoreHead<B> {
    /// Projects a feature map to a score map.
    ///
    /// # Errors
    ///
    /// Returns [`FcnError::ShapeMismatch`] if the feature map's channel
    /// count does not match the projection.
    pub fn forward(&self, features: Tensor<B, 4>) -> FcnResult<Tensor<B, 4>> {
        let [_, channels, _, _] = features.dims();
        if channels != self.in_channels {
            return Err(FcnError::ShapeMismatch {
                context: "score head input".to_string(),
                expected: format!("{} channels", self.in_channels),
                actual: format!("{channels} channels"),
            });
        }
        Ok(self.conv.forward(features))
    }
}
