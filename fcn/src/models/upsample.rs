//! Learned upsampling with exact crop alignment.
//!
//! Feature map sizes at different strides do not line up exactly (pooling
//! floors odd extents), so every upsampling step is followed by a
//! deterministic centered crop to the caller-supplied target size. The
//! transposed-convolution kernel is initialized to a bilinear interpolation
//! filter but trains like any other parameter.

use burn::{
    module::Param,
    nn::conv::{ConvTranspose2d, ConvTranspose2dConfig},
    prelude::*,
    tensor::TensorData,
};

use crate::error::{FcnError, FcnResult};

/// Builds the dual-diagonal bilinear interpolation kernel used to
/// initialize a learned upsampler: `[channels, channels, 2f, 2f]`, where
/// entry `[c][c]` holds the separable bilinear filter for factor `f` and
/// all cross-channel entries are zero.
pub fn bilinear_kernel<B: Backend>(
    channels: usize,
    factor: usize,
    device: &Device<B>,
) -> Tensor<B, 4> {
    let size = 2 * factor;
    let half = ((size + 1) / 2) as f64;
    let center = if size % 2 == 1 { half - 1.0 } else { half - 0.5 };

    let mut filter = vec![0.0f32; size * size];
    for (i, row) in filter.chunks_mut(size).enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            let fi = 1.0 - (i as f64 - center).abs() / half;
            let fj = 1.0 - (j as f64 - center).abs() / half;
            *value = (fi * fj) as f32;
        }
    }

    let mut weights = vec![0.0f32; channels * channels * size * size];
    for c in 0..channels {
        let offset = (c * channels + c) * size * size;
        weights[offset..offset + size * size].copy_from_slice(&filter);
    }

    let data = TensorData::new(weights, [channels, channels, size, size]);
    Tensor::from_data(data, device)
}

/// Configuration for an [`Upsampler`].
#[derive(Config, Debug)]
pub struct UpsamplerConfig {
    /// Channel count preserved through the upsampling.
    pub channels: usize,
    /// Integer upsampling factor (2 for inter-stride steps, 8/16/32 for the
    /// final lift to input resolution).
    pub factor: usize,
}

impl UpsamplerConfig {
    /// Initializes an [`Upsampler`] with a bilinear-initialized kernel.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Upsampler<B> {
        let kernel = 2 * self.factor;
        let mut conv = ConvTranspose2dConfig::new([self.channels, self.channels], [kernel, kernel])
            .with_stride([self.factor, self.factor])
            .with_bias(false)
            .init(device);
        conv.weight = Param::from_tensor(bilinear_kernel(self.channels, self.factor, device));

        Upsampler {
            conv,
            factor: self.factor,
        }
    }
}

/// Learned transposed-convolution upsampling followed by a centered crop.
#[derive(Module, Debug)]
pub struct Upsampler<B: Backend> {
    pub(crate) conv: ConvTranspose2d<B>,
    factor: usize,
}

impl<B: Backend> Upsampler<B> {
    /// The configured upsampling factor.
    pub const fn factor(&self) -> usize {
        self.factor
    }

    /// Upsamples `x` by the configured factor and center-crops the result
    /// to exactly `[target_h, target_w]`.
    ///
    /// The crop offset is `floor((enlarged - target) / 2)` per axis.
    ///
    /// # Errors
    ///
    /// Returns [`FcnError::ShapeMismatch`] when the enlarged map is smaller
    /// than the target along either axis; that signals a misconfigured
    /// factor/target pairing and is never silently clamped.
    pub fn forward(&self, x: Tensor<B, 4>, target: [usize; 2]) -> FcnResult<Tensor<B, 4>> {
        let enlarged = self.conv.forward(x);
        let [batch, channels, h, w] = enlarged.dims();
        let [target_h, target_w] = target;

        if h < target_h || w < target_w {
            return Err(FcnError::ShapeMismatch {
                context: format!("upsampler (factor {}) crop", self.factor),
                expected: format!("enlarged map of at least {target_h}x{target_w}"),
                actual: format!("{h}x{w}"),
            });
        }

        let top = (h - target_h) / 2;
        let left = (w - target_w) / 2;
        Ok(enlarged.slice([
            0..batch,
            0..channels,
            top..top + target_h,
            left..left + target_w,
        ]))
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn bilinear_kernel_factor_two_values() {
        let device = Default::default();
        let kernel = bilinear_kernel::<TestBackend>(1, 2, &device);
        assert_eq!(kernel.dims(), [1, 1, 4, 4]);

        let values: Vec<f32> = kernel.into_data().convert::<f32>().to_vec().unwrap();
        // Separable filter from the 1-D taps [0.25, 0.75, 0.75, 0.25].
        let taps = [0.25f32, 0.75, 0.75, 0.25];
        for i in 0..4 {
            for j in 0..4 {
                let expected = taps[i] * taps[j];
                assert!((values[i * 4 + j] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn bilinear_kernel_is_diagonal_across_channels() {
        let device = Default::default();
        let kernel = bilinear_kernel::<TestBackend>(3, 2, &device);
        let values: Vec<f32> = kernel.into_data().convert::<f32>().to_vec().unwrap();

        for cin in 0..3 {
            for cout in 0..3 {
                let offset = (cin * 3 + cout) * 16;
                let energy: f32 = values[offset..offset + 16].iter().sum();
                if cin == cout {
                    assert!(energy > 0.0);
                } else {
                    assert_eq!(energy, 0.0);
                }
            }
        }
    }

    #[test]
    fn upsample_then_crop_hits_target_exactly() {
        let device = Default::default();
        // Odd and even targets at every stride in the family.
        for (factor, input, target) in [
            (2usize, [3usize, 5usize], [6usize, 9usize]),
            (2, [4, 4], [8, 8]),
            (8, [12, 14], [97, 113]),
            (16, [6, 7], [97, 113]),
            (32, [3, 3], [96, 96]),
            (32, [4, 4], [97, 128]),
        ] {
            let upsampler = UpsamplerConfig::new(5, factor).init::<TestBackend>(&device);
            let x = Tensor::<TestBackend, 4>::random(
                [1, 5, input[0], input[1]],
                Distribution::Normal(0.0, 1.0),
                &device,
            );
            let out = upsampler.forward(x, target).unwrap();
            assert_eq!(out.dims(), [1, 5, target[0], target[1]]);
        }
    }

    #[test]
    fn crop_never_overshoots() {
        let device = Default::default();
        let upsampler = UpsamplerConfig::new(2, 2).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::zeros([1, 2, 3, 3], &device);

        // Enlarged size is 2*3 + 2 = 8; a 9-pixel target must fail.
        match upsampler.forward(x, [9, 4]) {
            Err(FcnError::ShapeMismatch { context, .. }) => {
                assert!(context.contains("upsampler"));
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn bilinear_upsampling_preserves_constant_maps() {
        let device = Default::default();
        let upsampler = UpsamplerConfig::new(1, 2).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 6, 6], &device);

        // Interior of a bilinear-upsampled constant map stays constant; the
        // centered crop discards the partially-covered border.
        let out = upsampler.forward(x, [10, 10]).unwrap();
        let values: Vec<f32> = out.into_data().convert::<f32>().to_vec().unwrap();
        for value in values {
            assert!((value - 1.0).abs() < 1e-5);
        }
    }
}
