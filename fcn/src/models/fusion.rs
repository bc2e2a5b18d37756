//! Additive skip fusion of score maps.

use burn::prelude::*;

use crate::error::{FcnError, FcnResult};

/// Fuses two score maps of identical shape by elementwise addition.
///
/// The upsampler's crop step is what guarantees shape equality upstream;
/// fusion itself never resizes.
///
/// # Errors
///
/// Returns [`FcnError::ShapeMismatch`] when the operands differ in shape.
pub fn fuse<B: Backend>(a: Tensor<B, 4>, b: Tensor<B, 4>) -> FcnResult<Tensor<B, 4>> {
    if a.dims() != b.dims() {
        return Err(FcnError::ShapeMismatch {
            context: "skip fusion".to_string(),
            expected: format!("{:?}", a.dims()),
            actual: format!("{:?}", b.dims()),
        });
    }
    Ok(a + b)
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn fusion_is_commutative_and_shape_preserving() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 4>::random(
            [2, 21, 6, 9],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let b = Tensor::<TestBackend, 4>::random(
            [2, 21, 6, 9],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let ab = fuse(a.clone(), b.clone()).unwrap();
        let ba = fuse(b, a.clone()).unwrap();

        assert_eq!(ab.dims(), a.dims());
        let diff = (ab - ba).abs().max().into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn fusion_rejects_shape_mismatch() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 4>::zeros([1, 21, 6, 9], &device);
        let b = Tensor::<TestBackend, 4>::zeros([1, 21, 7, 9], &device);

        assert!(matches!(
            fuse(a, b),
            Err(FcnError::ShapeMismatch { .. })
        ));
    }
}
