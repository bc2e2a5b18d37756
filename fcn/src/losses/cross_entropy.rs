//! Masked per-pixel softmax cross-entropy.

use burn::{
    prelude::*,
    tensor::{activation::log_softmax, ElementConversion, Int},
};

use crate::error::{FcnError, FcnResult};

/// Configuration for [`MaskedCrossEntropy`].
#[derive(Config, Debug)]
pub struct MaskedCrossEntropyConfig {
    /// Number of classes K.
    pub num_classes: usize,
    /// Label value excluded from loss and gradient.
    #[config(default = 255)]
    pub ignore_index: usize,
}

impl MaskedCrossEntropyConfig {
    /// Initializes the loss.
    pub const fn init(&self) -> MaskedCrossEntropy {
        MaskedCrossEntropy {
            num_classes: self.num_classes,
            ignore_index: self.ignore_index as i64,
        }
    }
}

/// Per-pixel softmax cross-entropy with an ignore sentinel.
///
/// Ignored pixels contribute neither to the loss sum nor to the gradient,
/// and the loss is normalized by the count of non-ignored pixels, so a
/// heavily masked batch is not penalized.
#[derive(Debug, Clone)]
pub struct MaskedCrossEntropy {
    num_classes: usize,
    ignore_index: i64,
}

impl MaskedCrossEntropy {
    /// The ignore sentinel in effect.
    pub const fn ignore_index(&self) -> i64 {
        self.ignore_index
    }

    /// Computes the scalar loss for a batch.
    ///
    /// `logits` are `[N, K, H, W]` unnormalized scores; `targets` are
    /// `[N, H, W]` class indices or the ignore sentinel. A batch whose
    /// pixels are all ignored yields a defined zero loss.
    ///
    /// # Errors
    ///
    /// [`FcnError::ShapeMismatch`] when logits and targets disagree in
    /// batch or spatial extents or K differs from the configuration;
    /// [`FcnError::InvalidLabel`] when any label is outside
    /// `[0, K)` and not the ignore sentinel.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> FcnResult<Tensor<B, 1>> {
        let [n, k, h, w] = logits.dims();
        let target_dims = targets.dims();
        if target_dims != [n, h, w] || k != self.num_classes {
            return Err(FcnError::ShapeMismatch {
                context: "cross-entropy inputs".to_string(),
                expected: format!("logits [{n}, {}, {h}, {w}] with targets [{n}, {h}, {w}]", self.num_classes),
                actual: format!("logits [{n}, {k}, {h}, {w}] with targets {target_dims:?}"),
            });
        }

        validate_labels(&targets, self.num_classes, self.ignore_index)?;

        let device = logits.device();
        let ignore_mask = targets.clone().equal_elem(self.ignore_index);
        let valid_count: i64 = ignore_mask
            .clone()
            .bool_not()
            .int()
            .sum()
            .into_scalar()
            .elem();
        if valid_count == 0 {
            return Ok(Tensor::zeros([1], &device));
        }

        let log_probs = log_softmax(logits, 1);
        let safe_targets = targets.mask_fill(ignore_mask.clone(), 0);
        let picked = log_probs
            .gather(1, safe_targets.unsqueeze_dim::<4>(1))
            .squeeze::<3>(1);
        let nll = picked.neg().mask_fill(ignore_mask, 0.0);

        Ok(nll.sum().div_scalar(valid_count as f32))
    }
}

/// Rejects label tensors containing values outside `[0, num_classes)` that
/// are not the ignore sentinel.
///
/// # Errors
///
/// Returns [`FcnError::InvalidLabel`] with the offending pixel count.
pub fn validate_labels<B: Backend>(
    targets: &Tensor<B, 3, Int>,
    num_classes: usize,
    ignore_index: i64,
) -> FcnResult<()> {
    let out_of_range = targets.clone().greater_equal_elem(num_classes as i64).int()
        * targets.clone().not_equal_elem(ignore_index).int();
    let negative = targets.clone().lower_elem(0).int();
    let count: i64 = (out_of_range + negative).sum().into_scalar().elem();

    if count > 0 {
        return Err(FcnError::InvalidLabel {
            count: count as usize,
            num_classes,
            ignore_index,
        });
    }
    Ok(())
}
