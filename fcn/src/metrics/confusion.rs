//! Confusion-matrix accumulation and the derived segmentation scores.
//!
//! The accumulator runs over an entire dataset split before any score is
//! derived; per-image values of these metrics are not meaningful. All
//! arithmetic on the finalized matrix is done in `f64` from exact `u64`
//! counts, so the scores are reproducible regardless of backend.

use burn::{
    prelude::*,
    tensor::Int,
};

use crate::error::{FcnError, FcnResult};

/// A `K x K` count matrix, `counts[true][pred]`, owned by one evaluation
/// run. Reset at the start of each pass; never shared across concurrent
/// evaluations.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    num_classes: usize,
    ignore_index: i64,
    counts: Vec<u64>,
}

/// The four scalar scores derived from a finalized [`ConfusionMatrix`],
/// plus the classes that were excluded from the means because they never
/// appear as ground truth. Immutable once computed.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReport {
    /// Fraction of non-ignored pixels predicted correctly.
    pub overall_accuracy: f64,
    /// Mean of per-class accuracies over classes with ground-truth pixels.
    pub mean_accuracy: f64,
    /// Mean intersection-over-union over classes with ground-truth pixels.
    pub mean_iou: f64,
    /// Per-class IU weighted by ground-truth frequency.
    pub fwavacc: f64,
    /// Classes with zero ground-truth occurrences, excluded from the means.
    pub excluded_classes: Vec<usize>,
}

impl ConfusionMatrix {
    /// Creates an empty accumulator for `num_classes` classes.
    pub fn new(num_classes: usize, ignore_index: usize) -> Self {
        Self {
            num_classes,
            ignore_index: ignore_index as i64,
            counts: vec![0; num_classes * num_classes],
        }
    }

    /// Number of classes K.
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Count at `[label][pred]`.
    pub fn count(&self, label: usize, pred: usize) -> u64 {
        self.counts[label * self.num_classes + pred]
    }

    /// Total non-ignored pixels accumulated so far. Equals the sum over all
    /// rows and columns by construction.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Clears all counts for a fresh evaluation pass.
    pub fn reset(&mut self) {
        self.counts.fill(0);
    }

    /// Accumulates one batch of flat label/prediction pairs, skipping
    /// ignored pixels.
    ///
    /// # Errors
    ///
    /// Returns [`FcnError::InvalidLabel`] when a non-ignored label or a
    /// prediction falls outside `[0, K)`; the batch is rejected without
    /// partially updating the matrix.
    pub fn update(&mut self, labels: &[i64], predictions: &[i64]) -> FcnResult<()> {
        if labels.len() != predictions.len() {
            return Err(FcnError::ShapeMismatch {
                context: "confusion matrix update".to_string(),
                expected: format!("{} predictions", labels.len()),
                actual: format!("{}", predictions.len()),
            });
        }

        let k = self.num_classes as i64;
        let invalid = labels
            .iter()
            .zip(predictions)
            .filter(|&(&label, &pred)| {
                (label != self.ignore_index && !(0..k).contains(&label))
                    || !(0..k).contains(&pred)
            })
            .count();
        if invalid > 0 {
            return Err(FcnError::InvalidLabel {
                count: invalid,
                num_classes: self.num_classes,
                ignore_index: self.ignore_index,
            });
        }

        for (&label, &pred) in labels.iter().zip(predictions) {
            if label == self.ignore_index {
                continue;
            }
            self.counts[label as usize * self.num_classes + pred as usize] += 1;
        }
        Ok(())
    }

    /// Accumulates one batch from raw score maps `[N, K, H, W]` and label
    /// maps `[N, H, W]`; predictions are the argmax over the class axis.
    ///
    /// # Errors
    ///
    /// [`FcnError::ShapeMismatch`] when scores and labels disagree in shape,
    /// plus the errors of [`Self::update`].
    pub fn update_scores<B: Backend>(
        &mut self,
        scores: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
    ) -> FcnResult<()> {
        let [n, k, h, w] = scores.dims();
        if labels.dims() != [n, h, w] || k != self.num_classes {
            return Err(FcnError::ShapeMismatch {
                context: "metric accumulation".to_string(),
                expected: format!("scores [{n}, {}, {h}, {w}] with labels [{n}, {h}, {w}]", self.num_classes),
                actual: format!("scores [{n}, {k}, {h}, {w}] with labels {:?}", labels.dims()),
            });
        }

        let predictions = scores.argmax(1).squeeze::<3>(1);
        self.update(&int_tensor_to_vec(labels)?, &int_tensor_to_vec(predictions)?)
    }

    /// Derives the four scores from the finalized matrix.
    ///
    /// Classes with zero ground-truth count are excluded from mean
    /// accuracy, mean IU and FWAVACC (never silently scored as 0 or 1) and
    /// recorded in the report.
    ///
    /// # Errors
    ///
    /// Returns [`FcnError::EmptyEvaluation`] when nothing was accumulated.
    pub fn report(&self) -> FcnResult<MetricReport> {
        let k = self.num_classes;
        let n = self.total();
        if n == 0 {
            return Err(FcnError::EmptyEvaluation);
        }
        let n = n as f64;

        let true_counts: Vec<u64> = (0..k)
            .map(|i| (0..k).map(|j| self.count(i, j)).sum())
            .collect();
        let pred_counts: Vec<u64> = (0..k)
            .map(|i| (0..k).map(|j| self.count(j, i)).sum())
            .collect();

        let diagonal: u64 = (0..k).map(|i| self.count(i, i)).sum();
        let overall_accuracy = diagonal as f64 / n;

        let mut accuracy_sum = 0.0;
        let mut iou_sum = 0.0;
        let mut fwavacc = 0.0;
        let mut present = 0usize;
        let mut excluded_classes = Vec::new();

        for i in 0..k {
            if true_counts[i] == 0 {
                excluded_classes.push(i);
                continue;
            }
            present += 1;

            let hits = self.count(i, i) as f64;
            let truth = true_counts[i] as f64;
            let union = truth + pred_counts[i] as f64 - hits;

            accuracy_sum += hits / truth;
            let iou = hits / union;
            iou_sum += iou;
            fwavacc += truth / n * iou;
        }

        Ok(MetricReport {
            overall_accuracy,
            mean_accuracy: accuracy_sum / present as f64,
            mean_iou: iou_sum / present as f64,
            fwavacc,
            excluded_classes,
        })
    }
}

fn int_tensor_to_vec<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>,
) -> FcnResult<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|err| FcnError::ShapeMismatch {
            context: "tensor readback".to_string(),
            expected: "contiguous i64 data".to_string(),
            actual: format!("{err:?}"),
        })
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    use super::*;

    type TestBackend = NdArray;

    fn close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn perfect_prediction_scores_one_everywhere() {
        let mut matrix = ConfusionMatrix::new(3, 255);
        let labels = vec![0, 1, 2, 2, 1, 0, 1, 1];
        matrix.update(&labels, &labels).unwrap();

        let report = matrix.report().unwrap();
        close(report.overall_accuracy, 1.0);
        close(report.mean_accuracy, 1.0);
        close(report.mean_iou, 1.0);
        close(report.fwavacc, 1.0);
        assert!(report.excluded_classes.is_empty());
    }

    #[test]
    fn two_class_fixture_reproduces_exact_values() {
        // M = [[5, 1], [2, 2]], n = 10.
        let mut matrix = ConfusionMatrix::new(2, 255);
        let mut labels = Vec::new();
        let mut preds = Vec::new();
        for (label, pred, count) in [(0, 0, 5), (0, 1, 1), (1, 0, 2), (1, 1, 2)] {
            labels.extend(std::iter::repeat(label).take(count));
            preds.extend(std::iter::repeat(pred).take(count));
        }
        matrix.update(&labels, &preds).unwrap();

        let report = matrix.report().unwrap();
        close(report.overall_accuracy, 0.7);
        close(report.mean_accuracy, (5.0 / 6.0 + 2.0 / 4.0) / 2.0);
        close(report.mean_iou, 0.5125);
        close(report.fwavacc, 0.535);
    }

    #[test]
    fn absent_class_is_excluded_not_scored() {
        // Class 1 never appears as ground truth but attracts predictions.
        let mut matrix = ConfusionMatrix::new(3, 255);
        matrix
            .update(&[0, 0, 2, 2], &[0, 1, 2, 1])
            .unwrap();

        let report = matrix.report().unwrap();
        assert_eq!(report.excluded_classes, vec![1]);
        // Class 0: acc 1/2, IU 1/2; class 2: acc 1/2, IU 1/2.
        close(report.mean_accuracy, 0.5);
        close(report.mean_iou, 0.5);
    }

    #[test]
    fn ignored_pixels_are_not_counted() {
        let mut matrix = ConfusionMatrix::new(2, 255);
        matrix.update(&[0, 255, 1, 255], &[0, 1, 1, 0]).unwrap();

        assert_eq!(matrix.total(), 2);
        let report = matrix.report().unwrap();
        close(report.overall_accuracy, 1.0);
    }

    #[test]
    fn row_sums_match_accumulated_pixels() {
        let mut matrix = ConfusionMatrix::new(4, 255);
        let labels = vec![0, 1, 2, 3, 3, 2, 1, 0, 255, 1];
        let preds = vec![1, 1, 2, 0, 3, 2, 0, 0, 2, 1];
        matrix.update(&labels, &preds).unwrap();

        let non_ignored = labels.iter().filter(|&&l| l != 255).count() as u64;
        assert_eq!(matrix.total(), non_ignored);
    }

    #[test]
    fn invalid_labels_reject_the_batch_atomically() {
        let mut matrix = ConfusionMatrix::new(2, 255);
        let result = matrix.update(&[0, 5, 1], &[0, 1, 1]);
        assert!(matches!(result, Err(FcnError::InvalidLabel { count: 1, .. })));
        assert_eq!(matrix.total(), 0);
    }

    #[test]
    fn empty_accumulation_has_no_metrics() {
        let matrix = ConfusionMatrix::new(2, 255);
        assert!(matches!(matrix.report(), Err(FcnError::EmptyEvaluation)));
    }

    #[test]
    fn tensor_accumulation_uses_argmax() {
        let device = Default::default();
        let mut matrix = ConfusionMatrix::new(2, 255);

        // Scores favour class 1 at every pixel.
        let scores = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0], [1, 2, 2, 2]),
            &device,
        );
        let labels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::new(vec![1i64, 0, 255, 1], [1, 2, 2]),
            &device,
        );

        matrix.update_scores(scores, labels).unwrap();
        assert_eq!(matrix.total(), 3);
        assert_eq!(matrix.count(1, 1), 2);
        assert_eq!(matrix.count(0, 1), 1);
    }

    #[test]
    fn reset_clears_for_a_new_pass() {
        let mut matrix = ConfusionMatrix::new(2, 255);
        matrix.update(&[0, 1], &[0, 1]).unwrap();
        matrix.reset();
        assert_eq!(matrix.total(), 0);
    }
}
