//! Dataset-level segmentation metrics.

mod confusion;

pub use confusion::{ConfusionMatrix, MetricReport};
