//! Loss functions for FCN training.

pub mod cross_entropy;

pub use cross_entropy::{validate_labels, MaskedCrossEntropy, MaskedCrossEntropyConfig};
