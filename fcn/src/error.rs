//! Error types for FCN-Burn operations.

use thiserror::Error;

/// The error type for `FCN-Burn` operations.
///
/// Shape and seeding errors indicate a misconfigured architecture and are
/// fatal; label errors indicate a dataset defect and fail the offending
/// batch instead of silently clamping.
#[derive(Error, Debug)]
pub enum FcnError {
    /// Two tensors that must agree in shape do not, or a crop target
    /// exceeds the enlarged map. Never recovered by implicit resizing.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// The expected shape.
        expected: String,
        /// The shape actually seen.
        actual: String,
    },

    /// A layer shared by name between two variants has different parameter
    /// shapes, so progressive seeding cannot copy it.
    #[error(
        "seeding incompatibility at layer `{layer}`: source shape {source_shape}, \
         destination shape {destination}"
    )]
    SeedIncompatibility {
        /// The offending layer name.
        layer: String,
        /// Parameter shape in the source model.
        source_shape: String,
        /// Parameter shape in the destination model.
        destination: String,
    },

    /// Label values outside `[0, num_classes)` that are not the ignore
    /// sentinel. The whole batch is rejected.
    #[error(
        "{count} label value(s) outside [0, {num_classes}) and not equal to \
         ignore index {ignore_index}"
    )]
    InvalidLabel {
        /// How many offending pixels the batch contains.
        count: usize,
        /// The number of classes K.
        num_classes: usize,
        /// The ignore sentinel that was in effect.
        ignore_index: i64,
    },

    /// The requested accelerator index is not present on this backend.
    #[error("accelerator device {index} is not available on this backend")]
    DeviceUnavailable {
        /// The requested device index.
        index: i32,
    },

    /// An evaluation pass accumulated no non-ignored pixels, so no metric
    /// is defined.
    #[error("evaluation accumulated no non-ignored pixels; metrics are undefined")]
    EmptyEvaluation,

    /// Logically inconsistent configuration parameters.
    #[error("invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration is invalid.
        reason: String,
    },

    /// Error for when dataset operations fail.
    #[error("dataset error: {message}")]
    Dataset {
        /// The error message.
        message: String,
    },

    /// Error for when writing or reading a checkpoint fails.
    #[error("checkpoint error: {message}")]
    Checkpoint {
        /// The error message.
        message: String,
    },
}

/// A specialized `Result` type for `FCN-Burn` operations.
pub type FcnResult<T> = Result<T, FcnError>;
