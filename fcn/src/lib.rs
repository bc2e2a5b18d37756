//! Fully convolutional networks for semantic segmentation.
//!
//! The decoder family comes in four variants sharing one encoder: `32s`
//! predicts from the coarsest features alone, `16s` and `8s` fuse
//! progressively finer skip taps, and `8s-at-once` has the `8s` topology
//! but trains all stages jointly with auxiliary branch losses. Training
//! utilities (dataset loading, the iteration loop) live behind the
//! `train` feature; model construction, inference, checkpointing,
//! seeding and metrics are always available.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod losses;
pub mod metrics;
pub mod models;
pub mod seeding;

#[cfg(feature = "train")]
pub mod dataset;
#[cfg(feature = "train")]
pub mod training;

pub use config::{
    FcnVariant, DEFAULT_IGNORE_INDEX, DEFAULT_NUM_CLASSES, IMAGENET_MEAN, IMAGENET_STD,
};
pub use error::{FcnError, FcnResult};
pub use models::{Fcn, FcnConfig};
