//! Model components: encoder, score heads, upsampling, fusion, and the
//! variant pipelines composed from them.

pub mod encoder;
pub mod fcn;
pub mod fusion;
pub mod head;
pub mod upsample;

pub use encoder::{Encoder, EncoderConfig, EncoderFeatures};
pub use fcn::{Fcn, FcnConfig, FcnScores};
pub use fusion::fuse;
pub use head::{ScoreHead, ScoreHeadConfig};
pub use upsample::{bilinear_kernel, Upsampler, UpsamplerConfig};
