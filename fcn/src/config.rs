//! Architecture variant selection for the FCN family.
//!
//! The four variants form a closed tagged set rather than a class
//! hierarchy: each one maps to a fixed pipeline composed from the same
//! stride-level stages (score head, learned upsample + crop, skip fusion).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::FcnError;

/// The FCN architecture variants.
///
/// `Fcn8sAtOnce` shares the `Fcn8s` forward topology and differs only in
/// the training protocol: it is trained in a single stage from fresh
/// parameters with auxiliary per-branch loss weighting, instead of being
/// progressively seeded from a trained `Fcn16s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FcnVariant {
    /// Single stride-32 prediction upsampled 32x to input size.
    Fcn32s,
    /// Stride-32 prediction fused with a stride-16 skip, upsampled 16x.
    Fcn16s,
    /// Two skip fusions (stride 16 and stride 8), upsampled 8x.
    Fcn8s,
    /// `Fcn8s` topology trained jointly in one stage.
    Fcn8sAtOnce,
}

impl FcnVariant {
    /// Whether the pipeline fuses a stride-16 score map.
    pub const fn fuses_stride16(self) -> bool {
        !matches!(self, Self::Fcn32s)
    }

    /// Whether the pipeline fuses a stride-8 score map.
    pub const fn fuses_stride8(self) -> bool {
        matches!(self, Self::Fcn8s | Self::Fcn8sAtOnce)
    }

    /// Upsampling factor of the final learned upsampler.
    pub const fn final_factor(self) -> usize {
        match self {
            Self::Fcn32s => 32,
            Self::Fcn16s => 16,
            Self::Fcn8s | Self::Fcn8sAtOnce => 8,
        }
    }

    /// The simpler variant whose trained parameters seed this one, if the
    /// staged protocol applies.
    pub const fn seeding_predecessor(self) -> Option<Self> {
        match self {
            Self::Fcn32s | Self::Fcn8sAtOnce => None,
            Self::Fcn16s => Some(Self::Fcn32s),
            Self::Fcn8s => Some(Self::Fcn16s),
        }
    }

    /// Short identifier used in checkpoints and on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fcn32s => "32s",
            Self::Fcn16s => "16s",
            Self::Fcn8s => "8s",
            Self::Fcn8sAtOnce => "8s-at-once",
        }
    }
}

impl fmt::Display for FcnVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FcnVariant {
    type Err = FcnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "32s" => Ok(Self::Fcn32s),
            "16s" => Ok(Self::Fcn16s),
            "8s" => Ok(Self::Fcn8s),
            "8s-at-once" | "8s_at_once" => Ok(Self::Fcn8sAtOnce),
            other => Err(FcnError::InvalidConfiguration {
                reason: format!(
                    "unknown variant `{other}`, expected one of 32s, 16s, 8s, 8s-at-once"
                ),
            }),
        }
    }
}

/// The default label value excluded from loss and metric computation.
pub const DEFAULT_IGNORE_INDEX: usize = 255;

/// Default class count (PASCAL VOC: 20 object classes plus background).
pub const DEFAULT_NUM_CLASSES: usize = 21;

/// Per-channel RGB mean used to normalize input images.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel RGB standard deviation used to normalize input images.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_pipeline_table() {
        assert_eq!(FcnVariant::Fcn32s.final_factor(), 32);
        assert_eq!(FcnVariant::Fcn16s.final_factor(), 16);
        assert_eq!(FcnVariant::Fcn8s.final_factor(), 8);
        assert_eq!(FcnVariant::Fcn8sAtOnce.final_factor(), 8);

        assert!(!FcnVariant::Fcn32s.fuses_stride16());
        assert!(FcnVariant::Fcn16s.fuses_stride16());
        assert!(!FcnVariant::Fcn16s.fuses_stride8());
        assert!(FcnVariant::Fcn8s.fuses_stride8());
        assert!(FcnVariant::Fcn8sAtOnce.fuses_stride8());
    }

    #[test]
    fn staged_protocol_order() {
        assert_eq!(FcnVariant::Fcn32s.seeding_predecessor(), None);
        assert_eq!(
            FcnVariant::Fcn16s.seeding_predecessor(),
            Some(FcnVariant::Fcn32s)
        );
        assert_eq!(
            FcnVariant::Fcn8s.seeding_predecessor(),
            Some(FcnVariant::Fcn16s)
        );
        assert_eq!(FcnVariant::Fcn8sAtOnce.seeding_predecessor(), None);
    }

    #[test]
    fn variant_round_trips_through_str() {
        for variant in [
            FcnVariant::Fcn32s,
            FcnVariant::Fcn16s,
            FcnVariant::Fcn8s,
            FcnVariant::Fcn8sAtOnce,
        ] {
            assert_eq!(variant.as_str().parse::<FcnVariant>().unwrap(), variant);
        }
        assert!("64s".parse::<FcnVariant>().is_err());
    }
}
