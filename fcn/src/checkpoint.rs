//! Atomic model checkpoints.
//!
//! A checkpoint is a pair of files sharing one stem: `<stem>.mpk` holds
//! the parameter record, `<stem>.json` a small metadata sidecar with the
//! format version, variant and class count needed to rebuild the module
//! before the record is loaded into it. Both files are written to a
//! scratch name first and renamed into place, so a crash mid-write never
//! leaves a truncated checkpoint under the final name.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};

use crate::{
    config::FcnVariant,
    error::{FcnError, FcnResult},
    models::{Fcn, FcnConfig},
};

/// Bumped whenever the record layout changes incompatibly.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Sidecar describing a saved model, enough to rebuild it before loading.
#[derive(Config, Debug)]
pub struct CheckpointMeta {
    #[config(default = "CHECKPOINT_VERSION")]
    pub version: u32,
    pub variant: FcnVariant,
    pub num_classes: usize,
}

/// Saves `model` under `stem`, producing `<stem>.mpk` and `<stem>.json`.
///
/// # Errors
///
/// [`FcnError::Checkpoint`] on any filesystem or serialization failure;
/// the files under the final names are untouched in that case.
pub fn save<B: Backend>(model: &Fcn<B>, stem: &Path) -> FcnResult<()> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let scratch = scratch_stem(stem);

    model
        .clone()
        .save_file(&scratch, &recorder)
        .map_err(|err| checkpoint_error("recording parameters", stem, err))?;

    let meta = CheckpointMeta::new(model.variant(), model.num_classes());
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|err| checkpoint_error("encoding metadata", stem, err))?;
    fs::write(scratch.with_extension("json"), json)
        .map_err(|err| checkpoint_error("writing metadata", stem, err))?;

    fs::rename(scratch.with_extension("mpk"), stem.with_extension("mpk"))
        .map_err(|err| checkpoint_error("publishing parameters", stem, err))?;
    fs::rename(scratch.with_extension("json"), stem.with_extension("json"))
        .map_err(|err| checkpoint_error("publishing metadata", stem, err))?;

    Ok(())
}

/// Loads the checkpoint saved under `stem` onto `device`.
///
/// The sidecar is read first and the module rebuilt from it, so a
/// checkpoint of any variant or class count loads without the caller
/// knowing either in advance.
///
/// # Errors
///
/// [`FcnError::Checkpoint`] when either file is missing or unreadable or
/// the format version is unknown.
pub fn load<B: Backend>(stem: &Path, device: &Device<B>) -> FcnResult<(Fcn<B>, CheckpointMeta)> {
    let json = fs::read_to_string(stem.with_extension("json"))
        .map_err(|err| checkpoint_error("reading metadata", stem, err))?;
    let meta: CheckpointMeta = serde_json::from_str(&json)
        .map_err(|err| checkpoint_error("decoding metadata", stem, err))?;

    if meta.version != CHECKPOINT_VERSION {
        return Err(FcnError::Checkpoint {
            message: format!(
                "{}: unsupported checkpoint version {} (expected {})",
                stem.display(),
                meta.version,
                CHECKPOINT_VERSION
            ),
        });
    }

    let model = FcnConfig::new()
        .with_variant(meta.variant)
        .with_num_classes(meta.num_classes)
        .init(device)?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = model
        .load_file(stem, &recorder, device)
        .map_err(|err| checkpoint_error("loading parameters", stem, err))?;

    Ok((model, meta))
}

fn scratch_stem(stem: &Path) -> PathBuf {
    let mut name = stem.file_name().unwrap_or_default().to_os_string();
    name.push("-partial");
    stem.with_file_name(name)
}

fn checkpoint_error(action: &str, stem: &Path, err: impl std::fmt::Display) -> FcnError {
    FcnError::Checkpoint {
        message: format!("{action} for {}: {err}", stem.display()),
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;

    use super::*;

    type TestBackend = NdArray;

    fn temp_stem(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fcn-checkpoint-{tag}-{}", std::process::id()))
    }

    #[test]
    fn round_trip_preserves_identity_and_parameters() {
        let device = Default::default();
        let model = FcnConfig::new()
            .with_variant(FcnVariant::Fcn16s)
            .with_num_classes(7)
            .init::<TestBackend>(&device)
            .unwrap();

        let stem = temp_stem("round-trip");
        save(&model, &stem).unwrap();

        let (restored, meta) = load::<TestBackend>(&stem, &device).unwrap();
        assert_eq!(meta.version, CHECKPOINT_VERSION);
        assert_eq!(meta.variant, FcnVariant::Fcn16s);
        assert_eq!(meta.num_classes, 7);
        assert_eq!(restored.variant(), FcnVariant::Fcn16s);

        let diff = (restored.encoder.conv6.weight.val() - model.encoder.conv6.weight.val())
            .abs()
            .max()
            .into_scalar();
        assert_eq!(diff, 0.0);

        let _ = fs::remove_file(stem.with_extension("mpk"));
        let _ = fs::remove_file(stem.with_extension("json"));
    }

    #[test]
    fn no_scratch_files_survive_a_save() {
        let device = Default::default();
        let model = FcnConfig::new()
            .with_num_classes(3)
            .init::<TestBackend>(&device)
            .unwrap();

        let stem = temp_stem("scratch");
        save(&model, &stem).unwrap();

        let scratch = scratch_stem(&stem);
        assert!(!scratch.with_extension("mpk").exists());
        assert!(!scratch.with_extension("json").exists());

        let _ = fs::remove_file(stem.with_extension("mpk"));
        let _ = fs::remove_file(stem.with_extension("json"));
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let device = Default::default();
        let result = load::<TestBackend>(Path::new("/nonexistent/fcn-model"), &device);
        assert!(matches!(result, Err(FcnError::Checkpoint { .. })));
    }
}
