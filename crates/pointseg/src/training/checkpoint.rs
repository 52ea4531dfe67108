//! Per-epoch model checkpoints.
//!
//! Files are named `seg_model_<class>_<epoch>.mpk` inside the output
//! directory, written with burn's named MessagePack recorder at full precision.

use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};

use crate::error::{Result, SegError};
use crate::model::{PointNetSeg, PointNetSegConfig, PointNetSegRecord};

const CHECKPOINT_EXTENSION: &str = "mpk";

/// Path of the checkpoint for `epoch`, including the recorder's extension.
pub fn checkpoint_path(outf: &Path, class_choice: &str, epoch: usize) -> PathBuf {
    outf.join(format!(
        "seg_model_{class_choice}_{epoch}.{CHECKPOINT_EXTENSION}"
    ))
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Save model weights to `path`. Existing files at the same path are replaced.
pub fn save_checkpoint<B: Backend>(model: &PointNetSeg<B>, path: &Path) -> Result<()> {
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder())
        .map_err(|e| SegError::io(path, std::io::Error::other(e.to_string())))
}

/// Build a network from `config` and load saved weights on top.
///
/// Fails with `SegError::ModelLoad` when the file is missing, unreadable, or
/// holds parameters of a different layout than `config` describes. A
/// checkpoint with a feature transform only loads into a model with one, and
/// the reverse.
pub fn load_checkpoint<B: Backend>(
    config: &PointNetSegConfig,
    path: &Path,
    device: &B::Device,
) -> Result<PointNetSeg<B>> {
    if !path.is_file() {
        return Err(SegError::ModelLoad(format!(
            "checkpoint {} does not exist",
            path.display()
        )));
    }
    let record: PointNetSegRecord<B> =
        Recorder::<B>::load(&recorder(), path.to_path_buf(), device).map_err(|e| {
            SegError::ModelLoad(format!("failed to load checkpoint {}: {e}", path.display()))
        })?;
    let saved_with_transform = record.feature_transform.is_some();
    if saved_with_transform != config.feature_transform {
        return Err(SegError::ModelLoad(format!(
            "checkpoint {} has feature_transform={saved_with_transform}, model has feature_transform={}",
            path.display(),
            config.feature_transform
        )));
    }

    let fresh = config.init::<B>(device);
    let expected = fresh.num_params();

    // burn panics on some record/module mismatches instead of returning an error.
    let loaded = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        fresh.load_record(record)
    }))
    .map_err(|_| {
        SegError::ModelLoad(format!(
            "checkpoint {} does not match the model layout",
            path.display()
        ))
    })?;

    let found = loaded.num_params();
    if found != expected {
        return Err(SegError::ModelLoad(format!(
            "checkpoint {} has {found} parameters, model expects {expected}",
            path.display()
        )));
    }
    tracing::info!(path = %path.display(), params = found, "Restored model weights");
    Ok(loaded)
}
