//! Screenshot artifacts

use image::GenericImageView;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{VerifyError, VerifyResult};
use crate::protocol::ScreenshotReason;

/// A screenshot that was written and decodes as an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub reason: ScreenshotReason,

    /// SHA-256 of the file contents
    pub sha256: String,

    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

impl Artifact {
    /// Check that `path` exists and decodes, and record its digest
    pub fn inspect(path: &Path, reason: ScreenshotReason) -> VerifyResult<Self> {
        if !path.exists() {
            return Err(VerifyError::MissingArtifact(path.to_path_buf()));
        }

        let data = std::fs::read(path)?;
        let img = image::load_from_memory(&data)?;
        let (width, height) = img.dimensions();

        let mut hasher = Sha256::new();
        hasher.update(&data);

        debug!("Artifact {} is {}x{}", path.display(), width, height);

        Ok(Self {
            path: path.to_path_buf(),
            reason,
            sha256: hex::encode(hasher.finalize()),
            width,
            height,
            bytes: data.len() as u64,
        })
    }
}

/// Remove screenshots left by an earlier run so they cannot satisfy this one
pub fn clear_stale(dir: &Path, relative: &[PathBuf]) -> VerifyResult<usize> {
    let mut removed = 0;
    for path in relative.iter().map(|p| dir.join(p)) {
        if path.is_file() {
            std::fs::remove_file(&path)?;
            info!("Removed stale artifact {}", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}
