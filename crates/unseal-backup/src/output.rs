//! Staged output: assemble a backup's tree next to its destination, then
//! rename it into place.
//!
//! A failed or interrupted run leaves nothing at the destination; the staging
//! directory is removed when the `StagedOutput` is dropped uncommitted.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use unseal_core::{UnsealError, UnsealResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputPolicy {
    /// Replace an existing destination instead of failing with `OutputExists`
    pub overwrite: bool,
}

/// Destination directory for the decrypted tree of `archive` under `root`.
///
/// `2025-01-05_backup.tar` → `<root>/2025-01-05_backup`
pub fn output_dir_for(archive: &Path, root: &Path) -> PathBuf {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".into());
    match file_name.strip_suffix(".tar").filter(|s| !s.is_empty()) {
        Some(stem) => root.join(stem),
        None => root.join(format!("{file_name}.decrypted")),
    }
}

/// A staging directory bound to its final destination.
#[derive(Debug)]
pub struct StagedOutput {
    dest: PathBuf,
    stage: TempDir,
    policy: OutputPolicy,
}

impl StagedOutput {
    /// Check the destination and create the staging directory beside it.
    pub fn prepare(dest: &Path, policy: OutputPolicy) -> UnsealResult<Self> {
        if dest.exists() && !policy.overwrite {
            return Err(UnsealError::OutputExists(dest.to_path_buf()));
        }
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stage = tempfile::Builder::new()
            .prefix(&format!(".{file_name}.unseal-"))
            .tempdir_in(parent)?;
        debug!("staging {} in {}", dest.display(), stage.path().display());

        Ok(Self {
            dest: dest.to_path_buf(),
            stage,
            policy,
        })
    }

    /// Directory the tree is written into until commit.
    pub fn path(&self) -> &Path {
        self.stage.path()
    }

    /// Move the staged tree to the destination, replacing it when allowed.
    pub fn commit(self) -> UnsealResult<PathBuf> {
        if self.dest.exists() {
            if !self.policy.overwrite {
                return Err(UnsealError::OutputExists(self.dest));
            }
            if self.dest.is_dir() {
                fs::remove_dir_all(&self.dest)?;
            } else {
                fs::remove_file(&self.dest)?;
            }
        }

        let staged = self.stage.keep();
        if let Err(e) = fs::rename(&staged, &self.dest) {
            let _ = fs::remove_dir_all(&staged);
            return Err(e.into());
        }
        Ok(self.dest)
    }
}
