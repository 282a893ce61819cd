//! Batch runs: decrypt several backups with one passphrase.

use std::path::PathBuf;

use secrecy::SecretString;
use tracing::{error, info};

use unseal_core::config::BatchPolicy;
use unseal_core::{ErrorKind, UnsealError};

use crate::unpack::{BackupUnpacker, ProgressFn, UnpackOptions, UnpackReport};

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub unpack: UnpackOptions,
    pub policy: BatchPolicy,
    /// Base directory each backup's tree is written under
    pub output_root: PathBuf,
}

/// Outcome of one backup in a batch
#[derive(Debug)]
pub struct BatchFailure {
    pub archive: PathBuf,
    pub error: UnsealError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<UnpackReport>,
    pub failed: Vec<BatchFailure>,
    /// Backups not attempted because the batch aborted
    pub skipped: Vec<PathBuf>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Kind of the first failure, which decides the process exit code.
    pub fn first_failure(&self) -> Option<ErrorKind> {
        self.failed.first().map(|f| f.error.kind())
    }
}

/// Decrypt every archive in `backups`, applying the batch policy on failure.
pub fn run_batch(
    backups: &[PathBuf],
    passphrase: SecretString,
    options: &BatchOptions,
    progress: Option<ProgressFn>,
) -> BatchReport {
    let mut unpacker = BackupUnpacker::new(passphrase, options.unpack);
    if let Some(progress) = progress {
        unpacker = unpacker.with_progress(progress);
    }

    let mut report = BatchReport::default();
    for (i, archive) in backups.iter().enumerate() {
        match unpacker.unpack(archive, &options.output_root) {
            Ok(done) => report.succeeded.push(done),
            Err(e) => {
                error!("{}: {e}", archive.display());
                report.failed.push(BatchFailure {
                    archive: archive.clone(),
                    error: e,
                });
                if options.policy == BatchPolicy::Abort {
                    report.skipped = backups[i + 1..].to_vec();
                    if !report.skipped.is_empty() {
                        info!("aborting batch, {} backups not attempted", report.skipped.len());
                    }
                    break;
                }
            }
        }
    }
    report
}

