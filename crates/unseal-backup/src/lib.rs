//! unseal-backup: decrypt and unpack Home Assistant backup archives
//!
//! Outer archive layout (uncompressed tar):
//! ```text
//! ./homeassistant.tar.gz    SecureTar envelope around a gzip tar
//! ./core_mosquitto.tar.gz   one member per add-on
//! ./share.tar.gz            one member per folder
//! ./backup.json             metadata, written last
//! ```
//!
//! Each backup decrypts into `<output>/<archive name>/<member stem>/`.

pub mod batch;
pub mod metadata;
pub mod output;
pub mod unpack;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use batch::{run_batch, BatchFailure, BatchOptions, BatchReport};
pub use metadata::{scan, ArchiveLayout, MemberInfo, MemberKind};
pub use output::{output_dir_for, OutputPolicy, StagedOutput};
pub use unpack::{unpack_member, BackupUnpacker, ProgressFn, UnpackOptions, UnpackReport};
