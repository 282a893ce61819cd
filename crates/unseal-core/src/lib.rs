//! unseal-core: types shared by the decryption pipeline crates
//!
//! - `config`: the `config.toml` schema (output, key, batch, log sections)
//! - `error`: `UnsealError`, the taxonomy every pipeline stage reports through
//! - `types`: `EncryptionMetadata` parsed from a backup's `backup.json`

pub mod config;
pub mod error;
pub mod types;

pub use error::{ErrorKind, UnsealError, UnsealResult};
pub use types::{EncryptionMetadata, Scheme, METADATA_FILE};
