//! unseal-crypto: key handling and SecureTar decryption for Home Assistant backups
//!
//! Pipeline: emergency kit text → `kit` (passphrase) → `kdf` (AES-128 key) →
//! `securetar` (plaintext stream of one encrypted member)
//!
//! Key schedule:
//! ```text
//! passphrase ("XXXX-XXXX-...", hashed as written)
//!   └── key = SHA-256^100(passphrase)[..16]
//!         └── per-member IV = SHA-256^100(key || salt)[..16]
//!               └── AES-128-CBC, PKCS#7 padding
//! ```

pub mod kdf;
pub mod kit;
pub mod securetar;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use kdf::{derive_key, derive_key_for_scheme, DerivedKey};
pub use kit::{extract_key, find_key, validate_key, KitLookup};
pub use securetar::{decrypt, fault_reason, EnvelopeHeader, EnvelopeVersion, SecureTarReader};

/// Size of the AES-128 key in bytes
pub const KEY_SIZE: usize = 16;

/// Size of the CBC initialization vector
pub const IV_SIZE: usize = 16;

/// Size of the per-member salt stored in the envelope header
pub const SALT_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;
