//! Key derivation: emergency-kit passphrase → AES-128 key, key + salt → CBC IV
//!
//! Both steps stretch their input with 100 rounds of SHA-256 and keep the
//! first 16 bytes of the final digest. The passphrase is hashed in its
//! canonical dashed form; only surrounding whitespace is stripped.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use unseal_core::{EncryptionMetadata, Scheme, UnsealError, UnsealResult};

use crate::{IV_SIZE, KEY_SIZE, SALT_SIZE};

/// Number of SHA-256 rounds applied to the passphrase and to the IV seed
pub const STRETCH_ROUNDS: usize = 100;

/// A 128-bit key derived from the backup passphrase.
///
/// Lives for one backup run and is zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// IV for one encrypted member, seeded with the salt from its envelope header.
    pub fn member_iv(&self, salt: &[u8; SALT_SIZE]) -> [u8; IV_SIZE] {
        let mut seed = Zeroizing::new(Vec::with_capacity(KEY_SIZE + SALT_SIZE));
        seed.extend_from_slice(&self.bytes);
        seed.extend_from_slice(salt);
        let mut digest = stretch(&seed);

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&digest[..IV_SIZE]);
        digest.zeroize();
        iv
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the symmetric key for a backup described by `metadata`.
///
/// Fails with `UnsupportedScheme` when the metadata names a scheme this crate
/// does not implement, and with `KeyNotFound` for an empty passphrase.
pub fn derive_key(
    passphrase: &SecretString,
    metadata: &EncryptionMetadata,
) -> UnsealResult<DerivedKey> {
    let scheme = metadata.scheme()?;
    derive_key_for_scheme(passphrase, scheme)
}

/// Derive a key for an explicit scheme, without consulting backup metadata.
pub fn derive_key_for_scheme(passphrase: &SecretString, scheme: Scheme) -> UnsealResult<DerivedKey> {
    let normalized = passphrase.expose_secret().trim();
    if normalized.is_empty() {
        return Err(UnsealError::KeyNotFound("passphrase is empty".into()));
    }

    match scheme {
        Scheme::Aes128 => {
            let mut digest = stretch(normalized.as_bytes());
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(&digest[..KEY_SIZE]);
            digest.zeroize();
            Ok(DerivedKey::from_bytes(key))
        }
    }
}

/// Hash `input` once, then re-hash the digest until `STRETCH_ROUNDS` rounds ran.
fn stretch(input: &[u8]) -> [u8; 32] {
    let mut digest: [u8; 32] = Sha256::digest(input).into();
    for _ in 1..STRETCH_ROUNDS {
        let next: [u8; 32] = Sha256::digest(digest).into();
        digest.zeroize();
        digest = next;
    }
    digest
}
