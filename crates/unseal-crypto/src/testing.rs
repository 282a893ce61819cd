//! Fixture helpers: seal plaintext the way the backup platform does.
//!
//! Only compiled for tests and the `test-support` feature.

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
use secrecy::SecretString;

use unseal_core::{Scheme, UnsealResult};

use crate::kdf::derive_key_for_scheme;
use crate::securetar::{EnvelopeVersion, MAGIC_V2};
use crate::SALT_SIZE;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Encrypt `plaintext` into a SecureTar envelope keyed by `passphrase`.
pub fn seal(
    plaintext: &[u8],
    passphrase: &str,
    salt: [u8; SALT_SIZE],
    version: EnvelopeVersion,
) -> UnsealResult<Vec<u8>> {
    let key = derive_key_for_scheme(&SecretString::from(passphrase), Scheme::Aes128)?;
    let iv = key.member_iv(&salt);
    let ciphertext = Aes128CbcEnc::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(&iv),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(64 + ciphertext.len());
    if version == EnvelopeVersion::V2 {
        out.extend_from_slice(MAGIC_V2);
        out.extend_from_slice(&(plaintext.len() as u64).to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
    }
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Copy of `data` with bit `bit` (counted from the first byte's LSB) inverted.
pub fn flip_bit(data: &[u8], bit: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    out[bit / 8] ^= 1 << (bit % 8);
    out
}
