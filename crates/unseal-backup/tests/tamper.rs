//! Tampering with a sealed member must fail that member and leave no output.

use std::fs;
use std::path::Path;

use proptest::prelude::*;
use secrecy::SecretString;
use tempfile::TempDir;

use unseal_backup::testing::{BackupFixture, FIXTURE_KEY};
use unseal_backup::{BackupUnpacker, UnpackOptions};
use unseal_core::UnsealError;
use unseal_crypto::securetar::V2_HEADER_SIZE;
use unseal_crypto::SALT_SIZE;

fn fixture() -> BackupFixture {
    let payload: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
    BackupFixture::new("7a7a7a7a")
        .encrypted_member("homeassistant", &[("config.yaml", b"name: Home\n")])
        .encrypted_member("media", &[("blob.bin", payload.as_slice())])
}

/// Unpack a fixture with `media.tar.gz` tampered at `bit`; return the error
/// and whether anything was left in the output root.
fn unpack_tampered(bit: usize) -> (UnsealError, bool) {
    let tmp = TempDir::new().unwrap();
    let archive = fixture()
        .tamper("media", bit)
        .write_to(tmp.path(), "backup.tar")
        .unwrap();
    let out = tmp.path().join("out");

    let err = BackupUnpacker::new(SecretString::from(FIXTURE_KEY), UnpackOptions::default())
        .unpack(&archive, &out)
        .expect_err("tampered backup must not decrypt");
    (err, leftovers(&out))
}

fn leftovers(out: &Path) -> bool {
    out.exists() && fs::read_dir(out).unwrap().count() > 0
}

fn assert_rejected(bit: usize) {
    let (err, left) = unpack_tampered(bit);
    assert!(
        matches!(&err, UnsealError::AuthenticationFailed { member, .. } if member == "media.tar.gz"),
        "bit {bit}: unexpected error {err}"
    );
    assert!(!left, "bit {bit}: output left behind");
}

fn sealed_len() -> usize {
    fixture().sealed("media").unwrap().len()
}

#[test]
fn flipped_salt_bit() {
    assert_rejected((V2_HEADER_SIZE - SALT_SIZE) * 8 + 5);
}

#[test]
fn flipped_first_ciphertext_block() {
    assert_rejected(V2_HEADER_SIZE * 8 + 3);
}

#[test]
fn flipped_middle_ciphertext_block() {
    let len = sealed_len();
    assert_rejected((V2_HEADER_SIZE + (len - V2_HEADER_SIZE) / 2) * 8);
}

#[test]
fn flipped_final_block() {
    let len = sealed_len();
    assert_rejected((len - 1) * 8);
    assert_rejected((len - 9) * 8 + 7);
}

#[test]
fn flipped_declared_size() {
    // plaintext size field of the v2 header
    assert_rejected(16 * 8 + 63);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_flip_in_salt_or_ciphertext_is_rejected(offset in 0usize..1_000_000, bit in 0usize..8) {
        let len = sealed_len();
        let start = V2_HEADER_SIZE - SALT_SIZE;
        let byte = start + offset % (len - start);
        let (err, left) = unpack_tampered(byte * 8 + bit);
        prop_assert!(matches!(err, UnsealError::AuthenticationFailed { .. }), "byte {}: {}", byte, err);
        prop_assert!(!left);
    }
}
