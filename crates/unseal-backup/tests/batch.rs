//! Batch policy: continue past failed backups, or stop at the first one.

use std::path::PathBuf;

use secrecy::SecretString;
use tempfile::TempDir;

use unseal_backup::testing::{BackupFixture, FIXTURE_KEY};
use unseal_backup::{run_batch, BatchOptions};
use unseal_core::config::BatchPolicy;
use unseal_core::ErrorKind;

/// Three backups; the middle one is sealed with another key.
fn three_backups(dir: &std::path::Path) -> Vec<PathBuf> {
    let good = |slug: &str| {
        BackupFixture::new(slug).encrypted_member("share", &[("a.txt", slug.as_bytes())])
    };
    vec![
        good("aaaa0001").write_to(dir, "first.tar").unwrap(),
        good("bbbb0002")
            .passphrase("ZZZZ-ZZZZ-ZZZZ-ZZZZ-ZZZZ-ZZZZ-ZZZZ")
            .write_to(dir, "second.tar")
            .unwrap(),
        good("cccc0003").write_to(dir, "third.tar").unwrap(),
    ]
}

#[test]
fn continue_policy_attempts_every_backup() {
    let tmp = TempDir::new().unwrap();
    let backups = three_backups(tmp.path());
    let options = BatchOptions {
        output_root: tmp.path().join("out"),
        ..Default::default()
    };

    let report = run_batch(&backups, SecretString::from(FIXTURE_KEY), &options, None);

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].archive, backups[1]);
    assert_eq!(report.first_failure(), Some(ErrorKind::AuthenticationFailed));
    assert!(report.skipped.is_empty());
    assert!(!report.is_success());
    assert!(tmp.path().join("out/third/share/a.txt").exists());
    assert!(!tmp.path().join("out/second").exists());
}

#[test]
fn abort_policy_stops_at_first_failure() {
    let tmp = TempDir::new().unwrap();
    let backups = three_backups(tmp.path());
    let options = BatchOptions {
        output_root: tmp.path().join("out"),
        policy: BatchPolicy::Abort,
        ..Default::default()
    };

    let report = run_batch(&backups, SecretString::from(FIXTURE_KEY), &options, None);

    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.skipped, vec![backups[2].clone()]);
    assert!(tmp.path().join("out/first").exists());
    assert!(!tmp.path().join("out/third").exists());
}

#[test]
fn progress_reports_each_member() {
    use std::sync::{Arc, Mutex};

    let tmp = TempDir::new().unwrap();
    let archive = BackupFixture::new("dddd0004")
        .encrypted_member("homeassistant", &[("c.yaml", b"c")])
        .encrypted_member("share", &[("s.txt", b"s")])
        .write_to(tmp.path(), "progress.tar")
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = BatchOptions {
        output_root: tmp.path().join("out"),
        ..Default::default()
    };

    let report = run_batch(
        &[archive],
        SecretString::from(FIXTURE_KEY),
        &options,
        Some(Box::new(move |done: u64, total: u64, name: &str| {
            sink.lock().unwrap().push((done, total, name.to_string()));
        })),
    );

    assert!(report.is_success());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (1, 2, "homeassistant.tar.gz".to_string()),
            (2, 2, "share.tar.gz".to_string()),
        ]
    );
}
