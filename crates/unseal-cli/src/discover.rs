//! Input discovery: tell emergency kits and backup archives apart.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};

/// Bytes read from the start of a file to classify it
pub const HEAD_LEN: usize = 4096;

const USTAR_OFFSET: usize = 257;
const KIT_NAME: &str = "*emergency*kit*.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    EmergencyKit,
    BackupArchive,
    Unknown,
}

fn case_insensitive() -> MatchOptions {
    MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    }
}

/// Classify a file from its name and first bytes.
pub fn classify(path: &Path, head: &[u8]) -> InputKind {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.ends_with(".tar") && head.get(USTAR_OFFSET..USTAR_OFFSET + 5) == Some(&b"ustar"[..]) {
        return InputKind::BackupArchive;
    }
    if name.ends_with(".txt") {
        let named_like_kit = Pattern::new(KIT_NAME)
            .map(|p| p.matches_with(&name, case_insensitive()))
            .unwrap_or(false);
        if named_like_kit
            || String::from_utf8_lossy(head)
                .to_lowercase()
                .contains("emergency kit")
        {
            return InputKind::EmergencyKit;
        }
    }
    InputKind::Unknown
}

/// First `HEAD_LEN` bytes of `path` (fewer for short files).
pub fn read_head(path: &Path) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(HEAD_LEN);
    File::open(path)?
        .take(HEAD_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}

/// Kits and backups found directly inside a directory, in name order
#[derive(Debug, Default)]
pub struct Discovered {
    pub kits: Vec<PathBuf>,
    pub backups: Vec<PathBuf>,
}

pub fn scan_dir(dir: &Path) -> Result<Discovered> {
    let pattern = format!("{}/*", Pattern::escape(&dir.to_string_lossy()));
    let mut found = Discovered::default();

    for path in glob::glob(&pattern).context("building discovery pattern")? {
        let path = path.with_context(|| format!("scanning {}", dir.display()))?;
        if !path.is_file() {
            continue;
        }
        let head = read_head(&path).with_context(|| format!("reading {}", path.display()))?;
        match classify(&path, &head) {
            InputKind::EmergencyKit => found.kits.push(path),
            InputKind::BackupArchive => found.backups.push(path),
            InputKind::Unknown => tracing::debug!("ignoring {}", path.display()),
        }
    }
    Ok(found)
}
