//! Outer archive discovery: locate `backup.json` and classify members.
//!
//! The platform appends `backup.json` after the member archives, so the
//! metadata is found in a separate pass that seeks past member data instead
//! of reading it.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path};

use tar::EntryType;
use tracing::debug;

use unseal_core::{EncryptionMetadata, UnsealError, UnsealResult, METADATA_FILE};

/// Role of one outer archive entry in the unpacking pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    /// `backup.json`
    Metadata,
    /// SecureTar envelope; `stem` names its output directory
    Encrypted { stem: String, compressed: bool },
    Directory,
    /// Anything else, copied as is
    Plain,
}

impl MemberKind {
    /// Classify an entry by its normalized name and tar entry type.
    pub fn classify(name: &str, entry_type: EntryType) -> Self {
        if entry_type.is_dir() {
            return MemberKind::Directory;
        }
        if name == METADATA_FILE {
            return MemberKind::Metadata;
        }
        let top_level = !name.contains('/');
        if top_level && entry_type.is_file() {
            if let Some(stem) = name.strip_suffix(".tar.gz").filter(|s| !s.is_empty()) {
                return MemberKind::Encrypted {
                    stem: stem.to_string(),
                    compressed: true,
                };
            }
            if let Some(stem) = name.strip_suffix(".tar").filter(|s| !s.is_empty()) {
                return MemberKind::Encrypted {
                    stem: stem.to_string(),
                    compressed: false,
                };
            }
        }
        MemberKind::Plain
    }

    /// Check an encrypted member's suffix against the metadata's `compressed` flag.
    pub fn check_against(&self, name: &str, metadata: &EncryptionMetadata) -> UnsealResult<()> {
        match self {
            MemberKind::Encrypted { compressed, .. } if *compressed != metadata.compressed => {
                Err(UnsealError::InconsistentArchive(format!(
                    "member {name} does not match compressed={} in {METADATA_FILE}",
                    metadata.compressed
                )))
            }
            _ => Ok(()),
        }
    }
}

/// An encrypted member's stem becomes a directory under the output tree, so
/// it must be a single ordinary path component.
fn check_stem(name: &str, stem: &str) -> UnsealResult<()> {
    if stem == "." || stem == ".." || stem.contains(['/', '\\']) {
        return Err(UnsealError::InconsistentArchive(format!(
            "member {name} does not name a usable output directory"
        )));
    }
    Ok(())
}

/// One outer entry as seen by the discovery pass
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
    pub kind: MemberKind,
}

/// Result of the discovery pass over an outer archive
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    pub metadata: Option<EncryptionMetadata>,
    pub members: Vec<MemberInfo>,
}

impl ArchiveLayout {
    /// The metadata, or `InconsistentArchive` when the archive carries none.
    pub fn require_metadata(&self) -> UnsealResult<&EncryptionMetadata> {
        match &self.metadata {
            Some(metadata) => Ok(metadata),
            None if self.encrypted().next().is_some() => Err(UnsealError::InconsistentArchive(
                format!("archive has encrypted members but no {METADATA_FILE}"),
            )),
            None => Err(UnsealError::InconsistentArchive(format!(
                "archive has no {METADATA_FILE}; not a backup"
            ))),
        }
    }

    pub fn encrypted(&self) -> impl Iterator<Item = &MemberInfo> {
        self.members
            .iter()
            .filter(|m| matches!(m.kind, MemberKind::Encrypted { .. }))
    }

    /// Members named in the metadata that the archive does not contain.
    pub fn missing_members(&self) -> Vec<String> {
        let Some(metadata) = &self.metadata else {
            return Vec::new();
        };
        metadata
            .expected_members()
            .into_iter()
            .filter(|expected| !self.members.iter().any(|m| &m.name == expected))
            .collect()
    }
}

/// Archive path with `.` components dropped and `/` separators.
pub fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".into()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Map an error from reading the outer tar structure.
pub(crate) fn outer_error(err: io::Error) -> UnsealError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => UnsealError::Io(err),
        _ => UnsealError::InconsistentArchive(format!("outer archive is not a valid tar: {err}")),
    }
}

/// Parse a `backup.json` entry, rejecting copies that contradict `known`.
pub(crate) fn read_metadata<R: Read>(
    entry: &mut R,
    known: Option<&EncryptionMetadata>,
) -> UnsealResult<(EncryptionMetadata, Vec<u8>)> {
    let mut raw = Vec::new();
    entry.read_to_end(&mut raw).map_err(outer_error)?;
    let parsed = EncryptionMetadata::from_slice(&raw)?;
    if let Some(known) = known {
        if known.contradicts(&parsed) {
            return Err(UnsealError::InconsistentArchive(format!(
                "archive holds contradicting copies of {METADATA_FILE}"
            )));
        }
    }
    Ok((parsed, raw))
}

/// Discovery pass: list members and parse `backup.json` wherever it sits.
pub fn scan(archive_path: &Path) -> UnsealResult<ArchiveLayout> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(file);
    let mut metadata: Option<EncryptionMetadata> = None;
    let mut members = Vec::new();
    let mut stems = HashSet::new();

    for entry in archive.entries_with_seek().map_err(outer_error)? {
        let mut entry = entry.map_err(outer_error)?;
        let name = normalize(&entry.path().map_err(outer_error)?);
        let size = entry.header().size().map_err(outer_error)?;
        let kind = MemberKind::classify(&name, entry.header().entry_type());

        if let MemberKind::Encrypted { stem, .. } = &kind {
            check_stem(&name, stem)?;
            if !stems.insert(stem.clone()) {
                return Err(UnsealError::InconsistentArchive(format!(
                    "archive holds more than one member for {stem}"
                )));
            }
        }
        if kind == MemberKind::Metadata {
            let (parsed, _) = read_metadata(&mut entry, metadata.as_ref())?;
            debug!(
                "found {METADATA_FILE}: slug={} protected={} crypto={:?}",
                parsed.slug, parsed.protected, parsed.crypto
            );
            metadata.get_or_insert(parsed);
        }
        members.push(MemberInfo { name, size, kind });
    }

    Ok(ArchiveLayout { metadata, members })
}
