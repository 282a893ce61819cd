//! Backup unpacker: outer archive → staged tree of decrypted members
//!
//! Per backup:
//!   1. discovery pass (`metadata::scan`) finds `backup.json` and derives the key once
//!   2. member pass streams each encrypted member through
//!      `SecureTarReader` → gzip → tar into `<output>/<member stem>/`
//!   3. the staged tree is renamed into place only if every member succeeded

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use secrecy::SecretString;
use tar::EntryType;
use tracing::{debug, info, warn};

use unseal_core::{EncryptionMetadata, UnsealError, UnsealResult, METADATA_FILE};
use unseal_crypto::{derive_key, fault_reason, DerivedKey, SecureTarReader};

use crate::metadata::{self, normalize, outer_error, read_metadata, MemberKind};
use crate::output::{output_dir_for, OutputPolicy, StagedOutput};

/// Progress callback type (members_done, members_total, member_name)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct UnpackOptions {
    pub output: OutputPolicy,
}

/// Result of unpacking one backup
#[derive(Debug, Clone)]
pub struct UnpackReport {
    pub slug: String,
    pub name: String,
    /// Final location of the decrypted tree
    pub output: PathBuf,
    /// Encrypted members decrypted, in archive order
    pub decrypted: Vec<String>,
    /// Plain files copied unchanged (including `backup.json`)
    pub plain_members: usize,
    /// Bytes of regular files written from decrypted members
    pub bytes: u64,
    /// Members named in `backup.json` but absent from the archive
    pub missing: Vec<String>,
}

/// Decrypts and unpacks backups with one passphrase.
pub struct BackupUnpacker {
    passphrase: SecretString,
    options: UnpackOptions,
    progress: Option<ProgressFn>,
}

impl BackupUnpacker {
    pub fn new(passphrase: SecretString, options: UnpackOptions) -> Self {
        Self {
            passphrase,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Unpack `archive_path` into `<output_root>/<archive name without .tar>`.
    ///
    /// Aborts on the first member failure; nothing is written to the
    /// destination unless the whole backup decrypts.
    pub fn unpack(&self, archive_path: &Path, output_root: &Path) -> UnsealResult<UnpackReport> {
        let dest = output_dir_for(archive_path, output_root);
        let stage = StagedOutput::prepare(&dest, self.options.output)?;

        let layout = metadata::scan(archive_path)?;
        let meta = layout.require_metadata()?;
        for member in &layout.members {
            member.kind.check_against(&member.name, meta)?;
        }
        let key = derive_key(&self.passphrase, meta)?;

        let missing = layout.missing_members();
        for name in &missing {
            warn!("{}: member {name} listed in {METADATA_FILE} is missing", archive_path.display());
        }

        let total = layout.encrypted().count() as u64;
        info!(
            "unpacking {} ({}: {} encrypted members)",
            archive_path.display(),
            meta.slug,
            total
        );

        let mut report = UnpackReport {
            slug: meta.slug.clone(),
            name: meta.name.clone(),
            output: dest.clone(),
            decrypted: Vec::new(),
            plain_members: 0,
            bytes: 0,
            missing,
        };
        self.member_pass(archive_path, meta, &key, stage.path(), total, &mut report)?;
        drop(key);

        report.output = stage.commit()?;
        info!(
            "decrypted {} → {} ({} members, {} bytes)",
            archive_path.display(),
            report.output.display(),
            report.decrypted.len(),
            report.bytes
        );
        Ok(report)
    }

    fn member_pass(
        &self,
        archive_path: &Path,
        meta: &EncryptionMetadata,
        key: &DerivedKey,
        stage: &Path,
        total: u64,
        report: &mut UnpackReport,
    ) -> UnsealResult<()> {
        let mut archive = tar::Archive::new(File::open(archive_path)?);

        for entry in archive.entries().map_err(outer_error)? {
            let mut entry = entry.map_err(outer_error)?;
            let name = normalize(&entry.path().map_err(outer_error)?);

            match MemberKind::classify(&name, entry.header().entry_type()) {
                MemberKind::Metadata => {
                    let (_, raw) = read_metadata(&mut entry, Some(meta))?;
                    fs::write(stage.join(METADATA_FILE), raw)?;
                    report.plain_members += 1;
                }
                MemberKind::Encrypted { stem, compressed } => {
                    info!("decrypting {name}");
                    let dest = stage.join(&stem);
                    fs::create_dir_all(&dest)?;
                    report.bytes += unpack_member(&mut entry, &name, key, compressed, &dest)?;
                    report.decrypted.push(name.clone());
                    if let Some(progress) = &self.progress {
                        progress(report.decrypted.len() as u64, total, &name);
                    }
                }
                MemberKind::Directory => {
                    entry.unpack_in(stage).map_err(extract_error)?;
                }
                MemberKind::Plain => {
                    if entry.unpack_in(stage).map_err(extract_error)? {
                        report.plain_members += 1;
                    } else {
                        warn!("skipping member with unsafe path: {name}");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Decrypt one member envelope and unpack the tar it carries into `dest`.
///
/// Returns the number of file bytes written.
pub fn unpack_member<R: Read>(
    ciphertext: R,
    member: &str,
    key: &DerivedKey,
    compressed: bool,
    dest: &Path,
) -> UnsealResult<u64> {
    let mut reader = SecureTarReader::new(ciphertext, key, member)?;

    let bytes = if compressed {
        let mut gz = GzDecoder::new(&mut reader);
        let bytes = unpack_tree(&mut gz, dest).map_err(|e| member_error(member, e))?;
        // reaching gzip EOF checks the CRC-32 and length trailer
        io::copy(&mut gz, &mut io::sink()).map_err(|e| member_error(member, e))?;
        bytes
    } else {
        unpack_tree(&mut reader, dest).map_err(|e| member_error(member, e))?
    };
    // reaching envelope EOF checks padding and the declared size
    io::copy(&mut reader, &mut io::sink()).map_err(|e| member_error(member, e))?;

    debug!(
        member,
        bytes,
        envelope = ?reader.header().version,
        plaintext = reader.produced(),
        "member unpacked"
    );
    Ok(bytes)
}

/// Unpack a tar stream into `dest`, directories last so their permissions
/// cannot block the files inside them.
fn unpack_tree<R: Read>(stream: R, dest: &Path) -> io::Result<u64> {
    let mut archive = tar::Archive::new(stream);
    let mut directories = Vec::new();
    let mut bytes = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() == EntryType::Directory {
            directories.push(entry);
            continue;
        }
        let size = if entry.header().entry_type().is_file() {
            entry.size()
        } else {
            0
        };
        if entry.unpack_in(dest)? {
            bytes += size;
        } else {
            warn!("skipping entry with unsafe path: {}", entry.path()?.display());
        }
    }

    directories.sort_by(|a, b| b.path_bytes().cmp(&a.path_bytes()));
    for mut dir in directories {
        dir.unpack_in(dest)?;
    }
    Ok(bytes)
}

/// Writing a plain member out: short reads are archive damage, the rest is local I/O.
fn extract_error(err: io::Error) -> UnsealError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => outer_error(err),
        _ => UnsealError::Io(err),
    }
}

/// Classify a failure inside an encrypted member's plaintext pipeline.
///
/// The envelope carries no MAC, so a gzip or tar decode error after a
/// successful header parse means a wrong key or corrupted ciphertext.
fn member_error(member: &str, err: io::Error) -> UnsealError {
    if let Some(reason) = fault_reason(&err) {
        return UnsealError::authentication(member, reason);
    }
    match err.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Other => UnsealError::authentication(
            member,
            format!("decrypted data is not a valid archive ({err})"),
        ),
        _ => UnsealError::Io(err),
    }
}
