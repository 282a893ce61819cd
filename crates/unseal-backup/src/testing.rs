//! Fixture builder for encrypted backups.
//!
//! Produces outer archives laid out the way the backup platform writes them:
//! sealed `<name>.tar.gz` members first, `backup.json` last.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use unseal_core::{UnsealResult, METADATA_FILE};
use unseal_crypto::testing::{flip_bit, seal};
use unseal_crypto::EnvelopeVersion;

/// Kit key used by fixtures unless overridden
pub const FIXTURE_KEY: &str = "A1B2-C3D4-E5F6-G7H8-J9K0-L1M2-N3P4";

const FIXTURE_MTIME: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
enum Member {
    Encrypted {
        stem: String,
        files: Vec<(String, Vec<u8>)>,
        flip: Option<usize>,
    },
    Raw {
        name: String,
        data: Vec<u8>,
    },
}

/// Builder for an outer backup archive.
#[derive(Debug, Clone)]
pub struct BackupFixture {
    metadata: Option<Value>,
    leading_metadata: Option<Value>,
    members: Vec<Member>,
    passphrase: String,
    version: EnvelopeVersion,
}

impl BackupFixture {
    pub fn new(slug: &str) -> Self {
        Self {
            metadata: Some(json!({
                "slug": slug,
                "version": 2,
                "name": format!("Backup {slug}"),
                "date": "2025-01-05T04:45:00.000000+00:00",
                "type": "partial",
                "protected": true,
                "crypto": "aes128",
                "compressed": true,
                "addons": [],
                "folders": [],
            })),
            leading_metadata: None,
            members: Vec::new(),
            passphrase: FIXTURE_KEY.into(),
            version: EnvelopeVersion::V2,
        }
    }

    /// Seal members with a different passphrase.
    pub fn passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = passphrase.into();
        self
    }

    pub fn envelope(mut self, version: EnvelopeVersion) -> Self {
        self.version = version;
        self
    }

    /// Override one top-level field of `backup.json`.
    pub fn metadata_field(mut self, field: &str, value: Value) -> Self {
        if let Some(Value::Object(map)) = self.metadata.as_mut() {
            map.insert(field.into(), value);
        }
        self
    }

    pub fn without_metadata(mut self) -> Self {
        self.metadata = None;
        self
    }

    /// Add a second `backup.json` ahead of the members.
    pub fn leading_metadata(mut self, metadata: Value) -> Self {
        self.leading_metadata = Some(metadata);
        self
    }

    /// Add an encrypted member holding `files` (relative path, contents).
    pub fn encrypted_member(mut self, stem: &str, files: &[(&str, &[u8])]) -> Self {
        self.members.push(Member::Encrypted {
            stem: stem.into(),
            files: files
                .iter()
                .map(|(path, data)| ((*path).to_string(), data.to_vec()))
                .collect(),
            flip: None,
        });
        self
    }

    /// Invert one bit of the sealed envelope of member `stem`.
    pub fn tamper(mut self, stem: &str, bit: usize) -> Self {
        for member in &mut self.members {
            if let Member::Encrypted { stem: s, flip, .. } = member {
                if s == stem {
                    *flip = Some(bit);
                }
            }
        }
        self
    }

    /// Add a member stored verbatim.
    pub fn raw_member(mut self, name: &str, data: &[u8]) -> Self {
        self.members.push(Member::Raw {
            name: name.into(),
            data: data.to_vec(),
        });
        self
    }

    /// Envelope bytes of encrypted member `stem`, as they will appear in the archive.
    pub fn sealed(&self, stem: &str) -> UnsealResult<Vec<u8>> {
        let compressed = self.compressed();
        for (index, member) in self.members.iter().enumerate() {
            if let Member::Encrypted { stem: s, files, flip } = member {
                if s == stem {
                    let inner = inner_archive(files, compressed)?;
                    let sealed = seal(&inner, &self.passphrase, salt_for(index), self.version)?;
                    return Ok(match flip {
                        Some(bit) => flip_bit(&sealed, *bit),
                        None => sealed,
                    });
                }
            }
        }
        Err(io::Error::new(io::ErrorKind::NotFound, format!("fixture has no member {stem}")).into())
    }

    fn compressed(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("compressed"))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Serialize the outer archive.
    pub fn build(&self) -> UnsealResult<Vec<u8>> {
        let suffix = if self.compressed() { ".tar.gz" } else { ".tar" };
        let mut outer = tar::Builder::new(Vec::new());

        if let Some(meta) = &self.leading_metadata {
            append(&mut outer, METADATA_FILE, &serde_json::to_vec_pretty(meta)?)?;
        }
        for member in &self.members {
            match member {
                Member::Encrypted { stem, .. } => {
                    let sealed = self.sealed(stem)?;
                    append(&mut outer, &format!("{stem}{suffix}"), &sealed)?;
                }
                Member::Raw { name, data } => append(&mut outer, name, data)?,
            }
        }
        if let Some(meta) = &self.metadata {
            append(&mut outer, METADATA_FILE, &serde_json::to_vec_pretty(meta)?)?;
        }
        Ok(outer.into_inner()?)
    }

    /// Write the outer archive to `dir/<file_name>`.
    pub fn write_to(&self, dir: &Path, file_name: &str) -> UnsealResult<PathBuf> {
        let path = dir.join(file_name);
        std::fs::write(&path, self.build()?)?;
        Ok(path)
    }
}

fn salt_for(index: usize) -> [u8; 16] {
    let mut salt = [0x5a; 16];
    salt[0] = index as u8;
    salt
}

fn append<W: Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) -> UnsealResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(FIXTURE_MTIME);
    header.set_entry_type(tar::EntryType::Regular);
    if path.split('/').any(|part| part == "..") {
        // the builder refuses `..`; hostile names are written into the header as is
        let name = &mut header.as_old_mut().name;
        name.fill(0);
        name[..path.len()].copy_from_slice(path.as_bytes());
        header.set_cksum();
        builder.append(&header, data)?;
    } else {
        builder.append_data(&mut header, path, data)?;
    }
    Ok(())
}

/// The plaintext a member envelope carries: a tar of `files`, gzipped when `compressed`.
pub fn inner_archive(files: &[(String, Vec<u8>)], compressed: bool) -> UnsealResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        append(&mut builder, path, data)?;
    }
    let tarball = builder.into_inner()?;
    if !compressed {
        return Ok(tarball);
    }
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&tarball)?;
    Ok(gz.finish()?)
}

/// Regular files under `root` keyed by `/`-separated relative path.
pub fn read_tree(root: &Path) -> io::Result<BTreeMap<String, Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(root, &path, out)?;
            } else {
                let rel = path
                    .strip_prefix(root)
                    .map_err(io::Error::other)?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.insert(rel, std::fs::read(&path)?);
            }
        }
        Ok(())
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out)?;
    Ok(out)
}
