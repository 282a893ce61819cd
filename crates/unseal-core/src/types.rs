use serde::{Deserialize, Serialize};

use crate::error::{UnsealError, UnsealResult};

/// Name of the metadata member inside an outer backup archive
pub const METADATA_FILE: &str = "backup.json";

/// Backup format versions this tool understands
pub const SUPPORTED_VERSIONS: [u32; 2] = [1, 2];

/// Encryption scheme named by the `crypto` field of `backup.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// AES-128-CBC with iterated SHA-256 key stretching (SecureTar)
    Aes128,
}

impl Scheme {
    pub fn from_identifier(id: &str) -> UnsealResult<Self> {
        match id {
            "aes128" => Ok(Scheme::Aes128),
            other => Err(UnsealError::UnsupportedScheme(format!(
                "unknown crypto identifier {other:?}"
            ))),
        }
    }
}

/// Metadata parsed from `backup.json`.
///
/// Only the fields the decryption pipeline reads are typed; everything else in
/// the file is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, rename = "type")]
    pub backup_type: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub crypto: Option<String>,
    #[serde(default = "default_true")]
    pub compressed: bool,
    #[serde(default)]
    pub homeassistant: Option<serde_json::Value>,
    #[serde(default)]
    pub addons: Vec<AddonInfo>,
    #[serde(default)]
    pub folders: Vec<String>,
}

/// An add-on entry in `backup.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonInfo {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    2
}

impl EncryptionMetadata {
    pub fn from_slice(bytes: &[u8]) -> UnsealResult<Self> {
        let metadata: Self = serde_json::from_slice(bytes)?;
        if !SUPPORTED_VERSIONS.contains(&metadata.version) {
            return Err(UnsealError::UnsupportedScheme(format!(
                "backup format version {}",
                metadata.version
            )));
        }
        Ok(metadata)
    }

    /// Resolve the encryption scheme for this backup.
    pub fn scheme(&self) -> UnsealResult<Scheme> {
        if !self.protected {
            return Err(UnsealError::UnsupportedScheme(
                "backup is not encrypted".into(),
            ));
        }
        match self.crypto.as_deref() {
            Some(id) => Scheme::from_identifier(id),
            None => Err(UnsealError::InconsistentArchive(
                "protected backup has no crypto field".into(),
            )),
        }
    }

    /// Suffix encrypted members carry given the `compressed` flag.
    pub fn member_suffix(&self) -> &'static str {
        if self.compressed {
            ".tar.gz"
        } else {
            ".tar"
        }
    }

    /// Member file names this backup is expected to contain.
    pub fn expected_members(&self) -> Vec<String> {
        let suffix = self.member_suffix();
        let mut members = Vec::new();
        if self.homeassistant.is_some() {
            members.push(format!("homeassistant{suffix}"));
        }
        members.extend(self.addons.iter().map(|a| format!("{}{suffix}", a.slug)));
        members.extend(
            self.folders
                .iter()
                .map(|f| format!("{}{suffix}", f.replace('/', "_"))),
        );
        members
    }

    /// Fields two copies of the metadata must agree on to describe the same backup.
    pub fn contradicts(&self, other: &Self) -> bool {
        self.slug != other.slug
            || self.protected != other.protected
            || self.crypto != other.crypto
            || self.compressed != other.compressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "slug": "9f3a2c1b",
        "version": 2,
        "name": "Automatic backup 2025.1.0",
        "date": "2025-01-05T04:45:00.000000+00:00",
        "type": "partial",
        "supervisor_version": "2024.12.3",
        "extra": {},
        "protected": true,
        "crypto": "aes128",
        "compressed": true,
        "homeassistant": {"version": "2025.1.0", "exclude_database": false, "size": 12.5},
        "addons": [{"slug": "core_mosquitto", "name": "Mosquitto broker", "version": "6.4.1", "size": 0.1}],
        "repositories": [],
        "folders": ["share", "addons/local"]
    }"#;

    #[test]
    fn test_parse_supervisor_metadata() {
        let meta = EncryptionMetadata::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(meta.slug, "9f3a2c1b");
        assert_eq!(meta.backup_type.as_deref(), Some("partial"));
        assert!(meta.protected);
        assert_eq!(meta.scheme().unwrap(), Scheme::Aes128);
        assert_eq!(meta.addons[0].slug, "core_mosquitto");
    }

    #[test]
    fn test_expected_members() {
        let meta = EncryptionMetadata::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            meta.expected_members(),
            vec![
                "homeassistant.tar.gz",
                "core_mosquitto.tar.gz",
                "share.tar.gz",
                "addons_local.tar.gz",
            ]
        );
    }

    #[test]
    fn test_unknown_scheme_is_unsupported() {
        let meta = EncryptionMetadata::from_slice(
            br#"{"slug": "a", "protected": true, "crypto": "aes256gcm"}"#,
        )
        .unwrap();
        assert!(matches!(
            meta.scheme(),
            Err(UnsealError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_unprotected_backup_is_unsupported() {
        let meta = EncryptionMetadata::from_slice(br#"{"slug": "a", "protected": false}"#).unwrap();
        assert!(matches!(
            meta.scheme(),
            Err(UnsealError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_protected_without_crypto_is_inconsistent() {
        let meta = EncryptionMetadata::from_slice(br#"{"slug": "a", "protected": true}"#).unwrap();
        assert!(matches!(
            meta.scheme(),
            Err(UnsealError::InconsistentArchive(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let result = EncryptionMetadata::from_slice(br#"{"slug": "a", "version": 9}"#);
        assert!(matches!(result, Err(UnsealError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_defaults_for_sparse_metadata() {
        let meta = EncryptionMetadata::from_slice(br#"{"protected": true, "crypto": "aes128"}"#)
            .unwrap();
        assert!(meta.compressed);
        assert_eq!(meta.version, 2);
        assert_eq!(meta.member_suffix(), ".tar.gz");
        assert!(meta.expected_members().is_empty());
    }

    #[test]
    fn test_contradicts() {
        let a = EncryptionMetadata::from_slice(SAMPLE.as_bytes()).unwrap();
        let mut b = a.clone();
        b.name = "renamed".into();
        assert!(!a.contradicts(&b));
        b.compressed = false;
        assert!(a.contradicts(&b));
    }
}
