use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{UnsealError, UnsealResult};

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsealConfig {
    pub output: OutputConfig,
    pub key: KeyConfig,
    pub batch: BatchConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base directory decrypted backups are written under (default: .)
    pub directory: PathBuf,
    /// Replace an existing output tree instead of failing
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Emergency kit file (default: discovered in the scanned directory)
    pub kit_path: Option<PathBuf>,
    /// Accept free-form passwords from backups created before emergency kits
    pub legacy_password: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub policy: BatchPolicy,
}

/// What a multi-backup run does after one backup fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPolicy {
    /// Report the failure and carry on with the remaining backups
    #[default]
    Continue,
    /// Stop at the first failed backup
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            overwrite: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl UnsealConfig {
    /// Load the config file at `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> UnsealResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| UnsealError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| UnsealError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Default config location: ~/.config/unseal/config.toml
pub fn default_config_path() -> PathBuf {
    expand_tilde(Path::new("~/.config/unseal/config.toml"))
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[output]
directory = "/srv/restore"
overwrite = true

[key]
kit_path = "/home/user/emergency_kit.txt"
legacy_password = true

[batch]
policy = "abort"

[log]
level = "debug"
format = "json"
"#;
        let config: UnsealConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.output.directory, PathBuf::from("/srv/restore"));
        assert!(config.output.overwrite);
        assert_eq!(
            config.key.kit_path,
            Some(PathBuf::from("/home/user/emergency_kit.txt"))
        );
        assert!(config.key.legacy_password);
        assert_eq!(config.batch.policy, BatchPolicy::Abort);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: UnsealConfig = toml::from_str("").unwrap();

        assert_eq!(config.output.directory, PathBuf::from("."));
        assert!(!config.output.overwrite);
        assert!(config.key.kit_path.is_none());
        assert!(!config.key.legacy_password);
        assert_eq!(config.batch.policy, BatchPolicy::Continue);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[output]
overwrite = true
"#;
        let config: UnsealConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert!(config.output.overwrite);
        // Defaults
        assert_eq!(config.output.directory, PathBuf::from("."));
        assert_eq!(config.batch.policy, BatchPolicy::Continue);
    }

    #[test]
    fn test_unknown_batch_policy_rejected() {
        let result: Result<UnsealConfig, _> = toml::from_str("[batch]\npolicy = \"retry\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = UnsealConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.output.directory, PathBuf::from("."));
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[output\n").unwrap();

        let err = UnsealConfig::load(&path).unwrap_err();
        assert!(matches!(err, UnsealError::Config(_)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = UnsealConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: UnsealConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.output.directory, parsed.output.directory);
        assert_eq!(config.batch.policy, parsed.batch.policy);
        assert_eq!(config.log.format, parsed.log.format);
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.config/unseal/config.toml"));
        assert!(!expanded.to_str().unwrap().starts_with("~/"));
    }
}
