use std::path::PathBuf;

use thiserror::Error;

pub type UnsealResult<T> = Result<T, UnsealError>;

#[derive(Debug, Error)]
pub enum UnsealError {
    #[error("encryption key not found: {0}")]
    KeyNotFound(String),

    #[error("unsupported encryption scheme: {0}")]
    UnsupportedScheme(String),

    #[error("authentication failed for member {member}: {reason}")]
    AuthenticationFailed { member: String, reason: String },

    #[error("inconsistent archive: {0}")]
    InconsistentArchive(String),

    #[error("output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse outcome class of a failed run, one per user remediation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KeyNotFound,
    AuthenticationFailed,
    UnsupportedScheme,
    InconsistentArchive,
    OutputExists,
    Other,
}

impl ErrorKind {
    /// Process exit code reported by the `unseal` binary.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Other => 1,
            ErrorKind::KeyNotFound => 2,
            ErrorKind::AuthenticationFailed => 3,
            ErrorKind::UnsupportedScheme => 4,
            ErrorKind::InconsistentArchive => 5,
            ErrorKind::OutputExists => 6,
        }
    }
}

impl UnsealError {
    pub fn authentication(member: impl Into<String>, reason: impl Into<String>) -> Self {
        UnsealError::AuthenticationFailed {
            member: member.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UnsealError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            UnsealError::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            UnsealError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            UnsealError::InconsistentArchive(_) | UnsealError::Json(_) => {
                ErrorKind::InconsistentArchive
            }
            UnsealError::OutputExists(_) => ErrorKind::OutputExists,
            UnsealError::Config(_) | UnsealError::Io(_) | UnsealError::Other(_) => {
                ErrorKind::Other
            }
        }
    }

    /// What the operator should try next.
    pub fn hint(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::KeyNotFound => Some(
                "enter the key manually in the format XXXX-XXXX-XXXX-XXXX-XXXX-XXXX-XXXX",
            ),
            ErrorKind::AuthenticationFailed => Some(
                "the encryption key is most likely wrong for this backup; \
                 if the key is correct the backup file is corrupted",
            ),
            ErrorKind::UnsupportedScheme => {
                Some("this backup uses an encryption format this tool does not support")
            }
            ErrorKind::InconsistentArchive => {
                Some("the backup layout is corrupted or not a Home Assistant backup")
            }
            ErrorKind::OutputExists => {
                Some("choose a different --output directory or pass --overwrite")
            }
            ErrorKind::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_have_distinct_exit_codes() {
        let kinds = [
            ErrorKind::Other,
            ErrorKind::KeyNotFound,
            ErrorKind::AuthenticationFailed,
            ErrorKind::UnsupportedScheme,
            ErrorKind::InconsistentArchive,
            ErrorKind::OutputExists,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_wrong_key_and_corruption_hints_differ() {
        let auth = UnsealError::authentication("share.tar.gz", "invalid padding");
        let layout = UnsealError::InconsistentArchive("no backup.json".into());
        assert_ne!(auth.hint(), layout.hint());
        assert!(auth.hint().unwrap().contains("key"));
    }

    #[test]
    fn test_authentication_message_names_member() {
        let err = UnsealError::authentication("homeassistant.tar.gz", "bad padding");
        assert_eq!(
            err.to_string(),
            "authentication failed for member homeassistant.tar.gz: bad padding"
        );
    }

    #[test]
    fn test_json_errors_count_as_inconsistent_archive() {
        let err: UnsealError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::InconsistentArchive);
    }
}
