//! Emergency kit parsing: recover the backup encryption key from kit text
//!
//! The kit is free text (sometimes markdown). The key is found either after an
//! `Encryption key` label or, failing that, as a bare token in the canonical
//! seven-group shape `XXXX-XXXX-XXXX-XXXX-XXXX-XXXX-XXXX`.

use std::sync::OnceLock;

use regex::Regex;
use secrecy::SecretString;

use unseal_core::{UnsealError, UnsealResult};

/// Number of dash-separated groups in an emergency-kit key
pub const KEY_GROUPS: usize = 7;

/// Outcome of searching a kit for its key. The caller decides whether a
/// `NotFound` warrants prompting the operator.
#[derive(Debug)]
pub enum KitLookup {
    Found(SecretString),
    NotFound,
}

impl KitLookup {
    pub fn into_result(self) -> UnsealResult<SecretString> {
        match self {
            KitLookup::Found(key) => Ok(key),
            KitLookup::NotFound => Err(UnsealError::KeyNotFound(
                "no well-formed encryption key in emergency kit".into(),
            )),
        }
    }
}

fn labeled_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i:encryption[ \t]+key)[\s:=*_`>#-]*(?P<key>[A-Z0-9]{4}(?:-[A-Z0-9]{4}){3,})")
            .expect("labeled key pattern is valid")
    })
}

fn canonical_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Z0-9]{4}(?:-[A-Z0-9]{4}){6}").expect("canonical key pattern is valid")
    })
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// A token is only accepted when it is not glued to further key characters.
fn stands_alone(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_key_char) && !after.is_some_and(is_key_char)
}

/// Search kit text for the embedded key.
pub fn find_key(kit_text: &str) -> KitLookup {
    for caps in labeled_pattern().captures_iter(kit_text) {
        let Some(m) = caps.name("key") else { continue };
        // The label regex consumes leading `-` noise, so only the tail needs checking.
        let glued = kit_text[m.end()..].chars().next().is_some_and(is_key_char);
        if !glued {
            return KitLookup::Found(SecretString::from(m.as_str()));
        }
        tracing::debug!("labeled key candidate is malformed, skipping");
    }

    for m in canonical_pattern().find_iter(kit_text) {
        if stands_alone(kit_text, m.start(), m.end()) {
            return KitLookup::Found(SecretString::from(m.as_str()));
        }
    }

    KitLookup::NotFound
}

/// Extract the key from kit text, failing with `KeyNotFound`.
pub fn extract_key(kit_text: &str) -> UnsealResult<SecretString> {
    find_key(kit_text).into_result()
}

/// Extract the key from raw kit bytes (kits are UTF-8; stray bytes are replaced).
pub fn extract_key_from_bytes(kit_bytes: &[u8]) -> UnsealResult<SecretString> {
    extract_key(&String::from_utf8_lossy(kit_bytes))
}

/// Check a manually entered key against the canonical shape.
pub fn validate_key(candidate: &str) -> UnsealResult<SecretString> {
    let trimmed = candidate.trim();
    let well_formed = canonical_pattern()
        .find(trimmed)
        .is_some_and(|m| m.start() == 0 && m.end() == trimmed.len());
    if well_formed {
        Ok(SecretString::from(trimmed))
    } else {
        Err(UnsealError::KeyNotFound(format!(
            "key must have the format {}",
            vec!["XXXX"; KEY_GROUPS].join("-")
        )))
    }
}

/// Redacted rendering of a key for display: first and last group only.
pub fn redact(key: &str) -> String {
    let groups: Vec<&str> = key.split('-').collect();
    match groups.as_slice() {
        [first, .., last] if groups.len() > 2 => {
            let hidden = vec!["****"; groups.len() - 2].join("-");
            format!("{first}-{hidden}-{last}")
        }
        _ => "****".into(),
    }
}
