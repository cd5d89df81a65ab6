//! Card key credential validation
//!
//! Card keys are issued and managed elsewhere; services only see an opaque
//! per-request credential. Keys are never kept in plain text: the accepted
//! set holds SHA-256 digests, and the digest doubles as the owner reference
//! stored on sessions.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

// ========================================
// Error Types
// ========================================

/// Credential validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No card key on the request
    Missing,
    /// Card key not in the accepted set
    Invalid,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Missing => write!(f, "Missing card key"),
            CredentialError::Invalid => write!(f, "Invalid card key"),
        }
    }
}

impl std::error::Error for CredentialError {}

// ========================================
// Hashing
// ========================================

/// Lowercase hex SHA-256 of `input`
///
/// # Examples
///
/// ```
/// use polish_common::api::auth::sha256_hex;
///
/// assert_eq!(
///     sha256_hex("abc"),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Digest of a card key (trimmed before hashing)
pub fn hash_card_key(card_key: &str) -> String {
    sha256_hex(card_key.trim())
}

fn is_hex_digest(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

// ========================================
// Owner + accepted key set
// ========================================

/// Opaque owner reference derived from a valid card key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an already-hashed owner reference (e.g. loaded from storage)
    pub fn from_digest(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to correlate log lines
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "{prefix}")
    }
}

/// Accepted card keys, stored as digests
#[derive(Debug, Clone, Default)]
pub struct CardKeySet {
    digests: HashSet<String>,
}

impl CardKeySet {
    /// Build from config entries.
    ///
    /// An entry that is already a 64-char hex digest is taken as-is; any
    /// other entry is treated as a plain card key and hashed.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().to_string())
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                if is_hex_digest(&entry) {
                    entry.to_ascii_lowercase()
                } else {
                    hash_card_key(&entry)
                }
            })
            .collect();
        Self { digests }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Validate the card key of one request
    ///
    /// # Examples
    ///
    /// ```
    /// use polish_common::api::auth::{CardKeySet, CredentialError};
    ///
    /// let keys = CardKeySet::from_entries(["card-123"]);
    /// assert!(keys.validate(Some("card-123")).is_ok());
    /// assert_eq!(keys.validate(Some("nope")), Err(CredentialError::Invalid));
    /// assert_eq!(keys.validate(None), Err(CredentialError::Missing));
    /// ```
    pub fn validate(&self, card_key: Option<&str>) -> Result<OwnerId, CredentialError> {
        let card_key = card_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(CredentialError::Missing)?;

        let digest = hash_card_key(card_key);
        if self.digests.contains(&digest) {
            Ok(OwnerId(digest))
        } else {
            Err(CredentialError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_entries_accepted_verbatim() {
        let digest = hash_card_key("secret-card");
        let keys = CardKeySet::from_entries([digest.to_uppercase()]);
        let owner = keys.validate(Some("secret-card")).unwrap();
        assert_eq!(owner.as_str(), digest);
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let keys = CardKeySet::from_entries(["  card-1  "]);
        assert!(keys.validate(Some("card-1\n")).is_ok());
    }

    #[test]
    fn test_blank_key_is_missing() {
        let keys = CardKeySet::from_entries(["card-1"]);
        assert_eq!(keys.validate(Some("   ")), Err(CredentialError::Missing));
    }

    #[test]
    fn test_owner_display_is_truncated() {
        let owner = OwnerId::from_digest(hash_card_key("card-1"));
        assert_eq!(owner.to_string().len(), 12);
    }

    #[test]
    fn test_owner_display_respects_char_boundaries() {
        let owner = OwnerId::from_digest("ééééééééééééééé");
        assert_eq!(owner.to_string(), "éééééééééééé");

        let short = OwnerId::from_digest("ß1");
        assert_eq!(short.to_string(), "ß1");
    }
}
