// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client identities.
//!
//! An [`Identity`] is the fingerprint of a client credential. The transport
//! layer derives it (usually from the TLS client certificate) and the core
//! treats it as an opaque string. The empty identity is the *unknown*
//! sentinel: it stands for absent or unverifiable credentials and is never
//! granted anything.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KmsError, KmsResult};
use crate::validate::MAX_NAME_LEN;

/// Fingerprint of a client credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a fingerprint. Surrounding whitespace is dropped.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        let trimmed = fingerprint.trim();
        if trimmed.len() == fingerprint.len() {
            Self(fingerprint)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// The sentinel for absent or unverifiable credentials.
    pub fn unknown() -> Self {
        Self(String::new())
    }

    /// Derive the identity of a public key: lowercase hex SHA-256 of its DER
    /// encoding (`SubjectPublicKeyInfo`).
    pub fn from_public_key(der: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(der)))
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the identity can be stored and addressed.
    pub fn validate(&self) -> KmsResult<()> {
        if self.is_unknown() {
            return Err(KmsError::invalid("identity is unknown"));
        }
        if self.0.len() > MAX_NAME_LEN {
            return Err(KmsError::invalid(format!(
                "identity exceeds {MAX_NAME_LEN} bytes"
            )));
        }
        if self.0.contains('/') || self.0.chars().any(char::is_control) {
            return Err(KmsError::invalid(format!(
                "identity {:?} contains an illegal character",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            f.write_str("<unknown>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl FromStr for Identity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Identity::new(s))
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Identity::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_empty() {
        let id = Identity::unknown();
        assert!(id.is_unknown());
        assert_eq!(id.to_string(), "<unknown>");
        assert_eq!(Identity::default(), id);
    }

    #[test]
    fn whitespace_is_trimmed() {
        let id = Identity::new("  abc \n");
        assert_eq!(id.as_str(), "abc");
        assert!(Identity::new("   ").is_unknown());
    }

    #[test]
    fn public_key_fingerprint_is_sha256_hex() {
        let id = Identity::from_public_key(b"");
        assert_eq!(
            id.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn validation_rejects_unknown_and_separators() {
        assert!(Identity::unknown().validate().is_err());
        assert!(Identity::new("a/b").validate().is_err());
        assert!(Identity::new("032dc24c353f1baf").validate().is_ok());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = Identity::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: Identity = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
