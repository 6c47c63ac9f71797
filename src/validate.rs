// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Name validation for enclaves, keys and policies.

use crate::error::{KmsError, KmsResult};
use crate::pattern::has_metacharacters;

/// Longest accepted name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Validate a key or policy name.
///
/// Names end up inside request paths (`/v1/key/create/{name}`) and storage
/// names, so they may not contain `/`, glob metacharacters or control
/// characters.
pub fn validate_name(kind: &str, name: &str) -> KmsResult<()> {
    if name.is_empty() {
        return Err(KmsError::invalid(format!("{kind} name must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(KmsError::invalid(format!(
            "{kind} name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if name.contains('/') || name.chars().any(char::is_control) {
        return Err(KmsError::invalid(format!(
            "{kind} name {name:?} contains an illegal character"
        )));
    }
    if has_metacharacters(name) {
        return Err(KmsError::invalid(format!(
            "{kind} name {name:?} contains a pattern character"
        )));
    }
    Ok(())
}

/// Validate an enclave name: `[A-Za-z0-9._-]`, not `.` or `..`.
pub fn validate_enclave_name(name: &str) -> KmsResult<()> {
    validate_name("enclave", name)?;
    if name == "." || name == ".." {
        return Err(KmsError::invalid(format!("enclave name {name:?} is reserved")));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(KmsError::invalid(format!(
            "enclave name {name:?} may only contain letters, digits, '.', '_' and '-'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_name("key", "my-key").is_ok());
        assert!(validate_name("policy", "app.read_only-v2").is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_names() {
        assert!(validate_name("key", "").is_err());
        assert!(validate_name("key", &"k".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name("key", &"k".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn rejects_separators_patterns_and_controls() {
        assert!(validate_name("key", "a/b").is_err());
        assert!(validate_name("key", "a*").is_err());
        assert!(validate_name("key", "a?").is_err());
        assert!(validate_name("key", "a\nb").is_err());
    }

    #[test]
    fn enclave_names_are_restricted() {
        assert!(validate_enclave_name("tenant-1").is_ok());
        assert!(validate_enclave_name("tenant 1").is_err());
        assert!(validate_enclave_name("tenänt").is_err());
        assert!(validate_enclave_name("..").is_err());
    }
}
