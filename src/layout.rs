// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Name layout of records inside the backend namespace.
//!
//! ```text
//! {prefix}sys/enclaves/{enclave}
//! {prefix}enclaves/{enclave}/keys/{key}
//! {prefix}enclaves/{enclave}/policies/{policy}
//! {prefix}enclaves/{enclave}/identities/{identity}
//! ```

/// Name layout rooted at an optional deployment prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageLayout {
    prefix: String,
}

impl StorageLayout {
    /// Layout under `prefix` (may be empty).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ========== Enclave Registry ==========

    /// Namespace holding one record per enclave.
    pub fn enclave_registry(&self) -> String {
        format!("{}sys/enclaves/", self.prefix)
    }

    /// Registry record of a specific enclave.
    pub fn enclave_record(&self, enclave: &str) -> String {
        format!("{}{enclave}", self.enclave_registry())
    }

    // ========== Enclave Contents ==========

    /// Root of everything owned by an enclave.
    pub fn enclave_dir(&self, enclave: &str) -> String {
        format!("{}enclaves/{enclave}/", self.prefix)
    }

    pub fn keys_dir(&self, enclave: &str) -> String {
        format!("{}keys/", self.enclave_dir(enclave))
    }

    pub fn policies_dir(&self, enclave: &str) -> String {
        format!("{}policies/", self.enclave_dir(enclave))
    }

    pub fn identities_dir(&self, enclave: &str) -> String {
        format!("{}identities/", self.enclave_dir(enclave))
    }
}
