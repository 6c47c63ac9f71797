// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key repository.
//!
//! Keys hold sealed key material. A key is never overwritten: rotating it
//! means deleting and creating it again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{base64_bytes, Records};
use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::identity::Identity;
use crate::store::{KeyIter, SharedStore, Store};
use crate::validate::validate_name;

/// Key record as stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Sealed key material.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("value", &"<sealed>")
            .field("created_at", &self.created_at)
            .field("created_by", &self.created_by)
            .finish()
    }
}

/// Key metadata without the sealed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}

impl KeyRecord {
    pub fn new(value: Vec<u8>, created_by: Identity) -> Self {
        Self {
            value,
            created_at: Utc::now(),
            created_by,
        }
    }

    pub fn info(&self, name: impl Into<String>) -> KeyInfo {
        KeyInfo {
            name: name.into(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
        }
    }
}

/// Repository for the keys of one enclave.
#[derive(Clone)]
pub struct KeyRepository {
    records: Records<KeyRecord>,
}

impl KeyRepository {
    pub fn new(store: SharedStore) -> Self {
        Self {
            records: Records::new(store),
        }
    }

    /// Create a key. Fails with `AlreadyExists` if the name is taken.
    pub async fn create(
        &self,
        ctx: &Context,
        name: &str,
        value: Vec<u8>,
        creator: &Identity,
    ) -> KmsResult<KeyInfo> {
        validate_name("key", name)?;
        let record = KeyRecord::new(value, creator.clone());
        let info = record.info(name);
        self.records.create(ctx, name.to_string(), record).await?;
        Ok(info)
    }

    /// Get a key including its sealed value.
    pub async fn get(&self, ctx: &Context, name: &str) -> KmsResult<KeyRecord> {
        validate_name("key", name)?;
        self.records
            .get(ctx, &name.to_string())
            .await
            .map_err(|e| match e {
                KmsError::NotFound(_) => KmsError::NotFound(format!("key {name}")),
                other => other,
            })
    }

    pub async fn describe(&self, ctx: &Context, name: &str) -> KmsResult<KeyInfo> {
        Ok(self.get(ctx, name).await?.info(name))
    }

    /// Delete a key. Deleting an absent key succeeds.
    pub async fn delete(&self, ctx: &Context, name: &str) -> KmsResult<()> {
        validate_name("key", name)?;
        self.records.delete(ctx, &name.to_string()).await
    }

    pub async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.records.list(ctx, pattern).await
    }
}
