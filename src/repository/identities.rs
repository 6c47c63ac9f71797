// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity assignment repository.
//!
//! Maps an identity to the name of the policy it is assigned, one record per
//! identity. Assigning again overwrites the previous assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Records;
use crate::cancel::Context;
use crate::error::KmsResult;
use crate::identity::Identity;
use crate::store::{KeyIter, SharedStore, Store};

/// Assignment record as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub policy: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}

/// Assignment metadata as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub identity: Identity,
    pub policy: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}

impl IdentityRecord {
    pub fn info(&self, identity: &Identity) -> IdentityInfo {
        IdentityInfo {
            identity: identity.clone(),
            policy: self.policy.clone(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
        }
    }
}

/// Repository for the identity assignments of one enclave.
#[derive(Clone)]
pub struct IdentityRepository {
    records: Records<IdentityRecord>,
}

impl IdentityRepository {
    pub fn new(store: SharedStore) -> Self {
        Self {
            records: Records::new(store),
        }
    }

    /// Assign `policy` to `identity`, replacing any earlier assignment.
    pub async fn assign(
        &self,
        ctx: &Context,
        identity: &Identity,
        policy: &str,
        creator: &Identity,
    ) -> KmsResult<IdentityInfo> {
        identity.validate()?;
        let record = IdentityRecord {
            policy: policy.to_string(),
            created_at: Utc::now(),
            created_by: creator.clone(),
        };
        self.records
            .replace(ctx, identity.as_str().to_string(), &record)
            .await?;
        Ok(record.info(identity))
    }

    /// The assignment of `identity`, or `None` if it has none.
    pub async fn find(&self, ctx: &Context, identity: &Identity) -> KmsResult<Option<IdentityRecord>> {
        if identity.is_unknown() {
            return Ok(None);
        }
        identity.validate()?;
        self.records.find(ctx, &identity.as_str().to_string()).await
    }

    /// Remove the assignment. Removing an absent assignment succeeds.
    pub async fn delete(&self, ctx: &Context, identity: &Identity) -> KmsResult<()> {
        identity.validate()?;
        self.records.delete(ctx, &identity.as_str().to_string()).await
    }

    pub async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.records.list(ctx, pattern).await
    }
}
