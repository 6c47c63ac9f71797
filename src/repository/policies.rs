// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Policy repository.

use chrono::Utc;

use super::Records;
use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::identity::Identity;
use crate::policy::{Policy, PolicyInfo};
use crate::store::{KeyIter, SharedStore, Store};
use crate::validate::validate_name;

/// Repository for the policies of one enclave.
#[derive(Clone)]
pub struct PolicyRepository {
    records: Records<Policy>,
}

impl PolicyRepository {
    pub fn new(store: SharedStore) -> Self {
        Self {
            records: Records::new(store),
        }
    }

    /// Create or overwrite a policy.
    ///
    /// Rules are validated and de-duplicated; creation metadata is stamped
    /// with the current time and `creator`.
    pub async fn set(
        &self,
        ctx: &Context,
        name: &str,
        mut policy: Policy,
        creator: &Identity,
    ) -> KmsResult<PolicyInfo> {
        validate_name("policy", name)?;
        policy.validate()?;
        policy.normalize();
        policy.created_at = Some(Utc::now());
        policy.created_by = creator.clone();

        self.records.replace(ctx, name.to_string(), &policy).await?;
        Ok(policy.info(name))
    }

    pub async fn get(&self, ctx: &Context, name: &str) -> KmsResult<Policy> {
        validate_name("policy", name)?;
        self.records
            .get(ctx, &name.to_string())
            .await
            .map_err(|e| match e {
                KmsError::NotFound(_) => KmsError::NotFound(format!("policy {name}")),
                other => other,
            })
    }

    pub async fn describe(&self, ctx: &Context, name: &str) -> KmsResult<PolicyInfo> {
        Ok(self.get(ctx, name).await?.info(name))
    }

    /// Whether the policy exists.
    pub async fn exists(&self, ctx: &Context, name: &str) -> KmsResult<bool> {
        validate_name("policy", name)?;
        Ok(self.records.find(ctx, &name.to_string()).await?.is_some())
    }

    /// Remove the record. Callers enforce the in-use guard.
    pub async fn delete(&self, ctx: &Context, name: &str) -> KmsResult<()> {
        validate_name("policy", name)?;
        self.records.delete(ctx, &name.to_string()).await
    }

    pub async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.records.list(ctx, pattern).await
    }
}
