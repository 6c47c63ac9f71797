// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Enclaves
//!
//! An enclave is a named partition owning its own keys, policies and
//! identity assignments. Two enclaves never share a namespace: the same key
//! or policy name can exist independently in each.
//!
//! ## Lifecycle
//!
//! Enclaves are created explicitly through [`Enclaves::create`] and recorded
//! in a registry. Writes through an [`Enclave`] handle first check that the
//! enclave is still registered, so a write never creates an enclave
//! implicitly.
//!
//! Deleting an enclave cascades: every key, policy and assignment under the
//! enclave is removed, and only once all of them are gone is the registry
//! record dropped. A failed cascade leaves the enclave registered so the
//! delete can be retried. Creating an enclave clears any records left under
//! its name before registering it, so a new enclave never inherits the
//! records of an earlier one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::identity::Identity;
use crate::layout::StorageLayout;
use crate::pattern::MATCH_ALL;
use crate::policy::{Policy, PolicyInfo};
use crate::repository::{
    IdentityInfo, IdentityRepository, KeyInfo, KeyRecord, KeyRepository, PolicyRepository, Records,
};
use crate::store::{drain, KeyIter, PrefixStore, SharedStore, Store};
use crate::validate::validate_enclave_name;

/// Registry record of an enclave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveRecord {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}

/// Enclave metadata as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}

impl EnclaveRecord {
    fn info(&self, name: &str) -> EnclaveInfo {
        EnclaveInfo {
            name: name.to_string(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
        }
    }
}

fn enclave_not_found(name: &str) -> KmsError {
    KmsError::NotFound(format!("enclave {name}"))
}

/// Handle to the records of one enclave.
#[derive(Clone)]
pub struct Enclave {
    name: String,
    registry: Records<EnclaveRecord>,
    keys: KeyRepository,
    policies: PolicyRepository,
    identities: IdentityRepository,
}

impl std::fmt::Debug for Enclave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enclave").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Enclave {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fail with `NotFound` unless the enclave is registered.
    pub async fn ensure_registered(&self, ctx: &Context) -> KmsResult<()> {
        match self.registry.find(ctx, &self.name).await? {
            Some(_) => Ok(()),
            None => Err(enclave_not_found(&self.name)),
        }
    }

    // ========== Keys ==========

    pub async fn create_key(
        &self,
        ctx: &Context,
        name: &str,
        value: Vec<u8>,
        creator: &Identity,
    ) -> KmsResult<KeyInfo> {
        self.ensure_registered(ctx).await?;
        self.keys.create(ctx, name, value, creator).await
    }

    pub async fn get_key(&self, ctx: &Context, name: &str) -> KmsResult<KeyRecord> {
        self.keys.get(ctx, name).await
    }

    pub async fn describe_key(&self, ctx: &Context, name: &str) -> KmsResult<KeyInfo> {
        self.keys.describe(ctx, name).await
    }

    pub async fn delete_key(&self, ctx: &Context, name: &str) -> KmsResult<()> {
        self.keys.delete(ctx, name).await
    }

    pub async fn list_keys(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.keys.list(ctx, pattern).await
    }

    // ========== Policies ==========

    /// Create or overwrite a policy.
    pub async fn set_policy(
        &self,
        ctx: &Context,
        name: &str,
        policy: Policy,
        creator: &Identity,
    ) -> KmsResult<PolicyInfo> {
        self.ensure_registered(ctx).await?;
        self.policies.set(ctx, name, policy, creator).await
    }

    pub async fn get_policy(&self, ctx: &Context, name: &str) -> KmsResult<Policy> {
        self.policies.get(ctx, name).await
    }

    pub async fn describe_policy(&self, ctx: &Context, name: &str) -> KmsResult<PolicyInfo> {
        self.policies.describe(ctx, name).await
    }

    pub async fn list_policies(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.policies.list(ctx, pattern).await
    }

    /// Delete a policy that no identity is assigned to.
    ///
    /// Fails with `PolicyInUse` while any identity in the enclave still
    /// references it. Deleting an absent policy succeeds.
    pub async fn delete_policy(&self, ctx: &Context, name: &str) -> KmsResult<()> {
        if !self.policies.exists(ctx, name).await? {
            return Ok(());
        }
        let users = self.identities_with_policy(ctx, name).await?;
        if !users.is_empty() {
            return Err(KmsError::PolicyInUse {
                policy: name.to_string(),
                identities: users.len(),
            });
        }
        self.policies.delete(ctx, name).await
    }

    // ========== Identities ==========

    /// Assign an existing policy to `identity`, replacing any prior
    /// assignment.
    pub async fn assign_policy(
        &self,
        ctx: &Context,
        policy: &str,
        identity: &Identity,
        creator: &Identity,
    ) -> KmsResult<IdentityInfo> {
        if identity.is_unknown() {
            return Err(KmsError::invalid(
                "a policy cannot be assigned to the unknown identity",
            ));
        }
        identity.validate()?;
        self.ensure_registered(ctx).await?;
        // NotFound if the policy does not exist
        self.policies.get(ctx, policy).await?;
        self.identities.assign(ctx, identity, policy, creator).await
    }

    /// Name of the policy assigned to `identity`.
    ///
    /// The unknown identity and identities without an assignment fail with
    /// `Unassigned`.
    pub async fn resolve(&self, ctx: &Context, identity: &Identity) -> KmsResult<String> {
        match self.identities.find(ctx, identity).await? {
            Some(record) => Ok(record.policy),
            None => Err(KmsError::Unassigned(identity.to_string())),
        }
    }

    /// Resolve `identity` and load its policy.
    pub async fn resolve_policy(
        &self,
        ctx: &Context,
        identity: &Identity,
    ) -> KmsResult<(String, Policy)> {
        let name = self.resolve(ctx, identity).await?;
        let policy = self.policies.get(ctx, &name).await?;
        Ok((name, policy))
    }

    pub async fn describe_identity(&self, ctx: &Context, identity: &Identity) -> KmsResult<IdentityInfo> {
        match self.identities.find(ctx, identity).await? {
            Some(record) => Ok(record.info(identity)),
            None => Err(KmsError::NotFound(format!("identity {identity}"))),
        }
    }

    pub async fn list_identities(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.identities.list(ctx, pattern).await
    }

    /// Remove the assignment of `identity`. Succeeds if there is none.
    pub async fn unassign(&self, ctx: &Context, identity: &Identity) -> KmsResult<()> {
        if identity.is_unknown() {
            return Ok(());
        }
        self.identities.delete(ctx, identity).await
    }

    /// Every identity currently assigned `policy`.
    pub async fn identities_with_policy(&self, ctx: &Context, policy: &str) -> KmsResult<Vec<Identity>> {
        let names = drain(self.identities.list(ctx, MATCH_ALL).await?, ctx).await?;
        let mut matches = Vec::new();
        for name in names {
            let identity = Identity::new(name);
            // Assignments removed since listing are skipped
            if let Some(record) = self.identities.find(ctx, &identity).await? {
                if record.policy == policy {
                    matches.push(identity);
                }
            }
        }
        Ok(matches)
    }
}

/// Registry of all enclaves.
#[derive(Clone)]
pub struct Enclaves {
    store: SharedStore,
    layout: StorageLayout,
    registry: Records<EnclaveRecord>,
}

impl Enclaves {
    pub fn new(store: SharedStore, layout: StorageLayout) -> KmsResult<Self> {
        let registry = Records::new(scoped(&store, layout.enclave_registry())?);
        Ok(Self {
            store,
            layout,
            registry,
        })
    }

    /// Register a new enclave. Fails with `AlreadyExists` if taken.
    ///
    /// Records left under the name by an earlier enclave are removed first;
    /// the enclave is not registered unless that succeeds.
    pub async fn create(&self, ctx: &Context, name: &str, creator: &Identity) -> KmsResult<EnclaveInfo> {
        validate_enclave_name(name)?;
        if self.registry.find(ctx, &name.to_string()).await?.is_some() {
            return Err(KmsError::AlreadyExists(format!("enclave {name}")));
        }
        self.purge_records(ctx, name).await?;

        let record = EnclaveRecord {
            created_at: Utc::now(),
            created_by: creator.clone(),
        };
        let info = record.info(name);
        self.registry
            .create(ctx, name.to_string(), record)
            .await
            .map_err(|e| match e {
                KmsError::AlreadyExists(_) => KmsError::AlreadyExists(format!("enclave {name}")),
                other => other,
            })?;
        tracing::info!(enclave = %name, "Enclave created");
        Ok(info)
    }

    /// Register the enclave unless it already exists.
    pub async fn ensure(&self, ctx: &Context, name: &str, creator: &Identity) -> KmsResult<EnclaveInfo> {
        match self.create(ctx, name, creator).await {
            Err(KmsError::AlreadyExists(_)) => self.describe(ctx, name).await,
            other => other,
        }
    }

    pub async fn describe(&self, ctx: &Context, name: &str) -> KmsResult<EnclaveInfo> {
        validate_enclave_name(name)?;
        match self.registry.find(ctx, &name.to_string()).await? {
            Some(record) => Ok(record.info(name)),
            None => Err(enclave_not_found(name)),
        }
    }

    /// Handle to a registered enclave; `NotFound` otherwise.
    pub async fn open(&self, ctx: &Context, name: &str) -> KmsResult<Enclave> {
        let enclave = self.handle(name)?;
        enclave.ensure_registered(ctx).await?;
        Ok(enclave)
    }

    /// Handle to an enclave without checking its registration.
    ///
    /// Reads through the handle of an unregistered enclave see no records;
    /// writes fail with `NotFound`.
    pub fn handle(&self, name: &str) -> KmsResult<Enclave> {
        validate_enclave_name(name)?;
        Ok(Enclave {
            name: name.to_string(),
            registry: self.registry.clone(),
            keys: KeyRepository::new(scoped(&self.store, self.layout.keys_dir(name))?),
            policies: PolicyRepository::new(scoped(&self.store, self.layout.policies_dir(name))?),
            identities: IdentityRepository::new(scoped(
                &self.store,
                self.layout.identities_dir(name),
            )?),
        })
    }

    pub async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.registry.list(ctx, pattern).await
    }

    /// Delete everything the enclave owns, then unregister it.
    ///
    /// Every record is attempted; failures are logged and the first one is
    /// returned with the enclave still registered.
    pub async fn delete(&self, ctx: &Context, name: &str) -> KmsResult<()> {
        self.describe(ctx, name).await?;
        self.purge_records(ctx, name).await?;
        self.registry.delete(ctx, &name.to_string()).await?;
        tracing::info!(enclave = %name, "Enclave deleted");
        Ok(())
    }

    /// Remove every key, policy and assignment stored under `name`.
    async fn purge_records(&self, ctx: &Context, name: &str) -> KmsResult<()> {
        let mut first_err = None;
        for dir in [
            self.layout.keys_dir(name),
            self.layout.policies_dir(name),
            self.layout.identities_dir(name),
        ] {
            let store = scoped(&self.store, dir)?;
            if let Some(e) = purge(ctx, store.as_ref()).await {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => {
                tracing::warn!(enclave = %name, error = %e, "Enclave records not fully removed");
                Err(e)
            }
            None => Ok(()),
        }
    }
}

fn scoped(store: &SharedStore, prefix: String) -> KmsResult<SharedStore> {
    Ok(Arc::new(PrefixStore::new(Arc::clone(store), prefix)?))
}

/// Delete every name in `store`, returning the first failure.
async fn purge(ctx: &Context, store: &dyn Store<String, Vec<u8>>) -> Option<KmsError> {
    let listed = match store.list(ctx, MATCH_ALL).await {
        Ok(iter) => drain(iter, ctx).await,
        Err(e) => Err(e),
    };
    let names = match listed {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list records for deletion");
            return Some(e);
        }
    };

    let mut first_err = None;
    for name in names {
        if let Err(e) = store.delete(ctx, &name).await {
            tracing::warn!(record = %name, error = %e, "Failed to delete record");
            first_err.get_or_insert(e);
        }
    }
    first_err
}
