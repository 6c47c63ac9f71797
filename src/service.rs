// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Administrative Service
//!
//! [`Service`] is the surface consumed by an API or CLI. Every operation
//! takes the caller's [`Identity`] and (except for enclave management) the
//! name of the target enclave, where an empty name selects the default
//! enclave.
//!
//! ## Request Flow
//!
//! 1. A child context with the configured operation timeout is derived.
//! 2. The caller is authorized for the operation's request path. Enclave
//!    management and status are authorized in the default enclave.
//! 3. The target enclave must be registered (`NotFound` otherwise).
//! 4. The operation runs and an audit event records the outcome.
//!
//! Bulk operations process every item independently and report one
//! [`ItemOutcome`] per item.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::audit::{AuditEvent, AuditEventType};
use crate::auth::{Authorizer, Operation};
use crate::cancel::Context;
use crate::config::Config;
use crate::enclave::{Enclave, EnclaveInfo, Enclaves};
use crate::error::{KmsError, KmsResult};
use crate::identity::Identity;
use crate::layout::StorageLayout;
use crate::policy::{Policy, PolicyInfo};
use crate::repository::{IdentityInfo, KeyInfo, KeyRecord};
use crate::store::{self, drain, KeyIter, SharedStore, StoreState};
use crate::validate::validate_enclave_name;

/// Result for one item of a bulk operation.
#[derive(Debug)]
pub struct ItemOutcome {
    pub item: String,
    pub result: KmsResult<()>,
}

impl ItemOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// What a caller may learn about itself without any permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfInfo {
    pub identity: Identity,
    pub is_admin: bool,
    /// Absent for the admin, which needs no assignment.
    pub assignment: Option<IdentityInfo>,
    pub policy: Option<Policy>,
}

/// Authorization-gated access to enclaves, keys, policies and identities.
pub struct Service {
    store: SharedStore,
    enclaves: Enclaves,
    authorizer: Authorizer,
    default_enclave: String,
    op_timeout: Duration,
}

impl Service {
    /// Build the service over an already opened store.
    pub fn new(store: SharedStore, config: &Config) -> KmsResult<Self> {
        validate_enclave_name(&config.default_enclave)?;
        let layout = StorageLayout::new(config.key_prefix.clone());
        Ok(Self {
            enclaves: Enclaves::new(Arc::clone(&store), layout)?,
            store,
            authorizer: Authorizer::new(config.admin_identity.clone()),
            default_enclave: config.default_enclave.clone(),
            op_timeout: config.op_timeout,
        })
    }

    /// Open the configured store and make sure the default enclave exists.
    pub async fn open(ctx: &Context, config: &Config) -> KmsResult<Self> {
        let store = store::open(config).await?;
        let service = Self::new(store, config)?;
        service.init(ctx).await?;
        Ok(service)
    }

    /// Create the default enclave if it does not exist yet.
    pub async fn init(&self, ctx: &Context) -> KmsResult<()> {
        let ctx = self.call_context(ctx);
        let creator = self.authorizer.admin().cloned().unwrap_or_default();
        let info = self
            .enclaves
            .ensure(&ctx, &self.default_enclave, &creator)
            .await?;
        tracing::info!(enclave = %info.name, created_at = %info.created_at, "Default enclave ready");
        Ok(())
    }

    pub fn default_enclave(&self) -> &str {
        &self.default_enclave
    }

    pub fn enclaves(&self) -> &Enclaves {
        &self.enclaves
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    fn call_context(&self, ctx: &Context) -> Context {
        ctx.child().with_timeout(self.op_timeout)
    }

    fn enclave_name<'a>(&'a self, enclave: &'a str) -> &'a str {
        if enclave.is_empty() {
            &self.default_enclave
        } else {
            enclave
        }
    }

    /// Authorize `operation` and return the handle of the target enclave.
    async fn gate(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        operation: &Operation,
    ) -> KmsResult<Enclave> {
        let scope = if operation.is_enclave_admin() {
            self.default_enclave.as_str()
        } else {
            enclave
        };
        let handle = self.enclaves.handle(scope)?;
        if let Err(e) = self.authorizer.authorize(ctx, &handle, caller, operation).await {
            if matches!(e, KmsError::PermissionDenied { .. }) {
                tracing::warn!(
                    identity = %caller,
                    enclave = %scope,
                    path = %operation.path(),
                    "Permission denied"
                );
            }
            return Err(e);
        }
        handle.ensure_registered(ctx).await?;
        Ok(handle)
    }

    /// Run an authorized operation and audit its outcome.
    async fn gated<T, F, Fut>(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        operation: Operation,
        run: F,
    ) -> KmsResult<T>
    where
        F: FnOnce(Context, Enclave) -> Fut,
        Fut: Future<Output = KmsResult<T>>,
    {
        let ctx = self.call_context(ctx);
        let enclave = self.enclave_name(enclave);
        let result = match self.gate(&ctx, caller, enclave, &operation).await {
            Ok(handle) => run(ctx, handle).await,
            Err(e) => Err(e),
        };

        let event = match &result {
            Ok(_) => AuditEvent::for_operation(&operation),
            Err(e @ KmsError::PermissionDenied { .. }) => {
                AuditEvent::new(AuditEventType::PermissionDenied)
                    .with_path(operation.path())
                    .failed(format!("{}: {e}", e.error_code()))
            }
            Err(e) => AuditEvent::for_operation(&operation).failed(format!("{}: {e}", e.error_code())),
        };
        event.with_identity(caller).with_enclave(enclave).emit();
        result
    }

    // ========== Status ==========

    /// Ungated backend health check for the hosting process.
    pub async fn health(&self, ctx: &Context) -> KmsResult<StoreState> {
        self.store.status(&self.call_context(ctx)).await
    }

    /// Backend health, gated by `/v1/status`.
    pub async fn status(&self, ctx: &Context, caller: &Identity) -> KmsResult<StoreState> {
        self.gated(ctx, caller, "", Operation::Status, |ctx, _| async move {
            self.store.status(&ctx).await
        })
        .await
    }

    // ========== Keys ==========

    pub async fn create_key(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
        value: Vec<u8>,
    ) -> KmsResult<KeyInfo> {
        let operation = Operation::CreateKey(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.create_key(&ctx, name, value, caller).await
        })
        .await
    }

    pub async fn get_key(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
    ) -> KmsResult<KeyRecord> {
        let operation = Operation::GetKey(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.get_key(&ctx, name).await
        })
        .await
    }

    pub async fn describe_key(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
    ) -> KmsResult<KeyInfo> {
        let operation = Operation::DescribeKey(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.describe_key(&ctx, name).await
        })
        .await
    }

    pub async fn delete_key(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
    ) -> KmsResult<()> {
        let operation = Operation::DeleteKey(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.delete_key(&ctx, name).await
        })
        .await
    }

    /// Key names matching `pattern`, sorted.
    pub async fn list_keys(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        pattern: &str,
    ) -> KmsResult<Vec<String>> {
        let operation = Operation::ListKeys(pattern.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            sorted(enclave.list_keys(&ctx, pattern).await?, &ctx).await
        })
        .await
    }

    // ========== Policies ==========

    /// Create or overwrite a policy.
    pub async fn create_policy(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
        policy: Policy,
    ) -> KmsResult<PolicyInfo> {
        let operation = Operation::CreatePolicy(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.set_policy(&ctx, name, policy, caller).await
        })
        .await
    }

    /// Full policy including its rules.
    pub async fn get_policy(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
    ) -> KmsResult<Policy> {
        let operation = Operation::ReadPolicy(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.get_policy(&ctx, name).await
        })
        .await
    }

    pub async fn describe_policy(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
    ) -> KmsResult<PolicyInfo> {
        let operation = Operation::DescribePolicy(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.describe_policy(&ctx, name).await
        })
        .await
    }

    pub async fn list_policies(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        pattern: &str,
    ) -> KmsResult<Vec<String>> {
        let operation = Operation::ListPolicies(pattern.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            sorted(enclave.list_policies(&ctx, pattern).await?, &ctx).await
        })
        .await
    }

    /// Delete a policy; fails with `PolicyInUse` while it is assigned.
    pub async fn delete_policy(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        name: &str,
    ) -> KmsResult<()> {
        let operation = Operation::DeletePolicy(name.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.delete_policy(&ctx, name).await
        })
        .await
    }

    /// Delete several policies, each authorized and applied independently.
    pub async fn delete_policies<I, S>(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        names: I,
    ) -> Vec<ItemOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let result = self.delete_policy(ctx, caller, enclave, &name).await;
            if let Err(e) = &result {
                tracing::debug!(policy = %name, error = %e, "Policy deletion failed");
            }
            outcomes.push(ItemOutcome { item: name, result });
        }
        outcomes
    }

    /// Assign `policy` to each identity.
    ///
    /// The caller is authorized once for the policy. Each identity is then
    /// processed independently; a policy can be assigned neither to the
    /// admin nor by a caller to itself.
    pub async fn assign_policy<I>(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        policy: &str,
        identities: I,
    ) -> KmsResult<Vec<ItemOutcome>>
    where
        I: IntoIterator<Item = Identity>,
    {
        let identities: Vec<Identity> = identities.into_iter().collect();
        let operation = Operation::AssignPolicy(policy.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            let mut outcomes = Vec::with_capacity(identities.len());
            for identity in identities {
                let result = self
                    .assign_one(&ctx, &enclave, caller, policy, &identity)
                    .await;
                if let Err(e) = &result {
                    tracing::debug!(identity = %identity, policy = %policy, error = %e, "Policy assignment failed");
                }
                outcomes.push(ItemOutcome {
                    item: identity.to_string(),
                    result,
                });
            }
            Ok(outcomes)
        })
        .await
    }

    async fn assign_one(
        &self,
        ctx: &Context,
        enclave: &Enclave,
        caller: &Identity,
        policy: &str,
        identity: &Identity,
    ) -> KmsResult<()> {
        if self.authorizer.is_admin(identity) {
            return Err(KmsError::invalid("a policy cannot be assigned to the admin identity"));
        }
        if identity == caller {
            return Err(KmsError::invalid("a caller cannot assign a policy to itself"));
        }
        enclave.assign_policy(ctx, policy, identity, caller).await?;
        Ok(())
    }

    // ========== Identities ==========

    pub async fn describe_identity(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        identity: &Identity,
    ) -> KmsResult<IdentityInfo> {
        let operation = Operation::DescribeIdentity(identity.clone());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.describe_identity(&ctx, identity).await
        })
        .await
    }

    pub async fn list_identities(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        pattern: &str,
    ) -> KmsResult<Vec<String>> {
        let operation = Operation::ListIdentities(pattern.to_string());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            sorted(enclave.list_identities(&ctx, pattern).await?, &ctx).await
        })
        .await
    }

    /// Remove the identity's assignment. Succeeds if there is none.
    pub async fn delete_identity(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
        identity: &Identity,
    ) -> KmsResult<()> {
        let operation = Operation::DeleteIdentity(identity.clone());
        self.gated(ctx, caller, enclave, operation, |ctx, enclave| async move {
            enclave.unassign(&ctx, identity).await
        })
        .await
    }

    /// The caller's own assignment and policy. Needs no permission.
    pub async fn describe_self(
        &self,
        ctx: &Context,
        caller: &Identity,
        enclave: &str,
    ) -> KmsResult<SelfInfo> {
        let ctx = self.call_context(ctx);
        if caller.is_unknown() {
            return Err(KmsError::Unassigned(caller.to_string()));
        }
        let is_admin = self.authorizer.is_admin(caller);
        // Non-admins cannot tell a missing enclave from a missing assignment
        let enclave = match self.enclaves.open(&ctx, self.enclave_name(enclave)).await {
            Ok(enclave) => enclave,
            Err(KmsError::NotFound(_)) if !is_admin => {
                return Err(KmsError::Unassigned(caller.to_string()))
            }
            Err(e) => return Err(e),
        };
        if is_admin {
            return Ok(SelfInfo {
                identity: caller.clone(),
                is_admin: true,
                assignment: None,
                policy: None,
            });
        }

        let assignment = match enclave.describe_identity(&ctx, caller).await {
            Ok(info) => info,
            Err(KmsError::NotFound(_)) => return Err(KmsError::Unassigned(caller.to_string())),
            Err(e) => return Err(e),
        };
        let policy = enclave.get_policy(&ctx, &assignment.policy).await?;
        Ok(SelfInfo {
            identity: caller.clone(),
            is_admin: false,
            assignment: Some(assignment),
            policy: Some(policy),
        })
    }

    // ========== Enclaves ==========

    pub async fn create_enclave(
        &self,
        ctx: &Context,
        caller: &Identity,
        name: &str,
    ) -> KmsResult<EnclaveInfo> {
        let operation = Operation::CreateEnclave(name.to_string());
        self.gated(ctx, caller, "", operation, |ctx, _| async move {
            self.enclaves.create(&ctx, name, caller).await
        })
        .await
    }

    pub async fn describe_enclave(
        &self,
        ctx: &Context,
        caller: &Identity,
        name: &str,
    ) -> KmsResult<EnclaveInfo> {
        let operation = Operation::DescribeEnclave(name.to_string());
        self.gated(ctx, caller, "", operation, |ctx, _| async move {
            self.enclaves.describe(&ctx, name).await
        })
        .await
    }

    /// Delete an enclave and everything it owns. The default enclave
    /// cannot be deleted.
    pub async fn delete_enclave(&self, ctx: &Context, caller: &Identity, name: &str) -> KmsResult<()> {
        let operation = Operation::DeleteEnclave(name.to_string());
        self.gated(ctx, caller, "", operation, |ctx, _| async move {
            if name == self.default_enclave {
                return Err(KmsError::invalid(format!(
                    "the default enclave {name:?} cannot be deleted"
                )));
            }
            self.enclaves.delete(&ctx, name).await
        })
        .await
    }

    pub async fn list_enclaves(
        &self,
        ctx: &Context,
        caller: &Identity,
        pattern: &str,
    ) -> KmsResult<Vec<String>> {
        let operation = Operation::ListEnclaves(pattern.to_string());
        self.gated(ctx, caller, "", operation, |ctx, _| async move {
            sorted(self.enclaves.list(&ctx, pattern).await?, &ctx).await
        })
        .await
    }
}

async fn sorted(iter: KeyIter<String>, ctx: &Context) -> KmsResult<Vec<String>> {
    let mut names = drain(iter, ctx).await?;
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::store::MemStore;

    fn config() -> Config {
        Config {
            backend: BackendKind::Memory,
            admin_identity: Some(Identity::new("admin")),
            ..Config::default()
        }
    }

    async fn service() -> (Context, Service) {
        let ctx = Context::background();
        let service = Service::new(Arc::new(MemStore::new()), &config()).unwrap();
        service.init(&ctx).await.unwrap();
        (ctx, service)
    }

    #[tokio::test]
    async fn init_creates_default_enclave_once() {
        let (ctx, service) = service().await;
        service.init(&ctx).await.unwrap();
        let admin = Identity::new("admin");
        let enclaves = service.list_enclaves(&ctx, &admin, "").await.unwrap();
        assert_eq!(enclaves, vec!["default"]);
    }

    #[tokio::test]
    async fn unknown_caller_is_denied_everything() {
        let (ctx, service) = service().await;
        let err = service.status(&ctx, &Identity::unknown()).await.unwrap_err();
        assert!(matches!(err, KmsError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn writes_to_missing_enclave_fail_not_found() {
        let (ctx, service) = service().await;
        let admin = Identity::new("admin");
        let err = service
            .create_key(&ctx, &admin, "ghost", "k", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::NotFound(msg) if msg == "enclave ghost"));
    }

    #[tokio::test]
    async fn default_enclave_cannot_be_deleted() {
        let (ctx, service) = service().await;
        let admin = Identity::new("admin");
        let err = service.delete_enclave(&ctx, &admin, "default").await.unwrap_err();
        assert!(matches!(err, KmsError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn admin_and_self_assignment_are_refused() {
        let (ctx, service) = service().await;
        let admin = Identity::new("admin");
        service
            .create_policy(&ctx, &admin, "", "p", Policy::new(["*"], Vec::<String>::new()))
            .await
            .unwrap();
        let outcomes = service
            .assign_policy(&ctx, &admin, "", "p", [admin.clone(), Identity::new("bob")])
            .await
            .unwrap();
        assert!(matches!(outcomes[0].result, Err(KmsError::InvalidArgument(_))));
        assert!(outcomes[1].is_ok());
    }

    #[tokio::test]
    async fn describe_self_for_admin_needs_no_assignment() {
        let (ctx, service) = service().await;
        let info = service
            .describe_self(&ctx, &Identity::new("admin"), "")
            .await
            .unwrap();
        assert!(info.is_admin);
        assert!(info.assignment.is_none());

        let err = service
            .describe_self(&ctx, &Identity::new("stranger"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::Unassigned(_)));
    }

    #[tokio::test]
    async fn describe_self_hides_whether_an_enclave_exists() {
        let (ctx, service) = service().await;
        let stranger = Identity::new("stranger");
        let missing = service.describe_self(&ctx, &stranger, "ghost").await.unwrap_err();
        let present = service.describe_self(&ctx, &stranger, "").await.unwrap_err();
        assert!(matches!(missing, KmsError::Unassigned(ref id) if id == "stranger"));
        assert_eq!(missing.to_string(), present.to_string());

        let err = service
            .describe_self(&ctx, &Identity::new("admin"), "ghost")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
