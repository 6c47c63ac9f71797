// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authorization
//!
//! Every request is reduced to an [`Operation`] whose [`path`](Operation::path)
//! is evaluated against the caller's policy in the target enclave.
//!
//! ## Decision
//!
//! - The unknown identity is always denied.
//! - The configured admin identity is always allowed.
//! - Otherwise the identity's assigned policy decides. An identity with no
//!   assignment, or whose assigned policy no longer exists, is denied.
//!
//! Backend failures and cancellation surface as errors, never as a decision.

use std::fmt;

use crate::cancel::Context;
use crate::enclave::Enclave;
use crate::error::{KmsError, KmsResult};
use crate::identity::Identity;
use crate::pattern::MATCH_ALL;
use crate::policy::Decision;

/// An authorization-gated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateKey(String),
    GetKey(String),
    DescribeKey(String),
    DeleteKey(String),
    ListKeys(String),

    CreatePolicy(String),
    AssignPolicy(String),
    DescribePolicy(String),
    ReadPolicy(String),
    DeletePolicy(String),
    ListPolicies(String),

    DescribeIdentity(Identity),
    DeleteIdentity(Identity),
    ListIdentities(String),

    CreateEnclave(String),
    DescribeEnclave(String),
    DeleteEnclave(String),
    ListEnclaves(String),

    Status,
}

fn or_all(pattern: &str) -> &str {
    if pattern.is_empty() {
        MATCH_ALL
    } else {
        pattern
    }
}

impl Operation {
    /// Request path matched against policy rules.
    pub fn path(&self) -> String {
        match self {
            Operation::CreateKey(name) => format!("/v1/key/create/{name}"),
            Operation::GetKey(name) => format!("/v1/key/get/{name}"),
            Operation::DescribeKey(name) => format!("/v1/key/describe/{name}"),
            Operation::DeleteKey(name) => format!("/v1/key/delete/{name}"),
            Operation::ListKeys(pattern) => format!("/v1/key/list/{}", or_all(pattern)),

            Operation::CreatePolicy(name) => format!("/v1/policy/create/{name}"),
            Operation::AssignPolicy(name) => format!("/v1/policy/assign/{name}"),
            Operation::DescribePolicy(name) => format!("/v1/policy/describe/{name}"),
            Operation::ReadPolicy(name) => format!("/v1/policy/read/{name}"),
            Operation::DeletePolicy(name) => format!("/v1/policy/delete/{name}"),
            Operation::ListPolicies(pattern) => format!("/v1/policy/list/{}", or_all(pattern)),

            Operation::DescribeIdentity(id) => format!("/v1/identity/describe/{}", id.as_str()),
            Operation::DeleteIdentity(id) => format!("/v1/identity/delete/{}", id.as_str()),
            Operation::ListIdentities(pattern) => {
                format!("/v1/identity/list/{}", or_all(pattern))
            }

            Operation::CreateEnclave(name) => format!("/v1/enclave/create/{name}"),
            Operation::DescribeEnclave(name) => format!("/v1/enclave/describe/{name}"),
            Operation::DeleteEnclave(name) => format!("/v1/enclave/delete/{name}"),
            Operation::ListEnclaves(pattern) => format!("/v1/enclave/list/{}", or_all(pattern)),

            Operation::Status => "/v1/status".to_string(),
        }
    }

    /// Operations on enclaves themselves, authorized in the default enclave.
    pub fn is_enclave_admin(&self) -> bool {
        matches!(
            self,
            Operation::CreateEnclave(_)
                | Operation::DescribeEnclave(_)
                | Operation::DeleteEnclave(_)
                | Operation::ListEnclaves(_)
                | Operation::Status
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Decides whether an identity may perform an operation.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    admin: Option<Identity>,
}

impl Authorizer {
    /// `admin` is the identity with unrestricted access, if any.
    pub fn new(admin: Option<Identity>) -> Self {
        Self {
            admin: admin.filter(|id| !id.is_unknown()),
        }
    }

    pub fn admin(&self) -> Option<&Identity> {
        self.admin.as_ref()
    }

    pub fn is_admin(&self, identity: &Identity) -> bool {
        !identity.is_unknown() && self.admin.as_ref() == Some(identity)
    }

    /// Evaluate `path` for `identity` within `enclave`.
    pub async fn decide(
        &self,
        ctx: &Context,
        enclave: &Enclave,
        identity: &Identity,
        path: &str,
    ) -> KmsResult<Decision> {
        if identity.is_unknown() {
            return Ok(Decision::Deny);
        }
        if self.is_admin(identity) {
            return Ok(Decision::Allow);
        }

        let (policy_name, policy) = match enclave.resolve_policy(ctx, identity).await {
            Ok(resolved) => resolved,
            Err(KmsError::Unassigned(_)) => return Ok(Decision::Deny),
            Err(KmsError::NotFound(what)) => {
                tracing::warn!(
                    enclave = %enclave.name(),
                    identity = %identity,
                    missing = %what,
                    "Identity is assigned a policy that does not exist"
                );
                return Ok(Decision::Deny);
            }
            Err(e) => return Err(e),
        };

        let decision = policy.evaluate(path);
        tracing::debug!(
            enclave = %enclave.name(),
            identity = %identity,
            policy = %policy_name,
            path = %path,
            ?decision,
            "Authorization decision"
        );
        Ok(decision)
    }

    /// Like [`decide`](Self::decide), failing with `PermissionDenied` on deny.
    pub async fn authorize(
        &self,
        ctx: &Context,
        enclave: &Enclave,
        identity: &Identity,
        operation: &Operation,
    ) -> KmsResult<()> {
        let path = operation.path();
        match self.decide(ctx, enclave, identity, &path).await? {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(KmsError::PermissionDenied {
                identity: identity.to_string(),
                path,
            }),
        }
    }
}
