// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Policies
//!
//! A [`Policy`] is a named pair of ordered allow and deny rule lists. Each
//! rule is a glob pattern over request paths such as `/v1/key/get/my-key`.
//!
//! ## Evaluation
//!
//! 1. Any matching deny rule denies the request.
//! 2. Otherwise any matching allow rule allows it.
//! 3. Otherwise the request is denied.
//!
//! Rules are validated when a policy is stored. A rule that nonetheless fails
//! to compile at evaluation time is treated as matching if it is a deny rule
//! and as not matching if it is an allow rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};
use crate::identity::Identity;
use crate::pattern::Pattern;

/// Outcome of evaluating a request path against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Allow/deny rule set as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Unknown (empty) when the creator could not be identified.
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}

impl Policy {
    pub fn new<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
            deny: deny.into_iter().map(Into::into).collect(),
            created_at: None,
            created_by: Identity::unknown(),
        }
    }

    /// Check that every rule is a well-formed, non-empty pattern.
    pub fn validate(&self) -> KmsResult<()> {
        for (kind, rules) in [("allow", &self.allow), ("deny", &self.deny)] {
            for rule in rules {
                if rule.is_empty() {
                    return Err(KmsError::invalid(format!("empty {kind} rule")));
                }
                Pattern::new(rule)?;
            }
        }
        Ok(())
    }

    /// Drop repeated rules, keeping the first occurrence of each.
    pub fn normalize(&mut self) {
        dedup_in_order(&mut self.allow);
        dedup_in_order(&mut self.deny);
    }

    /// Evaluate a request path. Deny rules take priority.
    pub fn evaluate(&self, path: &str) -> Decision {
        let denied = self.deny.iter().any(|rule| match Pattern::new(rule) {
            Ok(pattern) => pattern.matches(path),
            Err(e) => {
                tracing::warn!(rule = %rule, error = %e, "Malformed deny rule treated as matching");
                true
            }
        });
        if denied {
            return Decision::Deny;
        }

        let allowed = self
            .allow
            .iter()
            .filter_map(|rule| Pattern::new(rule).ok())
            .any(|pattern| pattern.matches(path));
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    pub fn info(&self, name: impl Into<String>) -> PolicyInfo {
        PolicyInfo {
            name: name.into(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
        }
    }
}

fn dedup_in_order(rules: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    rules.retain(|rule| seen.insert(rule.clone()));
}

/// Metadata view of a policy, without its rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Identity::is_unknown")]
    pub created_by: Identity,
}
