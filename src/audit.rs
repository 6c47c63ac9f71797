// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Every gated operation and every authorization denial produces an
//! [`AuditEvent`], emitted as one JSON document on the `audit` tracing
//! target so it can be routed independently of diagnostic logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Operation;
use crate::identity::Identity;

/// Tracing target of audit events.
pub const AUDIT_TARGET: &str = "audit";

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Key events
    KeyCreated,
    KeyAccessed,
    KeyDescribed,
    KeyDeleted,
    KeysListed,

    // Policy events
    PolicyCreated,
    PolicyAssigned,
    PolicyDescribed,
    PolicyRead,
    PolicyDeleted,
    PoliciesListed,

    // Identity events
    IdentityDescribed,
    IdentityDeleted,
    IdentitiesListed,

    // Enclave events
    EnclaveCreated,
    EnclaveDescribed,
    EnclaveDeleted,
    EnclavesListed,

    StatusChecked,
    PermissionDenied,
}

impl From<&Operation> for AuditEventType {
    fn from(operation: &Operation) -> Self {
        match operation {
            Operation::CreateKey(_) => AuditEventType::KeyCreated,
            Operation::GetKey(_) => AuditEventType::KeyAccessed,
            Operation::DescribeKey(_) => AuditEventType::KeyDescribed,
            Operation::DeleteKey(_) => AuditEventType::KeyDeleted,
            Operation::ListKeys(_) => AuditEventType::KeysListed,
            Operation::CreatePolicy(_) => AuditEventType::PolicyCreated,
            Operation::AssignPolicy(_) => AuditEventType::PolicyAssigned,
            Operation::DescribePolicy(_) => AuditEventType::PolicyDescribed,
            Operation::ReadPolicy(_) => AuditEventType::PolicyRead,
            Operation::DeletePolicy(_) => AuditEventType::PolicyDeleted,
            Operation::ListPolicies(_) => AuditEventType::PoliciesListed,
            Operation::DescribeIdentity(_) => AuditEventType::IdentityDescribed,
            Operation::DeleteIdentity(_) => AuditEventType::IdentityDeleted,
            Operation::ListIdentities(_) => AuditEventType::IdentitiesListed,
            Operation::CreateEnclave(_) => AuditEventType::EnclaveCreated,
            Operation::DescribeEnclave(_) => AuditEventType::EnclaveDescribed,
            Operation::DeleteEnclave(_) => AuditEventType::EnclaveDeleted,
            Operation::ListEnclaves(_) => AuditEventType::EnclavesListed,
            Operation::Status => AuditEventType::StatusChecked,
        }
    }
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Caller identity; absent for the unknown identity.
    pub identity: Option<String>,
    pub enclave: Option<String>,
    /// Request path of the operation.
    pub path: Option<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error code and message if the operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            identity: None,
            enclave: None,
            path: None,
            success: true,
            error: None,
        }
    }

    /// Event for `operation`, carrying its request path.
    pub fn for_operation(operation: &Operation) -> Self {
        Self::new(operation.into()).with_path(operation.path())
    }

    pub fn with_identity(mut self, identity: &Identity) -> Self {
        self.identity = (!identity.is_unknown()).then(|| identity.as_str().to_string());
        self
    }

    pub fn with_enclave(mut self, enclave: impl Into<String>) -> Self {
        self.enclave = Some(enclave.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Write the event to the audit target.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::info!(
                target: AUDIT_TARGET,
                event_type = ?self.event_type,
                success = self.success,
                event = %json,
                "audit"
            ),
            Err(e) => tracing::error!(
                target: AUDIT_TARGET,
                event_id = %self.event_id,
                error = %e,
                "Failed to serialize audit event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let event = AuditEvent::for_operation(&Operation::GetKey("k".into()))
            .with_identity(&Identity::new("alice"))
            .with_enclave("default")
            .failed("not_found: key k");

        assert_eq!(event.event_type, AuditEventType::KeyAccessed);
        assert_eq!(event.path.as_deref(), Some("/v1/key/get/k"));
        assert_eq!(event.identity.as_deref(), Some("alice"));
        assert_eq!(event.enclave.as_deref(), Some("default"));
        assert!(!event.success);
        assert_eq!(event.error.as_deref(), Some("not_found: key k"));
    }

    #[test]
    fn unknown_identity_is_not_recorded() {
        let event = AuditEvent::new(AuditEventType::PermissionDenied).with_identity(&Identity::unknown());
        assert!(event.identity.is_none());
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_value(AuditEvent::new(AuditEventType::PolicyAssigned)).unwrap();
        assert_eq!(json["event_type"], "policy_assigned");
        assert_eq!(json["success"], true);
        assert!(json.get("details").is_none());
    }
}
