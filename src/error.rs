// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy shared by the store contract, the policy engine, the
//! identity manager and the enclave registry.
//!
//! Connectors map their native failures into these variants at the edge, so
//! everything above the [`Store`](crate::store::Store) trait sees the same
//! errors regardless of which backend is configured.

/// Error type for every keystore operation.
#[derive(Debug, thiserror::Error)]
pub enum KmsError {
    /// A `create` targeted a name that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The named entity was never created or has been deleted.
    #[error("not found: {0}")]
    NotFound(String),

    /// The identity has no policy assigned in the enclave.
    #[error("identity {0} has no policy assigned")]
    Unassigned(String),

    /// The backend could not be reached.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend rejected our credentials.
    #[error("backend authentication failed: {0}")]
    Unauthorized(String),

    /// The caller's context was canceled or its deadline passed.
    #[error("operation canceled")]
    Canceled,

    /// Malformed pattern, empty name, unusable configuration value, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The authorization decision for this request was deny.
    #[error("permission denied: {identity} may not access {path}")]
    PermissionDenied { identity: String, path: String },

    /// The policy is still assigned to at least one identity.
    #[error("policy {policy} is still assigned to {identities} identities")]
    PolicyInUse { policy: String, identities: usize },

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend worker task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for keystore operations.
pub type KmsResult<T> = Result<T, KmsError>;

impl KmsError {
    /// Stable machine-readable code for the API / CLI boundary.
    pub fn error_code(&self) -> &'static str {
        match self {
            KmsError::AlreadyExists(_) => "already_exists",
            KmsError::NotFound(_) => "not_found",
            KmsError::Unassigned(_) => "unassigned",
            KmsError::Unreachable(_) => "unreachable",
            KmsError::Unauthorized(_) => "unauthorized",
            KmsError::Canceled => "canceled",
            KmsError::InvalidArgument(_) => "invalid_argument",
            KmsError::PermissionDenied { .. } => "permission_denied",
            KmsError::PolicyInUse { .. } => "policy_in_use",
            KmsError::Serialization(_) => "serialization_error",
            KmsError::Internal(_) => "internal_error",
        }
    }

    /// Whether the operation stopped because the caller canceled it.
    ///
    /// Interactive callers report this distinctly from a failure and must not
    /// blindly retry: the operation may or may not have been applied.
    pub fn is_canceled(&self) -> bool {
        matches!(self, KmsError::Canceled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KmsError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, KmsError::AlreadyExists(_))
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        KmsError::InvalidArgument(message.into())
    }
}

impl From<serde_json::Error> for KmsError {
    fn from(e: serde_json::Error) -> Self {
        KmsError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for KmsError {
    fn from(e: tokio::task::JoinError) -> Self {
        KmsError::Internal(format!("store task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(KmsError::AlreadyExists("k".into()).error_code(), "already_exists");
        assert_eq!(KmsError::NotFound("k".into()).error_code(), "not_found");
        assert_eq!(KmsError::Unassigned("id".into()).error_code(), "unassigned");
        assert_eq!(KmsError::Canceled.error_code(), "canceled");
        assert_eq!(
            KmsError::PolicyInUse {
                policy: "p".into(),
                identities: 2
            }
            .error_code(),
            "policy_in_use"
        );
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(KmsError::Canceled.is_canceled());
        assert!(!KmsError::Unreachable("down".into()).is_canceled());
    }

    #[test]
    fn display_includes_context() {
        let err = KmsError::PermissionDenied {
            identity: "abc".into(),
            path: "/v1/key/create/k".into(),
        };
        assert_eq!(
            err.to_string(),
            "permission denied: abc may not access /v1/key/create/k"
        );
    }

    #[test]
    fn json_errors_map_to_serialization() {
        let err: KmsError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, KmsError::Serialization(_)));
    }
}
