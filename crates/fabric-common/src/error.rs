//! Error types for the fabric operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the resource, pod or service kind they relate to so that
//! log records are actionable without reproducing the failure.

use thiserror::Error;

use crate::template::TemplateError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for fabric operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Command execution inside a pod container failed
    #[error("exec error in {pod}/{container}: {message}")]
    Exec {
        /// Name of the pod the command ran in
        pod: String,
        /// Container the command ran in
        container: String,
        /// Description of what failed (stderr or transport error)
        message: String,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.serviceConfiguration.dataSubnet")
        field: Option<String>,
    },

    /// Template rendering error
    #[error("template error: {source}")]
    Template {
        /// The underlying renderer error
        #[from]
        source: TemplateError,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A service kind asked for admission but is not part of the active
    /// staged-upgrade sequence
    #[error("kind {kind} is not allowed for staged upgrade")]
    UpgradeSequence {
        /// The rejected service kind
        kind: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "gate")
        context: String,
    },
}

impl Error {
    /// Create an exec error for a pod container
    pub fn exec(
        pod: impl Into<String>,
        container: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Exec {
            pod: pod.into(),
            container: container.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an upgrade-sequence configuration error
    pub fn upgrade_sequence(kind: impl Into<String>) -> Self {
        Self::UpgradeSequence { kind: kind.into() }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, template, serialization and upgrade-sequence errors need an
    /// operator to fix configuration. Exec and internal errors are transient.
    /// Kubernetes errors depend on the status code; write conflicts retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Exec { .. } => true,
            Error::Validation { .. } => false,
            Error::Template { .. } => false,
            Error::Serialization { .. } => false,
            Error::UpgradeSequence { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the resource name if this error is associated with a specific resource
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            Error::Exec { pod, .. } => Some(pod),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Returns true when the error is a Kubernetes 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: a pod exec failure names the pod and container so the operator
    /// can tell which node's agent is stuck.
    #[test]
    fn story_exec_errors_name_pod_and_container() {
        let err = Error::exec("vrouter-abcde", "vrouteragent", "connection reset");
        assert!(err.to_string().contains("vrouter-abcde/vrouteragent"));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(err.resource(), Some("vrouter-abcde"));
        assert!(err.is_retryable());
    }

    /// Story: a kind missing from the upgrade sequence is a configuration
    /// problem; retrying blindly would never succeed.
    #[test]
    fn story_upgrade_sequence_error_is_permanent() {
        let err = Error::upgrade_sequence("Kubemanager");
        assert!(err.to_string().contains("Kubemanager"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_errors_carry_field_path() {
        let err = Error::validation_for_field(
            "vrouter1",
            "spec.serviceConfiguration.dataSubnet",
            "invalid CIDR",
        );
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(
                    field.as_deref(),
                    Some("spec.serviceConfiguration.dataSubnet")
                );
            }
            _ => panic!("Expected Validation variant"),
        }
        assert_eq!(err.resource(), Some("vrouter1"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_kube_retryability_by_status_code() {
        assert!(Error::from(api_error(500)).is_retryable());
        assert!(Error::from(api_error(409)).is_retryable());
        assert!(!Error::from(api_error(422)).is_retryable());
        assert!(!Error::from(api_error(404)).is_retryable());
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(500)));
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));

        let err = Error::internal_with_context("gate", "manager missing");
        assert_eq!(err.context(), Some("gate"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_serialization_errors_are_not_retryable() {
        let err = Error::serialization_for_kind("Manager", "missing field 'spec'");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Manager")),
            _ => panic!("Expected Serialization variant"),
        }
        assert!(!err.is_retryable());
    }
}
