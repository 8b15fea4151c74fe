//! Vrouter-specific error types

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Common(#[from] fabric_common::Error),

    #[error("missing namespace on Vrouter")]
    MissingNamespace,
}

impl ReconcileError {
    /// Whether a later reconcile can succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(ae)) => ae.code == 409 || !(400..500).contains(&ae.code),
            Self::Kube(_) => true,
            Self::Common(e) => e.is_retryable(),
            Self::MissingNamespace => false,
        }
    }
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

    #[test]
    fn test_retryability() {
        assert!(ReconcileError::from(api_error(503)).is_retryable());
        assert!(ReconcileError::from(api_error(409)).is_retryable());
        assert!(!ReconcileError::from(api_error(422)).is_retryable());
        assert!(!ReconcileError::MissingNamespace.is_retryable());
        assert!(!ReconcileError::from(fabric_common::Error::upgrade_sequence("X")).is_retryable());
        assert!(ReconcileError::from(fabric_common::Error::exec("p", "c", "eof")).is_retryable());
    }
}
