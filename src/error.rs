//! Error types for the Stratus Kubernetes Operator

use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Invalid configuration (not retried until the resource is edited)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    ReconcileFailed(String),

    /// Certificate generation or parsing failed
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Finalizer error
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error (programming error, never retried)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::KubeError(_)
                | OperatorError::Timeout(_)
                | OperatorError::ReconcileFailed(_)
                | OperatorError::CertificateError(_)
        )
    }

    /// Get a suggested requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<std::time::Duration> {
        if self.is_retryable() {
            Some(std::time::Duration::from_secs(30))
        } else {
            None
        }
    }

    /// Stable reason string for status conditions
    pub fn condition_reason(&self) -> &'static str {
        match self {
            OperatorError::KubeError(_) => "KubernetesApiError",
            OperatorError::NotFound { .. } => "ResourceNotFound",
            OperatorError::InvalidConfig(_) => "InvalidConfig",
            OperatorError::ReconcileFailed(_) => "ReconcileFailed",
            OperatorError::CertificateError(_) => "CertificateError",
            OperatorError::SerializationError(_) | OperatorError::YamlError(_) => {
                "SerializationError"
            }
            OperatorError::ValidationError(_) => "ValidationError",
            OperatorError::FinalizerError(_) => "FinalizerError",
            OperatorError::Timeout(_) => "Timeout",
            OperatorError::Internal(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::NotFound {
            kind: "Deployment".to_string(),
            name: "stratus-cluster".to_string(),
            namespace: "default".to_string(),
        };
        assert!(err.to_string().contains("Deployment"));
        assert!(err.to_string().contains("stratus-cluster"));
    }

    #[test]
    fn test_retryable_errors() {
        let timeout_err = OperatorError::Timeout("test".to_string());
        assert!(timeout_err.is_retryable());

        let validation_err = OperatorError::ValidationError("test".to_string());
        assert!(!validation_err.is_retryable());
    }

    #[test]
    fn test_config_errors_not_retried() {
        let config_err = OperatorError::InvalidConfig("shrink not supported".to_string());
        assert!(!config_err.is_retryable());
        assert!(config_err.requeue_delay().is_none());

        let internal_err = OperatorError::Internal("name mismatch".to_string());
        assert!(!internal_err.is_retryable());
    }

    #[test]
    fn test_requeue_delay() {
        let retryable = OperatorError::Timeout("test".to_string());
        assert!(retryable.requeue_delay().is_some());

        let not_retryable = OperatorError::InvalidConfig("test".to_string());
        assert!(not_retryable.requeue_delay().is_none());
    }

    #[test]
    fn test_condition_reasons_are_stable() {
        assert_eq!(
            OperatorError::InvalidConfig("x".into()).condition_reason(),
            "InvalidConfig"
        );
        assert_eq!(
            OperatorError::Timeout("x".into()).condition_reason(),
            "Timeout"
        );
    }
}
