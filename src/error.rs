//! Shared error type for the control-plane reconcilers.

use thiserror::Error;

/// Errors surfaced by reconcile loops, the work queue, and the provider driver.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("object has no name")]
    UnnamedObject,

    #[error("object has no namespace")]
    UnnamespacedObject,

    #[error("provider RPC failed: {0}")]
    Provider(#[from] tonic::Status),

    #[error("task flow step '{step}' failed: {source}")]
    TaskFlow {
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("referenced ConfigMap {0} not found")]
    ConfigMapNotFound(String),

    #[error("referenced Secret {0} not found")]
    SecretNotFound(String),

    #[error("referenced StorageClass {0} not found")]
    StorageClassNotFound(String),

    #[error("storage class provisioner mismatch: expected {expected}, found {found}")]
    ProvisionerMismatch { expected: String, found: String },

    #[error("spec was mutated mid-reconcile, aborting this attempt")]
    ConcurrentModification,

    #[error("cross-controller lock '{0}' could not be acquired within the timeout")]
    LockTimeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the work queue should back off and retry, as opposed to
    /// leaving the object in its current phase for the user to fix
    /// (spec.md §7 "Validation failure").
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_)
                | Error::ProvisionerMismatch { .. }
                | Error::ConcurrentModification
        )
    }

    /// Whether this is a driver-reported login failure — wrong password,
    /// locked account, locked IP — which should flip the Content `online`
    /// flag rather than just retry (spec.md §4.6, §7 "Authentication failure").
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::Provider(status)
                if matches!(status.code(), tonic::Code::Unauthenticated | tonic::Code::PermissionDenied)
        )
    }
}
