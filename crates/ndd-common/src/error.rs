//! Error types for the ndd operator
//!
//! Errors carry the network node they relate to (when known) so that a
//! failed reconcile pass can be attributed without re-parsing messages.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for ndd operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A node's credentials or device driver could not be validated
    #[error("validation error for {node}: {message}")]
    Validation {
        /// Name of the network node being validated
        node: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.target.address")
        field: Option<String>,
    },

    /// One step of an establish/teardown sequence failed
    #[error("{operation} {resource} failed for {node}: {message}")]
    Establish {
        /// Name of the network node whose resources were being changed
        node: String,
        /// Owned resource kind that failed (ConfigMap, Service, Deployment)
        resource: String,
        /// Operation that failed (create, replace, delete)
        operation: String,
        /// Underlying cause
        message: String,
    },

    /// An operation did not complete within its time budget
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was running when the budget ran out
        operation: String,
        /// The budget that elapsed
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error: {message}")]
    Internal {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a validation error for a specific node and field path
    pub fn validation_for_field(
        node: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            node: node.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a validation error for a field before the node is known
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            node: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Attribute a validation error raised without node context to `node`
    pub fn with_node(self, node: impl Into<String>) -> Self {
        match self {
            Self::Validation {
                node: current,
                message,
                field,
            } if current == UNKNOWN_CONTEXT => Self::Validation {
                node: node.into(),
                message,
                field,
            },
            other => other,
        }
    }

    /// Create an establish error tagged with the resource kind and operation
    pub fn establish(
        node: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Establish {
            node: node.into(),
            resource: resource.into(),
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation errors need a spec, secret or catalog change; the
    /// reconciler still requeues them because the fix may come from a
    /// secret it does not watch.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Conflicts are stale writes and always worth another pass
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::Validation { .. } => false,
            Error::Establish { .. } => true,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the node name if this error is associated with a specific node
    pub fn node(&self) -> Option<&str> {
        match self {
            Error::Validation { node, .. } | Error::Establish { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Get the owned resource kind for establish errors
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Establish { resource, .. } => Some(resource),
            _ => None,
        }
    }
}
