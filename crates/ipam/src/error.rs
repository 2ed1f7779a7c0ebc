//! IPAM engine errors

use thiserror::Error;

/// Errors that can occur while allocating or releasing prefixes
#[derive(Debug, Error)]
pub enum IpamError {
    /// Network instance (or other required object) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network instance exists but has not finished restoring from the backend
    #[error("Network instance not ready: {0}")]
    NotReady(String),

    /// Exact prefix is already present in the table
    #[error("Prefix {prefix} already exists in network instance {network_instance}")]
    AlreadyExists {
        /// Network instance holding the conflicting route
        network_instance: String,
        /// Canonical prefix that could not be inserted
        prefix: String,
    },

    /// Well-formed request rejected by an allocation rule
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Request cannot be interpreted (bad prefix, unknown kind, missing fields)
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Persistence backend error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl IpamError {
    /// Whether the caller's control loop should retry the request later.
    ///
    /// `NotFound` and `MalformedInput` are permanent until the caller changes
    /// something; everything else is expected to clear up on its own
    /// (a parent prefix appearing, a restore finishing, a racing writer
    /// releasing a prefix).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            IpamError::NotFound(_) | IpamError::MalformedInput(_) => false,
            IpamError::NotReady(_)
            | IpamError::AlreadyExists { .. }
            | IpamError::ValidationFailed(_)
            | IpamError::Backend(_) => true,
        }
    }
}

/// Errors returned by persistence backends
#[derive(Debug, Error)]
pub enum BackendError {
    /// Underlying store failed (API call, I/O)
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot decoded but its content is unusable
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
