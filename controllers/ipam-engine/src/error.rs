//! Controller-specific error types.
//!
//! This module defines error types specific to the IPAM engine host that
//! are not covered by the engine's own errors.

use ipam::IpamError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the IPAM engine host.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// IPAM engine error
    #[error("IPAM error: {0}")]
    Ipam(#[from] IpamError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Manifest could not be read or parsed
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// Allocations left unallocated after seeding
    #[error("IP allocation failed: {0}")]
    AllocationFailed(String),
}
