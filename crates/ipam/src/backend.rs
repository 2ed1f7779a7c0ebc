//! Persistence backends
//!
//! A backend snapshots a network instance's table after each change and
//! hands it back when the instance is created again.

use crate::error::BackendError;
use crate::rib::Route;
use async_trait::async_trait;

/// Pluggable route table persistence
#[async_trait]
pub trait Backend: Send + Sync {
    /// Loads the last stored routes; unknown instances yield an empty list
    async fn restore(&self, network_instance: &str) -> Result<Vec<Route>, BackendError>;

    /// Replaces the stored snapshot of an instance
    async fn store(&self, network_instance: &str, routes: &[Route]) -> Result<(), BackendError>;

    /// Drops the stored snapshot; unknown instances are not an error
    async fn delete(&self, network_instance: &str) -> Result<(), BackendError>;
}

/// Backend that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NopBackend;

#[async_trait]
impl Backend for NopBackend {
    async fn restore(&self, _network_instance: &str) -> Result<Vec<Route>, BackendError> {
        Ok(Vec::new())
    }

    async fn store(&self, _network_instance: &str, _routes: &[Route]) -> Result<(), BackendError> {
        Ok(())
    }

    async fn delete(&self, _network_instance: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Serializes routes as a JSON array
pub fn encode_routes(routes: &[Route]) -> Result<String, BackendError> {
    Ok(serde_json::to_string(routes)?)
}

/// Parses a JSON array of routes; blank input is an empty snapshot
pub fn decode_routes(data: &str) -> Result<Vec<Route>, BackendError> {
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(data)?)
}
