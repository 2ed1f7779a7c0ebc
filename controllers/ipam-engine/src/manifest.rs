//! Seeding manifest
//!
//! ```yaml
//! networkInstances: [default]
//! allocations:
//!   - name: lan
//!     networkInstance: default
//!     prefixKind: network
//!     prefix: 10.0.0.1/24
//!     createPrefix: true
//! ```

use crate::error::ControllerError;
use ipam::IpAllocation;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Network instances and allocations to seed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Network instances to create
    #[serde(default)]
    pub network_instances: Vec<String>,

    /// Allocations to apply, in any order
    #[serde(default)]
    pub allocations: Vec<IpAllocation>,
}

impl Manifest {
    /// Parses a YAML manifest
    pub fn from_yaml_str(data: &str) -> Result<Self, ControllerError> {
        serde_yaml::from_str(data).map_err(|e| ControllerError::Manifest(e.to_string()))
    }

    /// Reads and parses a YAML manifest file
    pub fn from_path(path: &Path) -> Result<Self, ControllerError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::Manifest(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&data)
    }
}
