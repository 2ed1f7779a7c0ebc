//! Start-up configuration read from environment variables.

use crate::error::ControllerError;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where route tables are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Nothing is persisted
    Nop,
    /// One ConfigMap per network instance
    ConfigMap,
}

impl FromStr for BackendKind {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nop" | "none" => Ok(BackendKind::Nop),
            "configmap" => Ok(BackendKind::ConfigMap),
            other => Err(ControllerError::InvalidConfig(format!(
                "IPAM_BACKEND must be 'nop' or 'configmap', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Nop => f.write_str("nop"),
            BackendKind::ConfigMap => f.write_str("configmap"),
        }
    }
}

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Manifest with network instances and allocations (`IPAM_MANIFEST`)
    pub manifest: PathBuf,
    /// Persistence backend (`IPAM_BACKEND`)
    pub backend: BackendKind,
    /// Namespace holding ConfigMap snapshots (`WATCH_NAMESPACE`)
    pub namespace: String,
    /// Seeding passes before giving up (`IPAM_MAX_ROUNDS`)
    pub max_rounds: usize,
}

impl Config {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let manifest = lookup("IPAM_MANIFEST")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                ControllerError::InvalidConfig("IPAM_MANIFEST environment variable is required".to_string())
            })?;

        let backend = match lookup("IPAM_BACKEND") {
            Some(value) => value.parse()?,
            None => BackendKind::Nop,
        };

        let namespace = lookup("WATCH_NAMESPACE").unwrap_or_else(|| "default".to_string());

        let max_rounds = match lookup("IPAM_MAX_ROUNDS") {
            Some(value) => value.trim().parse::<usize>().ok().filter(|rounds| *rounds > 0).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("IPAM_MAX_ROUNDS must be a positive integer, got '{}'", value))
            })?,
            None => 8,
        };

        Ok(Self {
            manifest,
            backend,
            namespace,
            max_rounds,
        })
    }
}
