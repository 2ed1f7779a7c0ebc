//! Network instance registry
//!
//! Maps a network instance name to its route table and readiness. An
//! instance is created uninitialized, moves to restoring while the backend
//! snapshot is loaded and is initialized once that finishes. Only
//! initialized instances accept allocations.

use crate::error::IpamError;
use crate::rib::Rib;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Readiness of a network instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created, restore not started
    Uninitialized,
    /// Restore in progress
    Restoring,
    /// Ready for allocations
    Initialized,
}

#[derive(Debug)]
struct Instance {
    rib: Rib,
    state: InstanceState,
}

/// Thread-safe map of network instances
#[derive(Debug, Default)]
pub struct Registry {
    instances: RwLock<HashMap<String, Instance>>,
}

impl Registry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance with an empty table.
    ///
    /// Returns false when the instance already exists; its table and state
    /// are left untouched.
    pub fn create(&self, name: &str) -> bool {
        let mut instances = self.instances.write();
        if instances.contains_key(name) {
            return false;
        }
        debug!("Registering network instance {}", name);
        instances.insert(
            name.to_string(),
            Instance {
                rib: Rib::new(name),
                state: InstanceState::Uninitialized,
            },
        );
        true
    }

    /// Removes an instance and returns its table
    pub fn delete(&self, name: &str) -> Option<Rib> {
        self.instances.write().remove(name).map(|instance| instance.rib)
    }

    /// Current state, `None` for unknown instances
    #[must_use]
    pub fn state(&self, name: &str) -> Option<InstanceState> {
        self.instances.read().get(name).map(|instance| instance.state)
    }

    /// True once restore has finished
    #[must_use]
    pub fn is_initialized(&self, name: &str) -> bool {
        self.state(name) == Some(InstanceState::Initialized)
    }

    /// Claims the right to restore an instance.
    ///
    /// Returns true for exactly one caller per instance lifetime; later
    /// callers get false because a restore is running or already done.
    pub fn begin_restore(&self, name: &str) -> Result<bool, IpamError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(name)
            .ok_or_else(|| IpamError::NotFound(format!("network instance {}", name)))?;
        if instance.state != InstanceState::Uninitialized {
            return Ok(false);
        }
        instance.state = InstanceState::Restoring;
        Ok(true)
    }

    /// Marks an instance ready for allocations
    pub fn set_initialized(&self, name: &str) -> Result<(), IpamError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(name)
            .ok_or_else(|| IpamError::NotFound(format!("network instance {}", name)))?;
        instance.state = InstanceState::Initialized;
        Ok(())
    }

    /// Table of an instance regardless of readiness.
    ///
    /// With `must_exist` false an unknown instance is created on the fly.
    pub fn get_rib(&self, name: &str, must_exist: bool) -> Result<Rib, IpamError> {
        if let Some(instance) = self.instances.read().get(name) {
            return Ok(instance.rib.clone());
        }
        if must_exist {
            return Err(IpamError::NotFound(format!("network instance {}", name)));
        }
        self.create(name);
        self.instances
            .read()
            .get(name)
            .map(|instance| instance.rib.clone())
            .ok_or_else(|| IpamError::NotFound(format!("network instance {}", name)))
    }

    /// Table of an initialized instance
    pub fn get_ready_rib(&self, name: &str) -> Result<Rib, IpamError> {
        let instances = self.instances.read();
        let instance = instances
            .get(name)
            .ok_or_else(|| IpamError::NotFound(format!("network instance {}", name)))?;
        if instance.state != InstanceState::Initialized {
            return Err(IpamError::NotReady(name.to_string()));
        }
        Ok(instance.rib.clone())
    }

    /// Registered instance names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_idempotent() {
        let registry = Registry::new();
        assert!(registry.create("ni1"));
        assert!(!registry.create("ni1"));
        assert_eq!(registry.state("ni1"), Some(InstanceState::Uninitialized));
    }

    #[test]
    fn test_restore_claimed_once() {
        let registry = Registry::new();
        registry.create("ni1");
        assert!(registry.begin_restore("ni1").unwrap());
        assert!(!registry.begin_restore("ni1").unwrap());
        registry.set_initialized("ni1").unwrap();
        assert!(!registry.begin_restore("ni1").unwrap());
        assert!(registry.is_initialized("ni1"));
    }

    #[test]
    fn test_ready_rib_requires_initialized() {
        let registry = Registry::new();
        assert!(matches!(registry.get_ready_rib("ni1"), Err(IpamError::NotFound(_))));

        registry.create("ni1");
        assert!(matches!(registry.get_ready_rib("ni1"), Err(IpamError::NotReady(_))));

        registry.set_initialized("ni1").unwrap();
        assert!(registry.get_ready_rib("ni1").is_ok());
    }

    #[test]
    fn test_get_rib_lazy_create() {
        let registry = Registry::new();
        assert!(matches!(registry.get_rib("ni1", true), Err(IpamError::NotFound(_))));
        let rib = registry.get_rib("ni1", false).unwrap();
        assert_eq!(rib.name(), "ni1");
        assert!(!registry.is_initialized("ni1"));
    }

    #[test]
    fn test_delete_and_names() {
        let registry = Registry::new();
        registry.create("b");
        registry.create("a");
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);

        assert!(registry.delete("a").is_some());
        assert!(registry.delete("a").is_none());
        assert!(matches!(registry.set_initialized("a"), Err(IpamError::NotFound(_))));
        assert_eq!(registry.names(), vec!["b".to_string()]);
    }
}
