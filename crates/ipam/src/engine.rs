//! Engine facade
//!
//! `Ipam` wires the registry, runtime, watcher and persistence backend
//! together and is the only type hosts need. The in-memory core is
//! synchronous; the facade is async because backend calls are.

use crate::allocation::IpAllocation;
use crate::backend::{Backend, NopBackend};
use crate::error::IpamError;
use crate::registry::Registry;
use crate::rib::{Rib, Route};
use crate::runtime::Runtime;
use crate::watcher::{StatusCode, Watcher};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// IPAM engine
#[derive(Clone)]
pub struct Ipam {
    registry: Arc<Registry>,
    runtime: Runtime,
    watcher: Arc<Watcher>,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Ipam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ipam")
            .field("registry", &self.registry)
            .field("watcher", &self.watcher)
            .finish()
    }
}

impl Default for Ipam {
    fn default() -> Self {
        Self::new()
    }
}

impl Ipam {
    /// Engine without persistence
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(Arc::new(NopBackend))
    }

    /// Engine persisting through `backend`
    #[must_use]
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            runtime: Runtime::new(registry.clone()),
            registry,
            watcher: Arc::new(Watcher::new()),
            backend,
        }
    }

    /// Registers a network instance and restores its snapshot.
    ///
    /// Idempotent: the restore runs once per instance lifetime. Restore
    /// failures are logged and leave the instance empty but usable.
    pub async fn create(&self, network_instance: &str) {
        if self.registry.create(network_instance) {
            info!("Created network instance {}", network_instance);
        }

        match self.registry.begin_restore(network_instance) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Network instance {} already restored", network_instance);
                return;
            }
            Err(e) => {
                warn!("Network instance {} vanished before restore: {}", network_instance, e);
                return;
            }
        }

        let routes = match self.backend.restore(network_instance).await {
            Ok(routes) => routes,
            Err(e) => {
                error!("Failed to restore network instance {}: {}", network_instance, e);
                Vec::new()
            }
        };

        let restored = match self.registry.get_rib(network_instance, true) {
            Ok(rib) => insert_restored(&rib, routes),
            Err(e) => {
                warn!("Network instance {} deleted during restore: {}", network_instance, e);
                return;
            }
        };

        if let Err(e) = self.registry.set_initialized(network_instance) {
            warn!("Network instance {} deleted during restore: {}", network_instance, e);
            return;
        }
        info!("Restored {} route(s) into network instance {}", restored.len(), network_instance);
        self.watcher.handle_update(&restored, StatusCode::Valid);
    }

    /// Removes a network instance and its stored snapshot
    pub async fn delete(&self, network_instance: &str) {
        if self.registry.delete(network_instance).is_some() {
            info!("Deleted network instance {}", network_instance);
        }
        if let Err(e) = self.backend.delete(network_instance).await {
            error!("Failed to delete snapshot of network instance {}: {}", network_instance, e);
        }
    }

    /// Validates and applies an allocation, returning it with `status` filled in.
    ///
    /// Business-rule rejections surface as [`IpamError::ValidationFailed`]
    /// carrying the diagnostic. A failed snapshot store does not fail the
    /// allocation.
    pub async fn allocate(&self, allocation: &IpAllocation) -> Result<IpAllocation, IpamError> {
        debug!(
            "Allocating {}/{} ({}) in network instance {}",
            allocation.namespace, allocation.name, allocation.prefix_kind, allocation.network_instance
        );
        let operation = self.runtime.resolve(allocation)?;
        if let Some(diag) = operation.validate()? {
            debug!("Allocation {}/{} rejected: {}", allocation.namespace, allocation.name, diag);
            return Err(IpamError::ValidationFailed(diag));
        }

        let applied = operation.apply()?;
        if applied.inserted {
            info!(
                "Allocated {} to {}/{} in network instance {}",
                applied.route.allocated_prefix(),
                allocation.namespace,
                allocation.name,
                allocation.network_instance
            );
            self.watcher.handle_update(&applied.withdrawn, StatusCode::Unknown);
            self.watcher
                .handle_update(std::slice::from_ref(&applied.route), StatusCode::Valid);
            self.store(&allocation.network_instance, operation.rib()).await;
        }
        Ok(applied.allocation)
    }

    /// Releases the routes of an allocation; releasing nothing is success
    pub async fn deallocate(&self, allocation: &IpAllocation) -> Result<(), IpamError> {
        let operation = self.runtime.resolve(allocation)?;
        let removed = operation.delete()?;
        if removed.is_empty() {
            debug!(
                "Nothing to release for {}/{} in network instance {}",
                allocation.namespace, allocation.name, allocation.network_instance
            );
            return Ok(());
        }
        info!(
            "Released {} route(s) of {}/{} in network instance {}",
            removed.len(),
            allocation.namespace,
            allocation.name,
            allocation.network_instance
        );
        self.watcher.handle_update(&removed, StatusCode::Unknown);
        self.store(&allocation.network_instance, operation.rib()).await;
        Ok(())
    }

    /// Snapshot of an instance's routes
    pub fn get_prefixes(&self, network_instance: &str) -> Result<Vec<Route>, IpamError> {
        Ok(self.registry.get_rib(network_instance, true)?.get_table())
    }

    /// Registers a change callback for routes labelled `owner_key=owner_value`
    pub fn add_watch<F>(&self, owner_key: &str, owner_value: &str, callback: F)
    where
        F: Fn(&[Route], StatusCode) + Send + Sync + 'static,
    {
        self.watcher.add_watch(owner_key, owner_value, callback);
    }

    /// Removes a change callback
    pub fn delete_watch(&self, owner_key: &str, owner_value: &str) {
        self.watcher.delete_watch(owner_key, owner_value);
    }

    /// Registered network instance names, sorted
    #[must_use]
    pub fn instances(&self) -> Vec<String> {
        self.registry.names()
    }

    async fn store(&self, network_instance: &str, rib: &Rib) {
        let routes = rib.get_table();
        if let Err(e) = self.backend.store(network_instance, &routes).await {
            error!("Failed to store network instance {}: {}", network_instance, e);
        }
    }
}

fn insert_restored(rib: &Rib, routes: Vec<Route>) -> Vec<Route> {
    let mut table = rib.write();
    let mut restored = Vec::with_capacity(routes.len());
    for route in routes {
        let route = Route::new(route.prefix(), route.labels().clone());
        match table.insert(route.clone()) {
            Ok(()) => restored.push(route),
            Err(e) => warn!("Skipping restored route {}: {}", route, e),
        }
    }
    restored
}
