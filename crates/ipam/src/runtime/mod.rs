//! Allocation runtime
//!
//! Turns an [`IpAllocation`] into an [`Operation`] bound to the table of its
//! network instance. `validate` runs under the table's read lock; `apply`
//! and `delete` run their whole protocol under a single write guard so the
//! ownership lookup, the exact-match re-check and the insert cannot
//! interleave with another writer.

mod aggregate;
mod loopback;
mod network;
mod pool;
mod select;
mod strategy;


pub use network::ERR_NO_PARENT_NETWORK;

use crate::allocation::{IpAllocation, IpAllocationStatus, parse_prefix};
use crate::error::IpamError;
use crate::registry::Registry;
use crate::rib::{Rib, Route};
use std::sync::Arc;
use strategy::{Request, Strategy, owner_of};
use tracing::debug;

/// Resolves allocation requests against the registry
#[derive(Debug, Clone)]
pub struct Runtime {
    registry: Arc<Registry>,
}

impl Runtime {
    /// Creates a runtime over `registry`
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Binds a request to its table.
    ///
    /// Fails with `NotFound` for unknown instances, `NotReady` while the
    /// instance is restoring and `MalformedInput` for unparsable prefixes.
    pub fn resolve(&self, allocation: &IpAllocation) -> Result<Operation, IpamError> {
        let rib = self.registry.get_ready_rib(&allocation.network_instance)?;
        let prefix = allocation.prefix.as_deref().map(parse_prefix).transpose()?;
        Ok(Operation {
            rib,
            strategy: strategy::strategy(allocation.prefix_kind),
            request: Request::new(allocation.clone(), prefix),
        })
    }
}

/// Outcome of [`Operation::apply`]
#[derive(Debug, Clone)]
pub struct Applied {
    /// Request with `status` filled in
    pub allocation: IpAllocation,
    /// Route now held by the allocation
    pub route: Route,
    /// Routes removed to make room (previous route of the identity and its children)
    pub withdrawn: Vec<Route>,
    /// False when the allocation was already in place
    pub inserted: bool,
}

/// A request bound to a table
#[derive(Debug)]
pub struct Operation {
    rib: Rib,
    strategy: Strategy,
    request: Request,
}

impl Operation {
    /// Table the operation works on
    #[must_use]
    pub fn rib(&self) -> &Rib {
        &self.rib
    }

    /// Checks the request without mutating anything.
    ///
    /// `Ok(Some(diag))` is a business-rule rejection; errors are reserved
    /// for requests that cannot be interpreted.
    pub fn validate(&self) -> Result<Option<String>, IpamError> {
        let table = self.rib.read();
        if let Some(target) = self.request.target() {
            if let Some(existing) = table.lookup(&target) {
                if !self.request.key.matches(existing) {
                    return Ok(Some(format!(
                        "prefix {} is already allocated to {}",
                        target,
                        owner_of(existing)
                    )));
                }
            }
        }
        (self.strategy.validate)(&self.request, &table)
    }

    /// Inserts the route for the request, replacing the identity's previous one
    pub fn apply(&self) -> Result<Applied, IpamError> {
        let mut table = self.rib.write();
        let key = &self.request.key;
        let owned = table.owned_by(key);

        if let Some(existing) = owned.first() {
            let unchanged = match self.request.target() {
                Some(target) => existing.prefix() == target,
                None => true,
            };
            if unchanged {
                debug!("Allocation {} already holds {}", key, existing.prefix());
                return Ok(Applied {
                    allocation: self.with_status(existing),
                    route: existing.clone(),
                    withdrawn: Vec::new(),
                    inserted: false,
                });
            }
        }

        let placement = (self.strategy.place)(&self.request, &table)?;
        if let Some(holder) = table.lookup(&placement.prefix) {
            if !key.matches(holder) {
                return Err(IpamError::AlreadyExists {
                    network_instance: table.network_instance().to_string(),
                    prefix: placement.prefix.to_string(),
                });
            }
        }

        let mut withdrawn = Vec::new();
        for old in &owned {
            if old.is_create_prefix() {
                withdrawn.extend(table.delete_with_children(&old.prefix()));
            } else {
                withdrawn.extend(table.delete(&old.prefix()));
            }
        }

        let route = Route::new(placement.prefix, self.request.route_labels(&placement));
        table.insert(route.clone())?;
        debug!(
            "Allocated {} to {} in network instance {}",
            route.allocated_prefix(),
            key,
            table.network_instance()
        );

        Ok(Applied {
            allocation: self.with_status(&route),
            route,
            withdrawn,
            inserted: true,
        })
    }

    /// Removes the identity's routes; boundaries take their children with them
    pub fn delete(&self) -> Result<Vec<Route>, IpamError> {
        let mut table = self.rib.write();
        let owned = table.owned_by(&self.request.key);
        let mut removed = Vec::new();
        for route in owned {
            if route.is_create_prefix() {
                removed.extend(table.delete_with_children(&route.prefix()));
            } else {
                removed.extend(table.delete(&route.prefix()));
            }
        }
        debug!(
            "Released {} route(s) of {} in network instance {}",
            removed.len(),
            self.request.key,
            table.network_instance()
        );
        Ok(removed)
    }

    fn with_status(&self, route: &Route) -> IpAllocation {
        let mut allocation = self.request.allocation.clone();
        allocation.status = IpAllocationStatus {
            allocated_prefix: Some(route.allocated_prefix().to_string()),
            gateway: route.gateway().map(|gateway| gateway.to_string()),
        };
        allocation
    }
}
