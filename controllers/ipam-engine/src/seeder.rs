//! Manifest seeding loop.
//!
//! Creates every network instance, then applies allocations in passes.
//! Allocations are allowed to appear before the prefixes that contain
//! them: retryable failures are carried into the next pass, permanent ones
//! are reported straight away.

use crate::error::ControllerError;
use crate::manifest::Manifest;
use ipam::{IpAllocation, Ipam, IpamError, labels};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Outcome of a seeding run
#[derive(Debug, Default)]
pub struct SeedReport {
    /// Allocations with their status filled in
    pub allocated: Vec<IpAllocation>,
    /// Allocations rejected permanently
    pub failed: Vec<(IpAllocation, IpamError)>,
    /// Allocations still failing with a retryable error when seeding stopped
    pub pending: Vec<(IpAllocation, IpamError)>,
    /// Passes performed
    pub rounds: usize,
}

impl SeedReport {
    /// True when every allocation was applied
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }

    /// One line per allocation that did not make it
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.failed
            .iter()
            .chain(self.pending.iter())
            .map(|(allocation, e)| format!("{}/{}: {}", allocation.namespace, allocation.name, e))
            .collect()
    }
}

/// Applies a manifest to an engine
#[derive(Debug)]
pub struct Seeder {
    ipam: Ipam,
    max_rounds: usize,
}

impl Seeder {
    /// Creates a seeder performing at most `max_rounds` passes
    pub fn new(ipam: Ipam, max_rounds: usize) -> Self {
        Self {
            ipam,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Seeds the engine and returns what happened
    pub async fn run(&self, manifest: &Manifest) -> SeedReport {
        for network_instance in &manifest.network_instances {
            self.ipam.create(network_instance).await;
        }
        self.register_watches(manifest);

        let mut report = SeedReport::default();
        let mut pending: Vec<IpAllocation> = manifest.allocations.clone();
        let mut retryable: Vec<(IpAllocation, IpamError)> = Vec::new();

        while !pending.is_empty() && report.rounds < self.max_rounds {
            report.rounds += 1;
            debug!("Seeding pass {} with {} pending allocation(s)", report.rounds, pending.len());

            let before = pending.len();
            retryable.clear();
            for allocation in pending.drain(..) {
                match self.ipam.allocate(&allocation).await {
                    Ok(allocated) => report.allocated.push(allocated),
                    Err(e) if e.is_retryable() => {
                        debug!("Deferring {}/{}: {}", allocation.namespace, allocation.name, e);
                        retryable.push((allocation, e));
                    }
                    Err(e) => {
                        warn!("Allocation {}/{} failed: {}", allocation.namespace, allocation.name, e);
                        report.failed.push((allocation, e));
                    }
                }
            }

            pending = retryable.iter().map(|(allocation, _)| allocation.clone()).collect();
            if pending.len() == before {
                debug!("Seeding pass {} made no progress", report.rounds);
                break;
            }
        }
        report.pending = retryable;

        if let Err(e) = self.log_tables() {
            warn!("Cannot list route tables: {}", e);
        }
        report
    }

    fn register_watches(&self, manifest: &Manifest) {
        let owners: BTreeSet<&str> = manifest
            .allocations
            .iter()
            .filter_map(|allocation| allocation.labels.get(labels::OWNER_GVK))
            .map(String::as_str)
            .collect();
        for owner in owners {
            let gvk = owner.to_string();
            self.ipam.add_watch(labels::OWNER_GVK, owner, move |routes, status| {
                for route in routes {
                    info!(
                        "{} {}/{}: {} is {}",
                        gvk,
                        route.label(labels::OWNER_NAMESPACE).unwrap_or_default(),
                        route.label(labels::OWNER_NAME).unwrap_or_default(),
                        route.allocated_prefix(),
                        status
                    );
                }
            });
        }
    }

    fn log_tables(&self) -> Result<(), ControllerError> {
        for network_instance in self.ipam.instances() {
            let routes = self.ipam.get_prefixes(&network_instance)?;
            info!("Network instance {} holds {} route(s)", network_instance, routes.len());
            for route in routes {
                info!("  {}", route);
            }
        }
        Ok(())
    }
}
