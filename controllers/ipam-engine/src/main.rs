//! IPAM Engine
//!
//! Hosts the IPAM engine: creates the network instances listed in a
//! manifest (restoring their tables from ConfigMap snapshots when enabled)
//! and applies the manifest's allocations, parents and children in any
//! order.

mod config;
mod configmap_backend;
mod error;
mod manifest;
mod seeder;

use crate::config::{BackendKind, Config};
use crate::configmap_backend::ConfigMapBackend;
use crate::error::ControllerError;
use crate::manifest::Manifest;
use crate::seeder::Seeder;
use anyhow::{Context, Result};
use ipam::{Backend, Ipam, NopBackend};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting IPAM Engine");

    let config = Config::from_env().context("failed to load configuration")?;
    info!("Configuration:");
    info!("  Manifest: {}", config.manifest.display());
    info!("  Backend: {}", config.backend);
    info!("  Namespace: {}", config.namespace);
    info!("  Max rounds: {}", config.max_rounds);

    let manifest = Manifest::from_path(&config.manifest).context("failed to load manifest")?;
    info!(
        "Manifest lists {} network instance(s) and {} allocation(s)",
        manifest.network_instances.len(),
        manifest.allocations.len()
    );

    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Nop => Arc::new(NopBackend),
        BackendKind::ConfigMap => {
            let client = kube::Client::try_default()
                .await
                .map_err(ControllerError::Kube)
                .context("failed to create Kubernetes client")?;
            Arc::new(ConfigMapBackend::new(client, &config.namespace))
        }
    };

    let ipam = Ipam::with_backend(backend);
    let report = Seeder::new(ipam, config.max_rounds).run(&manifest).await;
    info!(
        "Seeding finished after {} pass(es): {} allocated, {} failed, {} pending",
        report.rounds,
        report.allocated.len(),
        report.failed.len(),
        report.pending.len()
    );

    if !report.is_complete() {
        for failure in report.failures() {
            error!("  {}", failure);
        }
        return Err(ControllerError::AllocationFailed(format!(
            "{} allocation(s) could not be applied",
            report.failed.len() + report.pending.len()
        ))
        .into());
    }

    Ok(())
}
