//! ConfigMap snapshot backend.
//!
//! Each network instance is persisted as one ConfigMap named
//! `ipam-<instance>` whose `routes` key holds the JSON route snapshot.
//! Writes use server-side apply so repeated stores converge on the same
//! object.

use async_trait::async_trait;
use chrono::Utc;
use ipam::backend::{decode_routes, encode_routes};
use ipam::{Backend, BackendError, Route};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "ipam-engine";

/// Data key holding the route snapshot
const ROUTES_KEY: &str = "routes";

/// Annotation recording the time of the last store
const LAST_UPDATED_ANNOTATION: &str = "ipam.dcops.microscaler.io/last-updated";

/// Label marking ConfigMaps owned by the engine
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Persists route tables in ConfigMaps of one namespace
#[derive(Clone)]
pub struct ConfigMapBackend {
    api: Api<ConfigMap>,
}

impl std::fmt::Debug for ConfigMapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigMapBackend").finish_non_exhaustive()
    }
}

impl ConfigMapBackend {
    /// Creates a backend writing into `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

/// ConfigMap name for a network instance
///
/// Characters not allowed in object names are replaced with `-`.
pub fn configmap_name(network_instance: &str) -> String {
    let sanitized: String = network_instance
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    format!("ipam-{}", sanitized.trim_matches(|c| c == '-' || c == '.'))
}

/// Builds the ConfigMap holding a snapshot
pub fn snapshot_configmap(network_instance: &str, routes: &[Route]) -> Result<ConfigMap, BackendError> {
    let mut data = BTreeMap::new();
    data.insert(ROUTES_KEY.to_string(), encode_routes(routes)?);

    let mut annotations = BTreeMap::new();
    annotations.insert(LAST_UPDATED_ANNOTATION.to_string(), Utc::now().to_rfc3339());

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string());

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(configmap_name(network_instance)),
            annotations: Some(annotations),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Extracts the snapshot from a ConfigMap; a missing key is an empty table
pub fn routes_from_configmap(cm: &ConfigMap) -> Result<Vec<Route>, BackendError> {
    match cm.data.as_ref().and_then(|data| data.get(ROUTES_KEY)) {
        Some(routes) => decode_routes(routes),
        None => Ok(Vec::new()),
    }
}

fn storage_error(e: kube::Error) -> BackendError {
    BackendError::Storage(Box::new(e))
}

#[async_trait]
impl Backend for ConfigMapBackend {
    async fn restore(&self, network_instance: &str) -> Result<Vec<Route>, BackendError> {
        let name = configmap_name(network_instance);
        match self.api.get_opt(&name).await.map_err(storage_error)? {
            Some(cm) => {
                let routes = routes_from_configmap(&cm)?;
                info!("Loaded {} route(s) for network instance {} from ConfigMap {}", routes.len(), network_instance, name);
                Ok(routes)
            }
            None => {
                debug!("No ConfigMap {} for network instance {}, starting empty", name, network_instance);
                Ok(Vec::new())
            }
        }
    }

    async fn store(&self, network_instance: &str, routes: &[Route]) -> Result<(), BackendError> {
        let name = configmap_name(network_instance);
        let cm = snapshot_configmap(network_instance, routes)?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api
            .patch(&name, &params, &Patch::Apply(&cm))
            .await
            .map_err(storage_error)?;
        debug!("Stored {} route(s) for network instance {} in ConfigMap {}", routes.len(), network_instance, name);
        Ok(())
    }

    async fn delete(&self, network_instance: &str) -> Result<(), BackendError> {
        let name = configmap_name(network_instance);
        if self.api.get_opt(&name).await.map_err(storage_error)?.is_none() {
            return Ok(());
        }
        self.api
            .delete(&name, &DeleteParams::default())
            .await
            .map_err(storage_error)?;
        info!("Deleted ConfigMap {} of network instance {}", name, network_instance);
        Ok(())
    }
}
