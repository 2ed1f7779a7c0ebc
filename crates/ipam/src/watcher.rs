//! Route change notifications
//!
//! Callers register a callback for an owner label (`key`) and value. After
//! every table change the engine hands the affected routes to
//! [`Watcher::handle_update`], which groups them by matching registration
//! and invokes each callback once with its batch.

use crate::rib::Route;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State reported alongside a batch of routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Routes were inserted or restored and are live
    Valid,
    /// Routes were withdrawn; consumers should re-evaluate them
    Unknown,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Valid => f.write_str("valid"),
            StatusCode::Unknown => f.write_str("unknown"),
        }
    }
}

/// Owner registration: a label key and the value routes must carry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRef {
    /// Label key, normally [`crate::labels::OWNER_GVK`]
    pub key: String,
    /// Label value
    pub value: String,
}

impl OwnerRef {
    /// Creates an owner reference
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Notification callback
pub type CallbackFn = Arc<dyn Fn(&[Route], StatusCode) + Send + Sync>;

/// Registry of notification callbacks
#[derive(Default)]
pub struct Watcher {
    watches: RwLock<HashMap<String, HashMap<String, CallbackFn>>>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher").field("watches", &self.len()).finish()
    }
}

impl Watcher {
    /// Creates a watcher with no registrations
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the callback for an owner
    pub fn add_watch<F>(&self, owner_key: &str, owner_value: &str, callback: F)
    where
        F: Fn(&[Route], StatusCode) + Send + Sync + 'static,
    {
        debug!("Adding watch {}={}", owner_key, owner_value);
        self.watches
            .write()
            .entry(owner_key.to_string())
            .or_default()
            .insert(owner_value.to_string(), Arc::new(callback));
    }

    /// Removes a registration; unknown owners are ignored
    pub fn delete_watch(&self, owner_key: &str, owner_value: &str) {
        let mut watches = self.watches.write();
        if let Some(values) = watches.get_mut(owner_key) {
            values.remove(owner_value);
            if values.is_empty() {
                watches.remove(owner_key);
            }
        }
    }

    /// Number of registrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.watches.read().values().map(HashMap::len).sum()
    }

    /// True when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `routes` to every registration they match.
    ///
    /// A route matches an owner when it carries the owner's key with the
    /// owner's value. Each matched callback is invoked exactly once with the
    /// subset of routes that matched it, in input order. Routes matching
    /// nothing are dropped.
    pub fn handle_update(&self, routes: &[Route], status: StatusCode) {
        if routes.is_empty() {
            return;
        }
        let watches = self.watches.read();
        let mut batches: HashMap<OwnerRef, (CallbackFn, Vec<Route>)> = HashMap::new();
        for route in routes {
            for (key, values) in watches.iter() {
                let Some(value) = route.label(key) else {
                    continue;
                };
                if let Some(callback) = values.get(value) {
                    batches
                        .entry(OwnerRef::new(key.as_str(), value))
                        .or_insert_with(|| (callback.clone(), Vec::new()))
                        .1
                        .push(route.clone());
                }
            }
        }
        for (owner, (callback, batch)) in batches {
            debug!("Notifying {}={} of {} route(s), status {}", owner.key, owner.value, batch.len(), status);
            callback(&batch, status);
        }
    }
}
