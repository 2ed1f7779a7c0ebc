//! Route table (RIB)
//!
//! One table per network instance. Routes are keyed by their canonical
//! prefix (host bits cleared) in a longest-prefix-match trie, one trie per
//! address family. `Rib` is the shared, lock-protected handle; `Table` is the
//! data behind the lock and is what compound operations work on while they
//! hold a guard.

use crate::allocation::{AllocationKey, PrefixKind};
use crate::error::IpamError;
use crate::labels;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use prefix_trie::PrefixMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// An allocated prefix and its labels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    prefix: IpNet,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl Route {
    /// Creates a route; the prefix is stored without host bits.
    #[must_use]
    pub fn new(prefix: IpNet, labels: BTreeMap<String, String>) -> Self {
        Self {
            prefix: prefix.trunc(),
            labels,
        }
    }

    /// Canonical prefix
    #[must_use]
    pub fn prefix(&self) -> IpNet {
        self.prefix
    }

    /// All labels
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Value of a single label
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Prefix kind recorded by the engine
    #[must_use]
    pub fn prefix_kind(&self) -> Option<PrefixKind> {
        self.label(labels::PREFIX_KIND).and_then(|kind| kind.parse().ok())
    }

    /// True for containing boundaries
    #[must_use]
    pub fn is_create_prefix(&self) -> bool {
        self.label(labels::CREATE_PREFIX) == Some("true")
    }

    /// True for boundaries of the given kind
    #[must_use]
    pub fn is_boundary_of(&self, kind: PrefixKind) -> bool {
        self.is_create_prefix() && self.prefix_kind() == Some(kind)
    }

    /// Gateway address recorded on a network boundary
    #[must_use]
    pub fn gateway(&self) -> Option<IpAddr> {
        self.label(labels::GATEWAY).and_then(|gw| gw.parse().ok())
    }

    /// Prefix as reported to the allocating caller.
    ///
    /// Boundaries created with host bits report the gateway address, address
    /// claims report the address with the length of their parent network.
    #[must_use]
    pub fn allocated_prefix(&self) -> IpNet {
        let address = match (self.is_create_prefix(), self.gateway()) {
            (true, Some(gateway)) => gateway,
            _ => self.prefix.addr(),
        };
        let length = self
            .label(labels::PREFIX_LENGTH)
            .and_then(|len| len.parse::<u8>().ok())
            .unwrap_or_else(|| self.prefix.prefix_len());
        IpNet::new(address, length).unwrap_or(self.prefix)
    }

    /// True when every selector label is present with the same value
    #[must_use]
    pub fn matches_selector(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }

    fn into_canonical(mut self) -> Self {
        self.prefix = self.prefix.trunc();
        self
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.prefix, self.labels)
    }
}

/// Routes of one network instance
pub struct Table {
    network_instance: String,
    v4: PrefixMap<Ipv4Net, Route>,
    v6: PrefixMap<Ipv6Net, Route>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("network_instance", &self.network_instance)
            .field("routes", &self.len())
            .finish()
    }
}

impl Table {
    /// Creates an empty table
    #[must_use]
    pub fn new(network_instance: impl Into<String>) -> Self {
        Self {
            network_instance: network_instance.into(),
            v4: PrefixMap::new(),
            v6: PrefixMap::new(),
        }
    }

    /// Network instance this table belongs to
    #[must_use]
    pub fn network_instance(&self) -> &str {
        &self.network_instance
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    /// True when the table holds no routes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All routes, IPv4 first, each family in ascending trie order
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.v4
            .iter()
            .map(|(_, route)| route)
            .chain(self.v6.iter().map(|(_, route)| route))
    }

    /// Exact match
    #[must_use]
    pub fn lookup(&self, prefix: &IpNet) -> Option<&Route> {
        match prefix.trunc() {
            IpNet::V4(p) => self.v4.get(&p),
            IpNet::V6(p) => self.v6.get(&p),
        }
    }

    /// Most specific route containing `prefix`, `prefix` itself included
    #[must_use]
    pub fn longest_match(&self, prefix: &IpNet) -> Option<&Route> {
        match prefix.trunc() {
            IpNet::V4(p) => self.v4.get_lpm(&p).map(|(_, route)| route),
            IpNet::V6(p) => self.v6.get_lpm(&p).map(|(_, route)| route),
        }
    }

    /// Most specific route containing `prefix` that satisfies `pred`
    pub fn longest_match_where<F>(&self, prefix: &IpNet, pred: F) -> Option<&Route>
    where
        F: Fn(&Route) -> bool,
    {
        let mut current = Some(prefix.trunc());
        while let Some(candidate) = current {
            let route = self.longest_match(&candidate)?;
            if pred(route) {
                return Some(route);
            }
            current = route.prefix().supernet();
        }
        None
    }

    /// Like [`Table::longest_match_where`] but never returns `prefix` itself
    pub fn parent_where<F>(&self, prefix: &IpNet, pred: F) -> Option<&Route>
    where
        F: Fn(&Route) -> bool,
    {
        prefix
            .trunc()
            .supernet()
            .and_then(|parent| self.longest_match_where(&parent, pred))
    }

    /// Routes strictly inside `prefix`
    #[must_use]
    pub fn children(&self, prefix: &IpNet) -> Vec<&Route> {
        match prefix.trunc() {
            IpNet::V4(p) => self
                .v4
                .children(&p)
                .filter(|(key, _)| **key != p)
                .map(|(_, route)| route)
                .collect(),
            IpNet::V6(p) => self
                .v6
                .children(&p)
                .filter(|(key, _)| **key != p)
                .map(|(_, route)| route)
                .collect(),
        }
    }

    /// Routes inserted for the given allocation identity
    #[must_use]
    pub fn owned_by(&self, key: &AllocationKey) -> Vec<Route> {
        self.routes().filter(|route| key.matches(route)).cloned().collect()
    }

    /// Inserts a route; an existing route with the same prefix is never replaced
    pub fn insert(&mut self, route: Route) -> Result<(), IpamError> {
        let route = route.into_canonical();
        if self.lookup(&route.prefix()).is_some() {
            return Err(IpamError::AlreadyExists {
                network_instance: self.network_instance.clone(),
                prefix: route.prefix().to_string(),
            });
        }
        match route.prefix() {
            IpNet::V4(p) => {
                self.v4.insert(p, route);
            }
            IpNet::V6(p) => {
                self.v6.insert(p, route);
            }
        }
        Ok(())
    }

    /// Removes a route, `None` when it was not present
    pub fn delete(&mut self, prefix: &IpNet) -> Option<Route> {
        match prefix.trunc() {
            IpNet::V4(p) => self.v4.remove(&p),
            IpNet::V6(p) => self.v6.remove(&p),
        }
    }

    /// Removes a route and every route inside it; the route itself comes first
    pub fn delete_with_children(&mut self, prefix: &IpNet) -> Vec<Route> {
        let children: Vec<IpNet> = self.children(prefix).iter().map(|route| route.prefix()).collect();
        let mut removed = Vec::with_capacity(children.len() + 1);
        removed.extend(self.delete(prefix));
        for child in children {
            removed.extend(self.delete(&child));
        }
        removed
    }
}

/// Shared handle to one network instance's table.
///
/// Readers (`get_table`, `lookup`, `longest_match`) run concurrently;
/// writers are exclusive. Tables of different instances share nothing.
#[derive(Debug, Clone)]
pub struct Rib {
    table: Arc<RwLock<Table>>,
}

impl Rib {
    /// Creates an empty table
    #[must_use]
    pub fn new(network_instance: impl Into<String>) -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::new(network_instance))),
        }
    }

    /// Network instance name
    #[must_use]
    pub fn name(&self) -> String {
        self.table.read().network_instance().to_string()
    }

    /// Read guard for compound lookups
    pub fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read()
    }

    /// Write guard for compound mutations
    pub fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write()
    }

    /// Snapshot of all routes
    #[must_use]
    pub fn get_table(&self) -> Vec<Route> {
        self.table.read().routes().cloned().collect()
    }

    /// Exact match
    #[must_use]
    pub fn lookup(&self, prefix: &IpNet) -> Option<Route> {
        self.table.read().lookup(prefix).cloned()
    }

    /// Most specific route containing `prefix`
    #[must_use]
    pub fn longest_match(&self, prefix: &IpNet) -> Option<Route> {
        self.table.read().longest_match(prefix).cloned()
    }

    /// Inserts a route
    pub fn insert(&self, route: Route) -> Result<(), IpamError> {
        self.table.write().insert(route)
    }

    /// Removes a route
    pub fn delete(&self, prefix: &IpNet) -> Option<Route> {
        self.table.write().delete(prefix)
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// True when the table holds no routes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
