//! Allocation requests
//!
//! `IpAllocation` is the unit of work handed to the engine. It names the
//! target network instance, the kind of prefix, an optional explicit prefix
//! and the labels to attach to the resulting route. Apply fills in `status`.

use crate::error::IpamError;
use crate::labels;
use crate::rib::Route;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Kind of prefix requested
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrefixKind {
    /// Subnet boundary, or an address inside one
    #[default]
    Network,

    /// Single host address with no subnet containment
    Loopback,

    /// Flat reservation block, or a block carved out of one
    Pool,

    /// Top-level address block
    Aggregate,
}

impl PrefixKind {
    /// Label value used in [`labels::PREFIX_KIND`]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefixKind::Network => "network",
            PrefixKind::Loopback => "loopback",
            PrefixKind::Pool => "pool",
            PrefixKind::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for PrefixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrefixKind {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(PrefixKind::Network),
            "loopback" => Ok(PrefixKind::Loopback),
            "pool" => Ok(PrefixKind::Pool),
            "aggregate" => Ok(PrefixKind::Aggregate),
            other => Err(IpamError::MalformedInput(format!("unknown prefix kind: {}", other))),
        }
    }
}

/// Result fields populated by Apply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpAllocationStatus {
    /// Prefix handed out by the engine, e.g. `10.0.0.2/24`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_prefix: Option<String>,

    /// Gateway of the containing network, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// Allocation request / claim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpAllocation {
    /// Name of the allocation (identity, together with namespace)
    pub name: String,

    /// Namespace of the allocation
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Target network instance
    pub network_instance: String,

    /// Kind of prefix
    #[serde(default)]
    pub prefix_kind: PrefixKind,

    /// Explicit CIDR or bare address; absent means dynamic allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Length of the block to carve for dynamic prefix allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<u8>,

    /// Register a new containing prefix instead of claiming inside one
    #[serde(default)]
    pub create_prefix: bool,

    /// Metadata attached to the resulting route
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Labels a parent must carry to be used for dynamic allocation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Populated by Apply
    #[serde(default)]
    pub status: IpAllocationStatus,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl IpAllocation {
    /// Creates a dynamic request with no labels.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        network_instance: impl Into<String>,
        prefix_kind: PrefixKind,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            network_instance: network_instance.into(),
            prefix_kind,
            ..Default::default()
        }
    }

    /// Sets the explicit prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the block length used for dynamic prefix allocation
    #[must_use]
    pub fn with_prefix_length(mut self, length: u8) -> Self {
        self.prefix_length = Some(length);
        self
    }

    /// Marks the request as a containing boundary
    #[must_use]
    pub fn with_create_prefix(mut self, create_prefix: bool) -> Self {
        self.create_prefix = create_prefix;
        self
    }

    /// Adds one route label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds one selector label
    #[must_use]
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector.insert(key.into(), value.into());
        self
    }

    /// Records the owning object in the route labels so the watcher can find it
    #[must_use]
    pub fn with_owner(mut self, gvk: &str, namespace: &str, name: &str) -> Self {
        self.labels.insert(labels::OWNER_GVK.to_string(), gvk.to_string());
        self.labels.insert(labels::OWNER_NAMESPACE.to_string(), namespace.to_string());
        self.labels.insert(labels::OWNER_NAME.to_string(), name.to_string());
        self
    }

    /// Identity used to find the routes this request owns
    #[must_use]
    pub fn key(&self) -> AllocationKey {
        AllocationKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            kind: self.prefix_kind,
            create_prefix: self.create_prefix,
        }
    }
}

/// Identity of an allocation as recorded in route labels
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationKey {
    /// Allocation namespace
    pub namespace: String,
    /// Allocation name
    pub name: String,
    /// Prefix kind
    pub kind: PrefixKind,
    /// Whether the allocation is a boundary
    pub create_prefix: bool,
}

impl AllocationKey {
    /// Returns true when the route was inserted for this identity
    #[must_use]
    pub fn matches(&self, route: &Route) -> bool {
        route.label(labels::NSN_NAMESPACE) == Some(self.namespace.as_str())
            && route.label(labels::NSN_NAME) == Some(self.name.as_str())
            && route.prefix_kind() == Some(self.kind)
            && route.is_create_prefix() == self.create_prefix
    }

    /// System labels identifying this allocation
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(labels::NSN_NAMESPACE.to_string(), self.namespace.clone());
        labels.insert(labels::NSN_NAME.to_string(), self.name.clone());
        labels.insert(labels::PREFIX_KIND.to_string(), self.kind.to_string());
        if self.create_prefix {
            labels.insert(labels::CREATE_PREFIX.to_string(), "true".to_string());
        }
        labels
    }
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parses a CIDR (`10.0.0.1/24`) or a bare address (`10.0.0.1`, taken as a host prefix).
///
/// Host bits are preserved; callers decide whether they are meaningful.
pub fn parse_prefix(input: &str) -> Result<IpNet, IpamError> {
    let input = input.trim();
    if let Ok(net) = input.parse::<IpNet>() {
        return Ok(net);
    }
    input
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|e| IpamError::MalformedInput(format!("invalid prefix '{}': {}", input, e)))
}

/// `ipv4` or `ipv6`
#[must_use]
pub fn address_family(net: &IpNet) -> &'static str {
    match net {
        IpNet::V4(_) => "ipv4",
        IpNet::V6(_) => "ipv6",
    }
}
