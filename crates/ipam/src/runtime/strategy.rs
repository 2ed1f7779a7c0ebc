//! Per-kind allocation rules
//!
//! Each prefix kind contributes a pair of pure functions: `validate` checks
//! the request against a read-locked table and returns a diagnostic for
//! business-rule rejections, `place` decides which route to insert. The
//! runtime picks the pair with [`strategy`] and runs the shared parts of the
//! apply protocol around it.

use super::{aggregate, loopback, network, pool, select};
use crate::allocation::{AllocationKey, IpAllocation, PrefixKind};
use crate::error::IpamError;
use crate::labels;
use crate::rib::{Route, Table};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Parsed allocation request
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub allocation: IpAllocation,
    pub prefix: Option<IpNet>,
    pub key: AllocationKey,
}

impl Request {
    pub fn new(allocation: IpAllocation, prefix: Option<IpNet>) -> Self {
        let key = allocation.key();
        Self {
            allocation,
            prefix,
            key,
        }
    }

    pub fn kind(&self) -> PrefixKind {
        self.allocation.prefix_kind
    }

    pub fn create_prefix(&self) -> bool {
        self.allocation.create_prefix
    }

    pub fn selector(&self) -> &BTreeMap<String, String> {
        &self.allocation.selector
    }

    /// Single-address claims store the bare host route.
    pub fn is_address(&self) -> bool {
        !self.create_prefix() && matches!(self.kind(), PrefixKind::Network | PrefixKind::Loopback)
    }

    /// Route prefix an explicit request would occupy
    pub fn target(&self) -> Option<IpNet> {
        let prefix = self.prefix?;
        if self.is_address() {
            Some(IpNet::from(prefix.addr()))
        } else {
            Some(prefix.trunc())
        }
    }

    pub fn require_prefix_length(&self) -> Result<u8, IpamError> {
        self.allocation.prefix_length.ok_or_else(|| {
            IpamError::MalformedInput(format!(
                "dynamic {} allocation {} requires prefixLength",
                self.kind(),
                self.key
            ))
        })
    }

    /// Caller labels with engine labels layered on top
    pub fn route_labels(&self, placement: &Placement) -> BTreeMap<String, String> {
        let mut route_labels: BTreeMap<String, String> = self
            .allocation
            .labels
            .iter()
            .filter(|(key, _)| !labels::is_system_label(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        route_labels.extend(self.key.labels());
        route_labels.insert(
            labels::ADDRESS_FAMILY.to_string(),
            crate::allocation::address_family(&placement.prefix).to_string(),
        );
        route_labels.insert(labels::PREFIX_LENGTH.to_string(), placement.length.to_string());
        if let Some(gateway) = placement.gateway {
            route_labels.insert(labels::GATEWAY.to_string(), gateway.to_string());
        }
        route_labels
    }
}

/// Where a request lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placement {
    /// Canonical route prefix
    pub prefix: IpNet,
    /// Length of the prefix reported to the caller
    pub length: u8,
    pub gateway: Option<IpAddr>,
}

pub(crate) type ValidateFn = fn(&Request, &Table) -> Result<Option<String>, IpamError>;
pub(crate) type PlaceFn = fn(&Request, &Table) -> Result<Placement, IpamError>;

/// Rules for one prefix kind
#[derive(Clone, Copy)]
pub(crate) struct Strategy {
    pub validate: ValidateFn,
    pub place: PlaceFn,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Strategy")
    }
}

pub(crate) fn strategy(kind: PrefixKind) -> Strategy {
    match kind {
        PrefixKind::Network => Strategy {
            validate: network::validate,
            place: network::place,
        },
        PrefixKind::Loopback => Strategy {
            validate: loopback::validate,
            place: loopback::place,
        },
        PrefixKind::Pool => Strategy {
            validate: pool::validate,
            place: pool::place,
        },
        PrefixKind::Aggregate => Strategy {
            validate: aggregate::validate,
            place: aggregate::place,
        },
    }
}

/// `ns/name` of the identity that inserted a route
pub(crate) fn owner_of(route: &Route) -> String {
    format!(
        "{}/{}",
        route.label(labels::NSN_NAMESPACE).unwrap_or_default(),
        route.label(labels::NSN_NAME).unwrap_or_default()
    )
}

fn kind_of(route: &Route) -> String {
    route
        .prefix_kind()
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Boundaries may only sit inside aggregates and only aggregates may cover them.
///
/// Routes of the requesting identity are ignored: they are withdrawn when the
/// boundary moves.
fn nested_diagnostic(request: &Request, table: &Table, prefix: &IpNet) -> Option<String> {
    let foreign_boundary = |route: &Route| route.is_create_prefix() && !request.key.matches(route);

    if let Some(parent) = table
        .parent_where(prefix, foreign_boundary)
        .filter(|parent| parent.prefix_kind() != Some(PrefixKind::Aggregate))
    {
        return Some(format!(
            "{} prefix {} cannot be nested inside a {} prefix ({})",
            request.kind(),
            prefix,
            kind_of(parent),
            parent.prefix()
        ));
    }

    if request.kind() == PrefixKind::Aggregate {
        return None;
    }
    table
        .children(prefix)
        .into_iter()
        .find(|child| foreign_boundary(child) && child.prefix_kind() != Some(PrefixKind::Aggregate))
        .map(|child| {
            format!(
                "{} prefix {} cannot contain the {} prefix {}",
                request.kind(),
                prefix,
                kind_of(child),
                child.prefix()
            )
        })
}

/// Shared validation for network, loopback and pool boundaries
pub(crate) fn validate_boundary(request: &Request, table: &Table) -> Result<Option<String>, IpamError> {
    match request.prefix {
        Some(prefix) => Ok(nested_diagnostic(request, table, &prefix.trunc())),
        None => {
            request.require_prefix_length()?;
            if select::parents(table, PrefixKind::Aggregate, request.selector())
                .next()
                .is_none()
            {
                return Ok(Some(format!(
                    "no aggregate prefix available for dynamic {} prefix {}",
                    request.kind(),
                    request.key
                )));
            }
            Ok(None)
        }
    }
}

/// Shared placement for boundaries; only network boundaries keep a gateway
pub(crate) fn place_boundary(request: &Request, table: &Table, with_gateway: bool) -> Result<Placement, IpamError> {
    match request.prefix {
        Some(prefix) => {
            let canonical = prefix.trunc();
            let gateway = (with_gateway && prefix != canonical).then(|| prefix.addr());
            Ok(Placement {
                prefix: canonical,
                length: prefix.prefix_len(),
                gateway,
            })
        }
        None => {
            let length = request.require_prefix_length()?;
            let prefix = select::carve(table, PrefixKind::Aggregate, request.selector(), length).ok_or_else(|| {
                IpamError::ValidationFailed(format!(
                    "no free /{} left in any aggregate prefix for {}",
                    length, request.key
                ))
            })?;
            Ok(Placement {
                prefix,
                length,
                gateway: None,
            })
        }
    }
}

/// Dynamic single-host claim inside a boundary of `kind`
pub(crate) fn place_host(request: &Request, table: &Table, kind: PrefixKind) -> Result<(IpNet, Route), IpamError> {
    select::claim_host(table, kind, request.selector())
        .map(|(host, parent)| (host, parent.clone()))
        .ok_or_else(|| {
            IpamError::ValidationFailed(format!(
                "no free address left in any {} prefix for {}",
                kind, request.key
            ))
        })
}

/// Diagnostic used when no parent of `kind` matches the selector
pub(crate) fn require_parent(request: &Request, table: &Table, kind: PrefixKind) -> Option<String> {
    if select::parents(table, kind, request.selector()).next().is_some() {
        return None;
    }
    Some(format!(
        "no {} prefix matches the selector of {}",
        kind, request.key
    ))
}
