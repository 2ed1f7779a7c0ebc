//! Network prefixes: subnet boundaries and the addresses inside them

use super::strategy::{place_boundary, place_host, require_parent, validate_boundary, Placement, Request};
use crate::allocation::PrefixKind;
use crate::error::IpamError;
use crate::rib::{Route, Table};
use ipnet::IpNet;

pub const ERR_NO_PARENT_NETWORK: &str = "network prefix requires an existing parent network prefix";

fn parent_network<'a>(table: &'a Table, address: &IpNet) -> Option<&'a Route> {
    table.longest_match_where(address, |route| route.is_boundary_of(PrefixKind::Network))
}

pub(crate) fn validate(request: &Request, table: &Table) -> Result<Option<String>, IpamError> {
    if request.create_prefix() {
        return validate_boundary(request, table);
    }

    let Some(prefix) = request.prefix else {
        return Ok(require_parent(request, table, PrefixKind::Network));
    };
    let Some(parent) = parent_network(table, &IpNet::from(prefix.addr())) else {
        return Ok(Some(ERR_NO_PARENT_NETWORK.to_string()));
    };
    let length = prefix.prefix_len();
    if length != prefix.max_prefix_len() && length != parent.prefix().prefix_len() {
        return Ok(Some(format!(
            "prefix length /{} of {} does not match parent network prefix {}",
            length,
            prefix,
            parent.prefix()
        )));
    }
    Ok(None)
}

pub(crate) fn place(request: &Request, table: &Table) -> Result<Placement, IpamError> {
    if request.create_prefix() {
        return place_boundary(request, table, true);
    }

    let (host, parent) = match request.prefix {
        Some(prefix) => {
            let host = IpNet::from(prefix.addr());
            let parent = parent_network(table, &host)
                .cloned()
                .ok_or_else(|| IpamError::ValidationFailed(ERR_NO_PARENT_NETWORK.to_string()))?;
            (host, parent)
        }
        None => place_host(request, table, PrefixKind::Network)?,
    };
    Ok(Placement {
        prefix: host,
        length: parent.prefix().prefix_len(),
        gateway: parent.gateway(),
    })
}
