//! Loopback prefixes

use super::strategy::{place_boundary, place_host, require_parent, validate_boundary, Placement, Request};
use crate::allocation::PrefixKind;
use crate::error::IpamError;
use crate::rib::Table;
use ipnet::IpNet;

pub(crate) const ERR_NOT_HOST: &str = "loopback prefix must be a host address";

pub(crate) fn validate(request: &Request, table: &Table) -> Result<Option<String>, IpamError> {
    if request.create_prefix() {
        return validate_boundary(request, table);
    }
    match request.prefix {
        Some(prefix) if prefix.prefix_len() != prefix.max_prefix_len() => Ok(Some(ERR_NOT_HOST.to_string())),
        Some(_) => Ok(None),
        None => Ok(require_parent(request, table, PrefixKind::Loopback)),
    }
}

pub(crate) fn place(request: &Request, table: &Table) -> Result<Placement, IpamError> {
    if request.create_prefix() {
        return place_boundary(request, table, false);
    }
    let host = match request.prefix {
        Some(prefix) if prefix.prefix_len() != prefix.max_prefix_len() => {
            return Err(IpamError::ValidationFailed(ERR_NOT_HOST.to_string()));
        }
        Some(prefix) => IpNet::from(prefix.addr()),
        None => place_host(request, table, PrefixKind::Loopback)?.0,
    };
    Ok(Placement {
        prefix: host,
        length: host.max_prefix_len(),
        gateway: None,
    })
}
