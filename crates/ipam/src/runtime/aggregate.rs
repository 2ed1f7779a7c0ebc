//! Aggregate prefixes: top-level blocks that only exist as boundaries

use super::strategy::{place_boundary, validate_boundary, Placement, Request};
use crate::error::IpamError;
use crate::rib::Table;

pub(crate) const ERR_REQUIRES_CREATE: &str = "aggregate prefix requires createPrefix";

fn require_prefix(request: &Request) -> Result<(), IpamError> {
    if request.prefix.is_none() {
        return Err(IpamError::MalformedInput(format!(
            "aggregate prefix {} requires an explicit prefix",
            request.key
        )));
    }
    Ok(())
}

pub(crate) fn validate(request: &Request, table: &Table) -> Result<Option<String>, IpamError> {
    if !request.create_prefix() {
        return Ok(Some(ERR_REQUIRES_CREATE.to_string()));
    }
    require_prefix(request)?;
    validate_boundary(request, table)
}

pub(crate) fn place(request: &Request, table: &Table) -> Result<Placement, IpamError> {
    if !request.create_prefix() {
        return Err(IpamError::ValidationFailed(ERR_REQUIRES_CREATE.to_string()));
    }
    require_prefix(request)?;
    place_boundary(request, table, false)
}
