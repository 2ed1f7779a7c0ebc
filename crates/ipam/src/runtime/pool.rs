//! Pool prefixes: flat reservation blocks and the allocations carved from them

use super::select;
use super::strategy::{owner_of, place_boundary, place_host, require_parent, validate_boundary, Placement, Request};
use crate::allocation::PrefixKind;
use crate::error::IpamError;
use crate::rib::Table;

pub(crate) const ERR_NO_PARENT_POOL: &str = "pool allocation requires an existing parent pool prefix";

pub(crate) fn validate(request: &Request, table: &Table) -> Result<Option<String>, IpamError> {
    if request.create_prefix() {
        return validate_boundary(request, table);
    }

    let Some(prefix) = request.prefix else {
        return Ok(require_parent(request, table, PrefixKind::Pool));
    };
    let prefix = prefix.trunc();
    let Some(parent) = table.parent_where(&prefix, |route| route.is_boundary_of(PrefixKind::Pool)) else {
        return Ok(Some(ERR_NO_PARENT_POOL.to_string()));
    };

    // Exact matches are handled by the ownership check.
    if let Some(holder) = table.longest_match(&prefix) {
        if holder.prefix() != prefix && holder.prefix() != parent.prefix() {
            return Ok(Some(format!(
                "prefix {} overlaps {} allocated to {}",
                prefix,
                holder.prefix(),
                owner_of(holder)
            )));
        }
    }
    if let Some(child) = table.children(&prefix).first() {
        return Ok(Some(format!(
            "prefix {} overlaps {} allocated to {}",
            prefix,
            child.prefix(),
            owner_of(child)
        )));
    }
    Ok(None)
}

pub(crate) fn place(request: &Request, table: &Table) -> Result<Placement, IpamError> {
    if request.create_prefix() {
        return place_boundary(request, table, false);
    }

    match (request.prefix, request.allocation.prefix_length) {
        (Some(prefix), _) => Ok(Placement {
            prefix: prefix.trunc(),
            length: prefix.prefix_len(),
            gateway: None,
        }),
        (None, Some(length)) => {
            let prefix = select::carve(table, PrefixKind::Pool, request.selector(), length).ok_or_else(|| {
                IpamError::ValidationFailed(format!("no free /{} left in any pool prefix for {}", length, request.key))
            })?;
            Ok(Placement {
                prefix,
                length,
                gateway: None,
            })
        }
        (None, None) => {
            let (host, _) = place_host(request, table, PrefixKind::Pool)?;
            Ok(Placement {
                prefix: host,
                length: host.max_prefix_len(),
                gateway: None,
            })
        }
    }
}
