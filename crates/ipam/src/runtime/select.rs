//! First-fit selection for dynamic allocations

use crate::allocation::PrefixKind;
use crate::rib::{Route, Table};
use ipnet::IpNet;
use std::collections::BTreeMap;

/// Boundaries of `kind` carrying every selector label, in ascending order
pub(crate) fn parents<'a>(
    table: &'a Table,
    kind: PrefixKind,
    selector: &'a BTreeMap<String, String>,
) -> impl Iterator<Item = &'a Route> + 'a {
    table
        .routes()
        .filter(move |route| route.is_boundary_of(kind) && route.matches_selector(selector))
}

/// First free `/length` block in the first matching boundary with room
pub(crate) fn carve(
    table: &Table,
    kind: PrefixKind,
    selector: &BTreeMap<String, String>,
    length: u8,
) -> Option<IpNet> {
    parents(table, kind, selector).find_map(|parent| first_free_subnet(table, parent, length))
}

/// First free host in the first matching boundary with room, plus that boundary
pub(crate) fn claim_host<'a>(
    table: &'a Table,
    kind: PrefixKind,
    selector: &'a BTreeMap<String, String>,
) -> Option<(IpNet, &'a Route)> {
    parents(table, kind, selector).find_map(|parent| first_free_host(table, parent).map(|host| (host, parent)))
}

/// A block is free when nothing but `parent` contains it and nothing sits inside it.
pub(crate) fn first_free_subnet(table: &Table, parent: &Route, length: u8) -> Option<IpNet> {
    let parent_net = parent.prefix();
    if length <= parent_net.prefix_len() || length > parent_net.max_prefix_len() {
        return None;
    }
    let mut subnets = parent_net.subnets(length).ok()?;
    subnets.find(|candidate| {
        table.longest_match(candidate).map(Route::prefix) == Some(parent_net) && table.children(candidate).is_empty()
    })
}

/// Lowest host of `parent` not yet claimed.
///
/// IPv4 network and broadcast addresses are excluded by `hosts()`; the IPv6
/// subnet-router address and the parent's gateway are skipped explicitly.
/// A host-sized boundary has no room left.
pub(crate) fn first_free_host(table: &Table, parent: &Route) -> Option<IpNet> {
    let parent_net = parent.prefix();
    if parent_net.prefix_len() == parent_net.max_prefix_len() {
        return None;
    }
    let gateway = parent.gateway();
    parent_net
        .hosts()
        .filter(|addr| Some(*addr) != gateway)
        .filter(|addr| matches!(parent_net, IpNet::V4(_)) || *addr != parent_net.network())
        .map(IpNet::from)
        .find(|host| table.longest_match(host).map(Route::prefix) == Some(parent_net))
}
