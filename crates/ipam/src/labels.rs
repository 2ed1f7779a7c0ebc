//! Well-known route labels
//!
//! Every route the engine inserts carries the system labels below in addition
//! to whatever the caller supplied. They are how the engine recognises which
//! identity owns a route, which routes are containing boundaries, and where a
//! subnet's gateway lives. Owner labels are caller supplied and used by the
//! watcher to route change notifications.

/// Common prefix of all engine labels
pub const LABEL_PREFIX: &str = "ipam.dcops.microscaler.io/";

/// Prefix kind of the request that created the route
pub const PREFIX_KIND: &str = "ipam.dcops.microscaler.io/prefix-kind";

/// Set to `"true"` on routes that define a containing boundary
pub const CREATE_PREFIX: &str = "ipam.dcops.microscaler.io/create-prefix";

/// `ipv4` or `ipv6`
pub const ADDRESS_FAMILY: &str = "ipam.dcops.microscaler.io/address-family";

/// Length of the prefix reported back to the caller
pub const PREFIX_LENGTH: &str = "ipam.dcops.microscaler.io/prefix-length";

/// Namespace of the allocation that owns the route
pub const NSN_NAMESPACE: &str = "ipam.dcops.microscaler.io/nsn-namespace";

/// Name of the allocation that owns the route
pub const NSN_NAME: &str = "ipam.dcops.microscaler.io/nsn-name";

/// Gateway address of a network boundary
pub const GATEWAY: &str = "ipam.dcops.microscaler.io/gateway";

/// Group/version/kind of the owning object, e.g. `ipam.dcops.microscaler.io/v1alpha1/IPClaim`
pub const OWNER_GVK: &str = "ipam.dcops.microscaler.io/owner-gvk";

/// Namespace of the owning object
pub const OWNER_NAMESPACE: &str = "ipam.dcops.microscaler.io/owner-namespace";

/// Name of the owning object
pub const OWNER_NAME: &str = "ipam.dcops.microscaler.io/owner-name";

/// Returns true for labels the engine writes itself.
///
/// Owner labels share the prefix but are supplied by callers, so they are
/// not considered system labels.
#[must_use]
pub fn is_system_label(key: &str) -> bool {
    matches!(
        key,
        PREFIX_KIND | CREATE_PREFIX | ADDRESS_FAMILY | PREFIX_LENGTH | NSN_NAMESPACE | NSN_NAME | GATEWAY
    )
}
