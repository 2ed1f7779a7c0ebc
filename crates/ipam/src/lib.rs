//! IPAM engine
//!
//! Per network-instance route tables with longest-prefix-match lookup,
//! hierarchical prefix allocation (aggregate, network, pool and loopback
//! prefixes), change notification to registered owners and pluggable
//! snapshot persistence.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ipam::IpamError> {
//! use ipam::{IpAllocation, Ipam, PrefixKind};
//!
//! let ipam = Ipam::new();
//! ipam.create("default").await;
//!
//! let net = IpAllocation::new("default", "lan", "default", PrefixKind::Network)
//!     .with_prefix("10.0.0.1/24")
//!     .with_create_prefix(true);
//! ipam.allocate(&net).await?;
//!
//! let host = IpAllocation::new("default", "server-1", "default", PrefixKind::Network);
//! let allocated = ipam.allocate(&host).await?;
//! assert_eq!(allocated.status.allocated_prefix.as_deref(), Some("10.0.0.2/24"));
//! # Ok(())
//! # }
//! ```

pub mod allocation;
pub mod backend;
pub mod engine;
pub mod error;
pub mod labels;
pub mod registry;
pub mod rib;
pub mod runtime;
pub mod watcher;

pub use allocation::{IpAllocation, IpAllocationStatus, PrefixKind};
pub use backend::{Backend, NopBackend};
pub use engine::Ipam;
pub use error::{BackendError, IpamError};
pub use registry::Registry;
pub use rib::{Rib, Route, Table};
pub use watcher::{OwnerRef, StatusCode, Watcher};
