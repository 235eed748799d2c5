// vim: tw=80
//! devmap: a block-device mapper core.
//!
//! A [`registry::Registry`] owns up to 64 mapped devices.  Each device binds
//! a [`table::MappingTable`] partitioning its sector space into intervals,
//! each handled by a [`target::Target`].  Requests enter through
//! [`registry::Registry::submit_request`], get remapped, and flow into the
//! embedder's [`block::BlockLayer`]; completions chain back through a hook
//! so the device can quiesce for table swaps.

pub mod block;
pub mod device;
pub mod hook;
mod hotplug;
pub mod registry;
pub mod request;
pub mod table;
pub mod target;
pub mod types;
pub mod util;

pub use crate::types::*;
pub use crate::util::*;
