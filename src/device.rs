// vim: tw=80
//! The mapped device: one slot's worth of state in the registry.
//!
//! Every mutable field here is protected by the registry's lock; the device
//! itself carries none.  The mapping table is shared out by `Arc` so
//! completions can keep the old table alive after a rebind.

use std::fmt;
use std::sync::Arc;

use crate::block::DevfsHandle;
use crate::request::Request;
use crate::table::MappingTable;
use crate::types::{Device, Rw, SectorT};

/// Lifecycle of a mapped device.
///
/// `Suspending` is the window between clearing the active state and the old
/// table draining; it exists so concurrent administrative calls can be
/// refused instead of racing the drain.  A removed device has no state; its
/// registry slot is simply vacant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DevState {
    /// Allocated, no table bound yet.
    Created,
    /// Table bound; requests route.
    Active,
    /// Draining in-flight I/O; requests defer.
    Suspending,
    /// Drained, table unbound; requests defer.
    Suspended,
}

impl fmt::Display for DevState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Created => "Created".fmt(f),
            Self::Active => "Active".fmt(f),
            Self::Suspending => "Suspending".fmt(f),
            Self::Suspended => "Suspended".fmt(f),
        }
    }
}

/// A request parked while its device is not active.
pub(crate) struct DeferredIo {
    pub(crate) req: Request,
    pub(crate) rw: Rw,
}

pub(crate) struct MappedDevice {
    pub(crate) dev: Device,
    pub(crate) name: String,
    pub(crate) state: DevState,
    pub(crate) use_count: u32,
    pub(crate) map: Option<Arc<MappingTable>>,
    /// Requests held for replay, newest first at the tail.
    pub(crate) deferred: Vec<DeferredIo>,
    /// Size in sectors as of the last bind.  Survives suspend so size and
    /// geometry queries keep answering.
    pub(crate) sectors: SectorT,
    pub(crate) hardsect_size: u32,
    pub(crate) devfs_entry: Option<DevfsHandle>,
}

impl MappedDevice {
    pub(crate) fn new(dev: Device, name: String) -> Self {
        MappedDevice {
            dev,
            name,
            state: DevState::Created,
            use_count: 0,
            map: None,
            deferred: Vec::new(),
            sectors: 0,
            hardsect_size: 512,
            devfs_entry: None,
        }
    }

    /// Volume size in hardsect-sized units.
    pub(crate) fn volume_size(&self) -> u64 {
        if self.hardsect_size == 0 {
            return 0;
        }
        (self.sectors << crate::util::SECTOR_SHIFT)
            / u64::from(self.hardsect_size)
    }
}

/// Point-in-time snapshot of one mapped device, as returned by
/// [`Registry::find_by_minor`](crate::registry::Registry::find_by_minor).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceStatus {
    pub dev: Device,
    pub name: String,
    pub state: DevState,
    pub open_count: u32,
    pub sectors: SectorT,
}

// LCOV_EXCL_STOP
