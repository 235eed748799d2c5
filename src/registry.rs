// vim: tw=80
//! The device registry: a fixed array of minor-numbered slots under a single
//! reader/writer lock, plus everything that runs against it — the request
//! dispatcher, the suspend/activate controller, and the block-device
//! surface (open/close/ioctl/bmap).
//!
//! Lock discipline: the dispatch hot path takes the lock shared and touches
//! nothing but an atomic beyond it.  All state mutation (create, remove,
//! activate, suspend, deactivate, open, close, deferral) takes it exclusive.
//! Completion callbacks never run under either mode; any path that must fail
//! a request carries it out of the locked region first.

use std::mem;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_derive::Deserialize;

use crate::block::{BlockLayer, Devfs};
use crate::device::{DeferredIo, DevState, DeviceStatus, MappedDevice};
use crate::hook::HookPool;
use crate::hotplug::{self, Action};
use crate::request::Request;
use crate::table::MappingTable;
use crate::target::{MapResult, TargetFlags};
use crate::types::{Device, Error, Result, Rw, SectorT};
use crate::util::{
    BLOCK_SIZE,
    DEFAULT_READ_AHEAD,
    DM_NAME_LEN,
    MAX_DEVICES,
    SECTOR_SHIFT,
};

/// Synthetic disk geometry advertised to callers that still think in
/// cylinders.
pub const GEO_HEADS: u64 = 64;
pub const GEO_SECTORS: u64 = 32;

/// Registry tunables.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Helper executable spawned on device add/remove, if any.
    pub hotplug_helper: Option<PathBuf>,

    /// Initial read-ahead, in sectors.
    pub read_ahead: u32,

    /// Capacity of the I/O hook pool; bounds in-flight forwarded requests.
    pub hook_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hotplug_helper: None,
            read_ahead: DEFAULT_READ_AHEAD,
            hook_pool_size: 256,
        }
    }
}

/// What became of a dispatched request.
#[derive(Debug)]
pub enum Dispatch {
    /// Remapped; the caller should push it into the lower layer.
    /// [`Registry::submit_request`] does so itself.
    Forward(Request),

    /// The target satisfied the request synchronously; nothing to forward.
    Done,

    /// Parked on the device's deferred queue until the next activation.
    Deferred,

    /// Failed; the request's completion callback has already run with
    /// `uptodate == false`.
    Failed,
}

/// Disk geometry as reported by the geometry ioctl.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Geometry {
    pub heads: u64,
    pub sectors: u64,
    pub cylinders: u64,
}

/// The fixed command set of the block-device ioctl surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoctlCmd {
    GetGeo,
    GetSize,
    GetReadAhead,
    SetReadAhead(u32),
    FlushBuffers,
    RereadPartitions,
    /// Map a logical block to its physical home.
    Bmap(u64),
    /// Anything this driver doesn't speak.
    Other(u32),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoctlReply {
    Geo(Geometry),
    /// Volume size in hardsect-sized units.
    Size(u64),
    ReadAhead(u32),
    Bmap(Device, SectorT),
    Done,
}

struct Inner {
    devs: Vec<Option<MappedDevice>>,
    read_ahead: u32,
}

impl Inner {
    fn device(&self, minor: u32) -> Result<&MappedDevice> {
        self.devs.get(minor as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::ENXIO)
    }

    fn device_mut(&mut self, minor: u32) -> Result<&mut MappedDevice> {
        self.devs.get_mut(minor as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::ENXIO)
    }
}

/// Intermediate dispatch outcome, used to carry failing requests out of the
/// locked region before their completion callbacks run.
enum Routed {
    Done(Dispatch),
    Fail(Request),
    NotActive(Request),
}

/// The process-wide table of mapped devices.
pub struct Registry {
    inner: RwLock<Inner>,
    hooks: HookPool,
    lower: Arc<dyn BlockLayer>,
    devfs: Option<Arc<dyn Devfs>>,
    hotplug_helper: Option<PathBuf>,
}

impl Registry {
    pub fn new(config: Config, lower: Arc<dyn BlockLayer>,
               devfs: Option<Arc<dyn Devfs>>) -> Self
    {
        tracing::info!(version = env!("CARGO_PKG_VERSION"),
                       "device mapper initialised");
        let mut devs = Vec::with_capacity(MAX_DEVICES);
        devs.resize_with(MAX_DEVICES, || None);
        Registry {
            inner: RwLock::new(Inner {
                devs,
                read_ahead: config.read_ahead,
            }),
            hooks: HookPool::new(config.hook_pool_size),
            lower,
            devfs,
            hotplug_helper: config.hotplug_helper,
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Entry point for every request.
    pub fn dispatch(&self, mut req: Request, rw: Rw) -> Dispatch {
        let minor = req.rdev.minor as usize;
        if minor >= MAX_DEVICES {
            req.io_error();
            return Dispatch::Failed;
        }

        // Hot path: the device is active.  Routing happens under the shared
        // lock, so the (state, table) pair is one consistent snapshot and
        // the pending increment cannot slip past a concurrent suspend.
        let routed = {
            let inner = self.inner.read().unwrap();
            match inner.devs[minor].as_ref() {
                None => Routed::Fail(req),
                Some(md) if md.state == DevState::Active => {
                    let table = md.map.clone()
                        .expect("active device with no table");
                    self.route(table, req, rw)
                }
                Some(_) => Routed::NotActive(req),
            }
        };
        let req = match routed {
            Routed::Done(d) => return d,
            Routed::Fail(mut req) => {
                req.io_error();
                return Dispatch::Failed;
            }
            Routed::NotActive(req) => req,
        };

        // The device wasn't active.  Re-check and commit under a single
        // exclusive acquisition: either it became active meanwhile and the
        // request routes against the new table, or it parks on the deferred
        // queue.  There is no window in between.
        let routed = {
            let mut inner = self.inner.write().unwrap();
            match inner.devs[minor].as_mut() {
                None => Routed::Fail(req),
                Some(md) if md.state == DevState::Active => {
                    let table = md.map.clone()
                        .expect("active device with no table");
                    self.route(table, req, rw)
                }
                Some(md) => {
                    md.deferred.push(DeferredIo { req, rw });
                    Routed::Done(Dispatch::Deferred)
                }
            }
        };
        match routed {
            Routed::Done(d) => d,
            Routed::Fail(mut req) => {
                req.io_error();
                Dispatch::Failed
            }
            Routed::NotActive(_) => unreachable!(),
        }
    }

    /// Dispatch and, if the request was remapped, push it into the lower
    /// layer.
    pub fn submit_request(&self, req: Request, rw: Rw) {
        if let Dispatch::Forward(req) = self.dispatch(req, rw) {
            self.lower.submit(rw, req);
        }
    }

    /// Route one request against a table snapshot.  Caller holds the
    /// registry lock in either mode.
    fn route(&self, table: Arc<MappingTable>, mut req: Request, rw: Rw)
        -> Routed
    {
        let Some(leaf) = table.find_target(req.rsector) else {
            // Beyond the end of the table
            return Routed::Fail(req);
        };
        let Some(hook) = self.hooks.alloc(table.clone(), leaf, rw) else {
            tracing::warn!(rdev = %req.rdev, "I/O hook pool exhausted");
            return Routed::Fail(req);
        };
        match table.map_request(leaf, &mut req, rw) {
            MapResult::Forwarded => {
                table.inc_pending();
                hook.install(&mut req);
                Routed::Done(Dispatch::Forward(req))
            }
            MapResult::Completed => Routed::Done(Dispatch::Done),
            MapResult::Error => {
                drop(hook);
                Routed::Fail(req)
            }
        }
    }

    // ------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------

    /// Allocate a device slot.  `minor` of `None` takes the lowest free
    /// index; a specific minor fails if its slot is occupied.
    pub fn create(&self, name: &str, minor: Option<u32>) -> Result<Device> {
        if name.is_empty() || name.len() >= DM_NAME_LEN {
            return Err(Error::EINVAL);
        }
        if let Some(m) = minor {
            if m as usize >= MAX_DEVICES {
                return Err(Error::ENXIO);
            }
        }

        let dev = {
            let mut inner = self.inner.write().unwrap();
            let idx = match minor {
                Some(m) => {
                    if inner.devs[m as usize].is_some() {
                        return Err(Error::ENXIO);
                    }
                    m as usize
                }
                None => {
                    match inner.devs.iter().position(Option::is_none) {
                        Some(i) => i,
                        None => {
                            tracing::warn!("no free device slots");
                            return Err(Error::ENXIO);
                        }
                    }
                }
            };
            let dev = Device::mapped(idx as u32);
            let mut md = MappedDevice::new(dev, name.to_owned());
            if let Some(devfs) = &self.devfs {
                // Propagating the error here leaves the slot vacant, as if
                // the call never happened
                md.devfs_entry = Some(devfs.register(name, dev)?);
            }
            inner.devs[idx] = Some(md);
            dev
        };

        tracing::info!(name, %dev, "created mapped device");
        if let Some(helper) = &self.hotplug_helper {
            hotplug::notify(helper, name, Action::Add);
        }
        Ok(dev)
    }

    /// Free a device slot.  Refused while the device is open, active, or
    /// mid-suspend.  Any requests still parked on the deferred queue fail
    /// with an I/O error; none are silently dropped.
    pub fn remove(&self, minor: u32) -> Result<()> {
        let md = {
            let mut inner = self.inner.write().unwrap();
            {
                let md = inner.device_mut(minor)?;
                if md.use_count > 0 {
                    return Err(Error::EBUSY);
                }
                match md.state {
                    DevState::Created | DevState::Suspended => (),
                    DevState::Active | DevState::Suspending => {
                        return Err(Error::EBUSY);
                    }
                }
                if let Some(handle) = md.devfs_entry {
                    if let Some(devfs) = &self.devfs {
                        devfs.unregister(handle)?;
                    }
                }
            }
            inner.devs[minor as usize].take().unwrap()
        };

        for DeferredIo { mut req, .. } in md.deferred {
            req.io_error();
        }
        tracing::info!(name = md.name.as_str(), minor,
                       "removed mapped device");
        if let Some(helper) = &self.hotplug_helper {
            hotplug::notify(helper, &md.name, Action::Remove);
        }
        Ok(())
    }

    /// Bind a table and make the device available, replaying anything that
    /// was deferred while it wasn't.
    #[tracing::instrument(skip(self, table))]
    pub fn activate(&self, minor: u32, table: MappingTable) -> Result<()> {
        if table.num_targets() == 0 {
            return Err(Error::EINVAL);
        }
        let table = Arc::new(table);

        let deferred = {
            let mut inner = self.inner.write().unwrap();
            let md = inner.device_mut(minor)?;
            match md.state {
                DevState::Created | DevState::Suspended => (),
                DevState::Active | DevState::Suspending => {
                    return Err(Error::EBUSY);
                }
            }
            md.sectors = table.size();
            md.hardsect_size = table.hardsect_size();
            md.map = Some(table);
            md.state = DevState::Active;
            mem::take(&mut md.deferred)
        };

        // Replay outside the lock; the deferred list is LIFO.
        tracing::debug!(minor, replayed = deferred.len(),
                        "activated mapped device");
        for DeferredIo { req, rw } in deferred.into_iter().rev() {
            if let Dispatch::Forward(req) = self.dispatch(req, rw) {
                self.lower.submit(rw, req);
            }
        }
        Ok(())
    }

    /// Quiesce the device: stop routing new requests, wait for every
    /// in-flight one to complete, then unbind the table.  Blocks for as
    /// long as the lower layer takes; callers needing a timeout must impose
    /// it themselves.
    #[tracing::instrument(skip(self))]
    pub fn suspend(&self, minor: u32) -> Result<()> {
        let table = {
            let mut inner = self.inner.write().unwrap();
            let md = inner.device_mut(minor)?;
            match md.state {
                DevState::Active => (),
                DevState::Created | DevState::Suspended => return Ok(()),
                DevState::Suspending => return Err(Error::EBUSY),
            }
            md.state = DevState::Suspending;
            md.map.clone().expect("active device with no table")
        };

        // Wait for the in-flight count to drain, with no locks held.  New
        // arrivals see Suspending and defer; nothing can re-increment this
        // table's count.
        table.quiesce();

        let mut inner = self.inner.write().unwrap();
        let md = inner.device_mut(minor)?;
        md.map = None;
        md.state = DevState::Suspended;
        tracing::debug!(minor, "suspended mapped device");
        Ok(())
    }

    /// Unbind the table of a device nobody has open.
    pub fn deactivate(&self, minor: u32) -> Result<()> {
        {
            let inner = self.inner.read().unwrap();
            let md = inner.device(minor)?;
            if md.use_count > 0 || md.state == DevState::Suspending {
                return Err(Error::EBUSY);
            }
            // Sync may block a long while.  The shared lock keeps the slot
            // alive without stalling other readers; writers queue behind it.
            self.lower.sync(md.dev)?;
        }

        let mut inner = self.inner.write().unwrap();
        let md = inner.device_mut(minor)?;
        if md.use_count > 0 || md.state == DevState::Suspending {
            // somebody got in while we were syncing
            return Err(Error::EBUSY);
        }
        md.map = None;
        md.state = DevState::Created;
        tracing::debug!(minor, "deactivated mapped device");
        Ok(())
    }

    /// Snapshot one device, if its slot is occupied.
    pub fn find_by_minor(&self, minor: u32) -> Option<DeviceStatus> {
        let inner = self.inner.read().unwrap();
        inner.devs.get(minor as usize)?.as_ref().map(|md| DeviceStatus {
            dev: md.dev,
            name: md.name.clone(),
            state: md.state,
            open_count: md.use_count,
            sectors: md.sectors,
        })
    }

    // ------------------------------------------------------------------
    // Block-device surface
    // ------------------------------------------------------------------

    /// Take an open handle.  Only active devices may be opened.
    pub fn open(&self, minor: u32) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let md = inner.device_mut(minor)?;
        if md.state != DevState::Active {
            return Err(Error::ENXIO);
        }
        md.use_count += 1;
        Ok(())
    }

    /// Drop an open handle.
    pub fn close(&self, minor: u32) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let md = inner.device_mut(minor)?;
        if md.use_count == 0 {
            tracing::warn!(minor, "reference count in mapped device \
                                   incorrect");
            return Err(Error::ENXIO);
        }
        md.use_count -= 1;
        Ok(())
    }

    pub fn ioctl(&self, minor: u32, cmd: IoctlCmd, privileged: bool)
        -> Result<IoctlReply>
    {
        if minor as usize >= MAX_DEVICES {
            return Err(Error::ENXIO);
        }
        match cmd {
            IoctlCmd::GetGeo => {
                let volume = self.volume_size(minor)?;
                Ok(IoctlReply::Geo(Geometry {
                    heads: GEO_HEADS,
                    sectors: GEO_SECTORS,
                    cylinders: volume / GEO_HEADS / GEO_SECTORS,
                }))
            }
            IoctlCmd::GetSize =>
                Ok(IoctlReply::Size(self.volume_size(minor)?)),
            IoctlCmd::GetReadAhead => {
                let inner = self.inner.read().unwrap();
                Ok(IoctlReply::ReadAhead(inner.read_ahead))
            }
            IoctlCmd::SetReadAhead(n) => {
                if !privileged {
                    return Err(Error::EACCES);
                }
                self.inner.write().unwrap().read_ahead = n;
                Ok(IoctlReply::Done)
            }
            IoctlCmd::FlushBuffers => {
                if !privileged {
                    return Err(Error::EACCES);
                }
                let dev = {
                    let inner = self.inner.read().unwrap();
                    inner.device(minor)?.dev
                };
                self.lower.sync(dev)?;
                Ok(IoctlReply::Done)
            }
            IoctlCmd::RereadPartitions => Err(Error::EINVAL),
            IoctlCmd::Bmap(block) => {
                let (dev, sector) = self.user_bmap(minor, block)?;
                Ok(IoctlReply::Bmap(dev, sector))
            }
            IoctlCmd::Other(raw) => {
                tracing::warn!(minor, cmd = raw, "unknown block ioctl");
                Err(Error::EINVAL)
            }
        }
    }

    fn volume_size(&self, minor: u32) -> Result<u64> {
        let inner = self.inner.read().unwrap();
        Ok(inner.device(minor)?.volume_size())
    }

    /// Resolve a logical block on the mapped device to its physical home,
    /// by driving the lookup with a synthetic request that is never
    /// forwarded.  Only targets advertising a stable mapping participate.
    fn user_bmap(&self, minor: u32, block: u64) -> Result<(Device, SectorT)> {
        let inner = self.inner.read().unwrap();
        let md = inner.device(minor)?;
        if md.state != DevState::Active {
            return Err(Error::EINVAL);
        }
        let table = md.map.as_ref().expect("active device with no table");

        let sectors_per_block = SectorT::from(BLOCK_SIZE >> SECTOR_SHIFT);
        let mut req = Request::new(md.dev, block * sectors_per_block);
        let leaf = table.find_target(req.rsector).ok_or(Error::EINVAL)?;
        if !table.target(leaf).flags().contains(TargetFlags::BMAP) {
            return Err(Error::EINVAL);
        }
        // The request drops at the end of this scope, along with anything
        // the target stashed on it.
        match table.map_request(leaf, &mut req, Rw::Read) {
            MapResult::Forwarded => Ok((req.rdev, req.rsector)),
            MapResult::Completed => Err(Error::EINVAL),
            MapResult::Error => Err(Error::EIO),
        }
    }
}

// LCOV_EXCL_STOP
