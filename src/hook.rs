// vim: tw=80
//! Per-request completion interposition.
//!
//! When the dispatcher forwards a request it parks an [`IoHook`] in the
//! request's scratch slot and swaps the completion callback for
//! [`dec_pending`].  The hook remembers which table instance the request was
//! issued against (so the right pending count drops, even if the device has
//! since been rebound), which target mapped it (so the target's error hook
//! can be offered failed completions), and the original callback/context
//! pair to restore.
//!
//! Hooks come from a bounded pool.  Allocation never blocks; the dispatcher
//! treats exhaustion as a request failure rather than a reason to wait, since
//! it runs on submission contexts that may not sleep.

use std::any::Any;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::request::{EndIo, Request};
use crate::table::MappingTable;
use crate::types::Rw;

/// Shadow record for one in-flight forwarded request.
pub(crate) struct IoHook {
    pub(crate) table: Arc<MappingTable>,
    pub(crate) leaf: usize,
    pub(crate) rw: Rw,
    end_io: Option<EndIo>,
    private: Option<Box<dyn Any + Send + Sync>>,
    _slot: Slot,
}

impl IoHook {
    /// Save the request's completion fields into the hook and arm the
    /// trampoline.  The caller has already bumped the table's pending count.
    pub(crate) fn install(mut self: Box<Self>, req: &mut Request) {
        self.end_io = req.end_io.take();
        self.private = req.private.take();
        rearm(req, self);
    }
}

/// Put the hook (back) in the scratch slot and point the completion callback
/// at the trampoline.
fn rearm(req: &mut Request, hook: Box<IoHook>) {
    req.private = Some(hook);
    req.end_io = Some(Box::new(dec_pending));
}

/// Completion trampoline installed on every forwarded request.
///
/// Runs on the lower layer's completion context; takes no registry lock.
pub(crate) fn dec_pending(req: &mut Request, uptodate: bool) {
    let mut hook = req.private.take()
        .and_then(|p| p.downcast::<IoHook>().ok())
        .expect("completion without an installed hook");

    if !uptodate && hook.table.target(hook.leaf).err(req, hook.rw) {
        // The target owns the request now and will complete it again;
        // nothing may be torn down yet.
        rearm(req, hook);
        return;
    }

    hook.table.complete_one();

    req.end_io = hook.end_io.take();
    req.private = hook.private.take();
    drop(hook);

    req.complete(uptodate);
}

/// Bounded, non-blocking allocator for [`IoHook`]s.
///
/// Sized for the expected in-flight depth; one slot per outstanding
/// forwarded request.  Slots return on hook drop.
pub struct HookPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    capacity: usize,
    in_use: AtomicUsize,
}

/// Reservation of one pool slot, released on drop.
struct Slot(Arc<PoolInner>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.in_use.fetch_sub(1, Ordering::Release);
    }
}

impl HookPool {
    pub fn new(capacity: usize) -> Self {
        HookPool {
            inner: Arc::new(PoolInner {
                capacity,
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Reserve a slot and build a hook, or `None` if the pool is exhausted.
    pub(crate) fn alloc(&self, table: Arc<MappingTable>, leaf: usize, rw: Rw)
        -> Option<Box<IoHook>>
    {
        let mut cur = self.inner.in_use.load(Ordering::Relaxed);
        loop {
            if cur == self.inner.capacity {
                return None;
            }
            match self.inner.in_use.compare_exchange_weak(
                cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        Some(Box::new(IoHook {
            table,
            leaf,
            rw,
            end_io: None,
            private: None,
            _slot: Slot(self.inner.clone()),
        }))
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Relaxed)
    }
}

// LCOV_EXCL_STOP
