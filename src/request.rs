// vim: tw=80
//! The unit of I/O passed through the mapper.
//!
//! A `Request` is deliberately payload-free: the mapper redirects I/O, it
//! never touches the bytes.  What it does own is the pair of fields that
//! completion-hook chaining swaps in and out: the completion callback and an
//! opaque scratch slot.

use std::any::Any;
use std::fmt;

use crate::types::{Device, SectorT};

/// Completion callback.  The lower layer invokes it exactly once, with
/// `true` for a successful completion.
pub type EndIo = Box<dyn FnOnce(&mut Request, bool) + Send + Sync>;

/// A single I/O request, addressed to a device and sector.
///
/// Targets redirect a request by mutating `rdev` and `rsector`.  The
/// dispatcher interposes on completion by swapping `end_io` for a trampoline
/// and parking its bookkeeping in the scratch slot; both are restored before
/// the original callback runs.
pub struct Request {
    /// Device the request is (currently) aimed at.
    pub rdev: Device,

    /// Sector on `rdev` the request is (currently) aimed at.
    pub rsector: SectorT,

    pub(crate) end_io: Option<EndIo>,
    pub(crate) private: Option<Box<dyn Any + Send + Sync>>,
}

impl Request {
    pub fn new(rdev: Device, rsector: SectorT) -> Self {
        Request { rdev, rsector, end_io: None, private: None }
    }

    /// Install the upper layer's completion callback.
    pub fn set_end_io<F>(&mut self, f: F)
        where F: FnOnce(&mut Request, bool) + Send + Sync + 'static
    {
        self.end_io = Some(Box::new(f));
    }

    /// Stash an upper-layer context on the request.
    pub fn set_private(&mut self, p: Box<dyn Any + Send + Sync>) {
        self.private = Some(p);
    }

    pub fn take_private(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.private.take()
    }

    /// Deliver completion.  Consumes the installed callback, so a second
    /// call on the same request is a no-op unless someone re-armed it.
    pub fn complete(&mut self, uptodate: bool) {
        if let Some(f) = self.end_io.take() {
            f(self, uptodate);
        }
    }

    /// Fail the request with an I/O error.
    pub(crate) fn io_error(&mut self) {
        self.complete(false);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("rdev", &self.rdev)
            .field("rsector", &self.rsector)
            .field("end_io", &self.end_io.is_some())
            .finish()
    }
}

// LCOV_EXCL_STOP
