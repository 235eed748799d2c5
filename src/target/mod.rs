// vim: tw=80
//! Pluggable sector remappers.
//!
//! A target owns one contiguous interval of a mapped device's sector space
//! and decides where requests falling in that interval really go.  The trait
//! object's vtable plays the role of the classic capability record: the
//! function pointers plus a flag word, with the implementing struct carrying
//! whatever private state the target needs.

use std::ops::BitOr;

use crate::request::Request;
use crate::types::Rw;

mod error;
mod linear;
mod stripe;

pub use self::error::ErrorTarget;
pub use self::linear::Linear;
pub use self::stripe::{Stripe, StripeDev};

/// Capability flags advertised by a target.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TargetFlags(u32);

impl TargetFlags {
    /// The target's mapping is stable enough to answer logical-to-physical
    /// block queries.
    pub const BMAP: TargetFlags = TargetFlags(0x1);

    pub fn empty() -> Self {
        TargetFlags(0)
    }

    pub fn contains(self, other: TargetFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TargetFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        TargetFlags(self.0 | rhs.0)
    }
}

/// Outcome of a target's `map`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapResult {
    /// The request was redirected; pass it on to the lower layer.
    Forwarded,
    /// The request is already satisfied; nothing to forward.  A target
    /// returning this has delivered completion through the request itself.
    Completed,
    /// The target could not map the request.
    Error,
}

/// A pluggable remapper bound to one interval of a mapped device.
pub trait Target: Send + Sync {
    fn name(&self) -> &'static str;

    fn flags(&self) -> TargetFlags {
        TargetFlags::empty()
    }

    /// Inspect and redirect the request.  Runs on the dispatch path under
    /// the registry lock; must not block.
    fn map(&self, req: &mut Request, rw: Rw) -> MapResult;

    /// Offered a failed completion.  Returning `true` means the target has
    /// taken ownership of the request and will complete it again itself;
    /// returning `false` lets the error propagate to the original
    /// completion callback.
    fn err(&self, _req: &mut Request, _rw: Rw) -> bool {
        false
    }
}

// LCOV_EXCL_STOP
