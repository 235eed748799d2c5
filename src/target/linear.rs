// vim: tw=80

use crate::request::Request;
use crate::types::{Device, Rw, SectorT};

use super::{MapResult, Target, TargetFlags};

/// Maps its interval onto a contiguous run of sectors on another device.
pub struct Linear {
    dev: Device,
    /// Offset added to every sector.  Stored pre-biased by the interval's
    /// first sector, so `map` is a single wrapping add.
    delta: SectorT,
}

impl Linear {
    /// * `dev`:    underlying device to redirect to
    /// * `begin`:  first sector of this target's interval on the mapped
    ///             device
    /// * `start`:  sector on `dev` that `begin` maps to
    pub fn new(dev: Device, begin: SectorT, start: SectorT) -> Self {
        Linear { dev, delta: start.wrapping_sub(begin) }
    }
}

impl Target for Linear {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn flags(&self) -> TargetFlags {
        TargetFlags::BMAP
    }

    fn map(&self, req: &mut Request, _rw: Rw) -> MapResult {
        req.rdev = self.dev;
        req.rsector = req.rsector.wrapping_add(self.delta);
        MapResult::Forwarded
    }
}

// LCOV_EXCL_STOP
