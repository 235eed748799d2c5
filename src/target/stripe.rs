// vim: tw=80

use crate::request::Request;
use crate::types::{Device, Error, Result, Rw, SectorT};

use super::{MapResult, Target};

/// One leg of a [`Stripe`] target.
#[derive(Clone, Copy, Debug)]
pub struct StripeDev {
    pub dev: Device,
    /// First physical sector of this leg's share.
    pub start: SectorT,
}

/// Interleaves its interval across several devices in fixed-size chunks.
pub struct Stripe {
    begin: SectorT,
    chunk_shift: u32,
    chunk_mask: SectorT,
    stripes: Vec<StripeDev>,
}

impl Stripe {
    /// * `begin`:       first sector of this target's interval on the
    ///                  mapped device
    /// * `chunk_size`:  sectors per chunk; must be a power of two
    /// * `stripes`:     the legs, in round-robin order
    pub fn new(begin: SectorT, chunk_size: SectorT, stripes: Vec<StripeDev>)
        -> Result<Self>
    {
        if stripes.is_empty() || !chunk_size.is_power_of_two() {
            return Err(Error::EINVAL);
        }
        Ok(Stripe {
            begin,
            chunk_shift: chunk_size.trailing_zeros(),
            chunk_mask: chunk_size - 1,
            stripes,
        })
    }
}

impl Target for Stripe {
    fn name(&self) -> &'static str {
        "striped"
    }

    fn map(&self, req: &mut Request, _rw: Rw) -> MapResult {
        let offset = req.rsector.wrapping_sub(self.begin);
        let chunk = offset >> self.chunk_shift;
        let n = self.stripes.len() as SectorT;
        let leg = &self.stripes[(chunk % n) as usize];
        req.rdev = leg.dev;
        req.rsector = leg.start + ((chunk / n) << self.chunk_shift)
            + (offset & self.chunk_mask);
        MapResult::Forwarded
    }
}

// LCOV_EXCL_STOP
