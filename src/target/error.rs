// vim: tw=80

use crate::request::Request;
use crate::types::Rw;

use super::{MapResult, Target};

/// Fails every request.  Useful for fencing off part of a device.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorTarget;

impl Target for ErrorTarget {
    fn name(&self) -> &'static str {
        "error"
    }

    fn map(&self, _req: &mut Request, _rw: Rw) -> MapResult {
        MapResult::Error
    }
}

// LCOV_EXCL_STOP
