// vim: tw=80
//! Common type definitions used throughout devmap

use enum_primitive_derive::Primitive;
use num_traits::ToPrimitive;
use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::util::DM_BLK_MAJOR;

/// Indexes a sector.  Sectors are always 512 bytes.
pub type SectorT = u64;

/// A device number: the major half selects a driver, the minor half a unit.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
         PartialOrd, Serialize)]
pub struct Device {
    pub major: u32,
    pub minor: u32,
}

impl Device {
    pub fn new(major: u32, minor: u32) -> Self {
        Device { major, minor }
    }

    /// The device number of the mapped device with the given minor.
    pub fn mapped(minor: u32) -> Self {
        Device { major: DM_BLK_MAJOR, minor }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Direction of an I/O request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Rw {
    Read,
    Write,
}

/// devmap's error type.  Basically just an errno
#[derive(Clone, Copy, Debug, Eq, PartialEq, Primitive)]
pub enum Error {
    EPERM  = libc::EPERM as isize,
    ENOENT = libc::ENOENT as isize,
    EIO    = libc::EIO as isize,
    ENXIO  = libc::ENXIO as isize,
    ENOMEM = libc::ENOMEM as isize,
    EACCES = libc::EACCES as isize,
    EBUSY  = libc::EBUSY as isize,
    ENODEV = libc::ENODEV as isize,
    EINVAL = libc::EINVAL as isize,
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        e.to_i32().unwrap()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

// LCOV_EXCL_STOP
