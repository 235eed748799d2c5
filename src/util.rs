// vim: tw=80
//! Common constants and utility functions used throughout devmap

use std::ops::{Add, Div, Sub};

/// Number of slots in the device registry.
pub const MAX_DEVICES: usize = 64;

/// Major number under which mapped devices appear.
pub const DM_BLK_MAJOR: u32 = 124;

/// Maximum length of a mapped device's name, including room for a NUL when
/// the name crosses a C boundary.
pub const DM_NAME_LEN: usize = 128;

/// Read-ahead, in sectors, applied to every mapped device until changed.
pub const DEFAULT_READ_AHEAD: u32 = 64;

/// Size of a logical block as used by the block-map ioctl.
pub const BLOCK_SIZE: u32 = 1024;

/// log2 of the sector size.
pub const SECTOR_SHIFT: u32 = 9;

/// "Private" trait; only exists to ensure that div_roundup will fail to
/// compile when used with signed numbers.
#[doc(hidden)]
pub trait RoundupAble {}
impl RoundupAble for u8 {}
impl RoundupAble for u16 {}
impl RoundupAble for u32 {}
impl RoundupAble for u64 {}
impl RoundupAble for usize {}

/// Divide two unsigned numbers (usually integers), rounding up.
pub fn div_roundup<T>(dividend: T, divisor: T) -> T
    where T: Add<Output=T> + Copy + Div<Output=T> + From<u8> + RoundupAble +
             Sub<Output=T> {
    (dividend + divisor - T::from(1u8)) / divisor
}

// LCOV_EXCL_STOP
