// vim: tw=80
//! Boundary contracts to the surrounding block environment.
//!
//! The mapper redirects requests; something else must actually drive them
//! into real drivers, and something else owns the device-node namespace.
//! Both collaborators are traits so embedders (and tests) can supply their
//! own.

#[cfg(test)]
use mockall::automock;

use crate::request::Request;
use crate::types::{Device, Result, Rw};

/// The lower block layer a remapped request is forwarded into.
///
/// `submit` must eventually invoke the request's completion callback exactly
/// once.
#[cfg_attr(test, automock)]
pub trait BlockLayer: Send + Sync {
    fn submit(&self, rw: Rw, req: Request);

    /// Flush dirty state for `dev` to stable storage.  May block.
    fn sync(&self, dev: Device) -> Result<()>;
}

/// Opaque token for a registered device node.
pub type DevfsHandle = u64;

/// The virtual filesystem in which mapped devices appear as nodes.
#[cfg_attr(test, automock)]
pub trait Devfs: Send + Sync {
    fn register(&self, name: &str, dev: Device) -> Result<DevfsHandle>;

    fn unregister(&self, handle: DevfsHandle) -> Result<()>;
}
