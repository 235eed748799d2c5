// vim: tw=80
//! Request routing through active devices.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};

use devmap::{
    registry::{Dispatch, Registry},
    table::TableBuilder,
    target::ErrorTarget,
    types::{Device, Rw},
};

use crate::util::{FakeDisk, harness, linear_table, tracked_request};

type Harness = (Arc<FakeDisk>, Arc<Registry>);

#[fixture]
fn active() -> Harness {
    let (disk, reg) = harness();
    reg.create("vol0", None).unwrap();
    reg.activate(0, linear_table()).unwrap();
    (disk, reg)
}

/// Sector intervals route to their targets with the documented offsets,
/// including both sides of the interval boundary.
#[rstest]
fn linear_routing(active: Harness) {
    let (disk, reg) = active;
    for (rsector, minor, want) in
        [(50u64, 0u32, 1050u64), (99, 0, 1099), (100, 1, 5000),
         (299, 1, 5199)]
    {
        let (req, log) = tracked_request(0, rsector);
        reg.submit_request(req, Rw::Write);
        let submitted = disk.take();
        assert_eq!(submitted.len(), 1, "sector {}", rsector);
        assert_eq!(submitted[0].1.rdev, Device::new(8, minor));
        assert_eq!(submitted[0].1.rsector, want);
        assert!(log.lock().unwrap().is_empty());
    }
}

/// Every forwarded request completes its original callback exactly once,
/// with the final status.
#[rstest]
fn exactly_once_completion(active: Harness) {
    let (disk, reg) = active;
    let mut logs = Vec::new();
    for i in 0..10 {
        let (req, log) = tracked_request(0, i);
        reg.submit_request(req, Rw::Write);
        logs.push(log);
    }
    assert_eq!(disk.inflight(), 10);
    disk.complete_all(true);
    for log in logs {
        assert_eq!(*log.lock().unwrap(), vec![true]);
    }
}

/// A failed lower-layer completion propagates as `!uptodate`.
#[rstest]
fn failed_completion(active: Harness) {
    let (disk, reg) = active;
    let (req, log) = tracked_request(0, 0);
    reg.submit_request(req, Rw::Read);
    disk.complete_all(false);
    assert_eq!(*log.lock().unwrap(), vec![false]);
}

/// A target that refuses to map fails only its own request; the table
/// keeps working and holds no pending count for the failure.
#[rstest]
fn target_map_error(active: Harness) {
    let (disk, reg) = active;
    reg.create("broken", None).unwrap();
    let mut tb = TableBuilder::new();
    tb.add(999, Box::new(ErrorTarget)).unwrap();
    reg.activate(1, tb.build()).unwrap();

    let (req, log) = tracked_request(1, 5);
    assert!(matches!(reg.dispatch(req, Rw::Write), Dispatch::Failed));
    assert_eq!(*log.lock().unwrap(), vec![false]);
    assert_eq!(disk.inflight(), 0);
    // nothing pending: an immediate suspend can't block
    reg.suspend(1).unwrap();

    // the healthy device is unaffected
    let (req, log) = tracked_request(0, 5);
    reg.submit_request(req, Rw::Write);
    assert_eq!(disk.inflight(), 1);
    disk.complete_all(true);
    assert_eq!(*log.lock().unwrap(), vec![true]);
}

/// Requests addressed past the last interval fail rather than wrap.
#[rstest]
fn out_of_range_sector(active: Harness) {
    let (disk, reg) = active;
    let (req, log) = tracked_request(0, 300);
    assert!(matches!(reg.dispatch(req, Rw::Read), Dispatch::Failed));
    assert_eq!(*log.lock().unwrap(), vec![false]);
    assert_eq!(disk.inflight(), 0);
}

/// Minors with no device behind them fail requests outright.
#[rstest]
fn empty_slot(active: Harness) {
    let (_, reg) = active;
    let (req, log) = tracked_request(63, 0);
    assert!(matches!(reg.dispatch(req, Rw::Read), Dispatch::Failed));
    assert_eq!(*log.lock().unwrap(), vec![false]);
}
