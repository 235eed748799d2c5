// vim: tw=80
//! Quiesce, deferred replay, and completion-error handling.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use devmap::{
    device::DevState,
    request::Request,
    table::{MappingTable, TableBuilder},
    target::{Linear, MapResult, Target},
    types::{Device, Rw},
};

use crate::util::{harness, linear_table, tracked_request};

/// Give a spawned thread time to reach its blocking point.
fn settle() {
    thread::sleep(Duration::from_millis(100));
}

/// Suspend blocks until the last in-flight request completes, then the
/// table is unbound.
#[test]
fn suspend_drains_inflight() {
    let (disk, reg) = harness();
    reg.create("vol0", None).unwrap();
    reg.activate(0, linear_table()).unwrap();

    let mut logs = Vec::new();
    for i in 0..10 {
        let (req, log) = tracked_request(0, i);
        reg.submit_request(req, Rw::Write);
        logs.push(log);
    }
    assert_eq!(disk.inflight(), 10);
    for _ in 0..7 {
        disk.complete_one(true);
    }

    let r2 = reg.clone();
    let suspender = thread::spawn(move || r2.suspend(0).unwrap());
    settle();
    assert!(!suspender.is_finished());

    disk.complete_one(true);
    settle();
    assert!(!suspender.is_finished());
    disk.complete_one(true);
    settle();
    assert!(!suspender.is_finished());

    disk.complete_one(true);
    suspender.join().unwrap();
    assert_eq!(reg.find_by_minor(0).unwrap().state, DevState::Suspended);
    for log in logs {
        assert_eq!(*log.lock().unwrap(), vec![true]);
    }
}

/// Requests arriving on a suspended device are enqueued, then re-dispatched
/// against the next table with no completion delivered twice.
#[test]
fn deferred_replay_under_new_table() {
    let (disk, reg) = harness();
    reg.create("vol0", None).unwrap();
    reg.activate(0, linear_table()).unwrap();
    reg.suspend(0).unwrap();

    let mut logs = Vec::new();
    for i in 0..5 {
        let (req, log) = tracked_request(0, i);
        reg.submit_request(req, Rw::Write);
        logs.push(log);
    }
    assert_eq!(disk.inflight(), 0);

    // Rebind with a different offset so the replay's table is observable
    let mut tb = TableBuilder::new();
    tb.add(299, Box::new(Linear::new(Device::new(8, 7), 0, 9000)))
        .unwrap();
    reg.activate(0, tb.build()).unwrap();

    let submitted = disk.take();
    let mut sectors = submitted.iter()
        .map(|(_, req)| {
            assert_eq!(req.rdev, Device::new(8, 7));
            req.rsector
        })
        .collect::<Vec<_>>();
    sectors.sort_unstable();
    assert_eq!(sectors, vec![9000, 9001, 9002, 9003, 9004]);

    for (_, mut req) in submitted {
        req.complete(true);
    }
    for log in logs {
        assert_eq!(*log.lock().unwrap(), vec![true]);
    }
}

/// Counts every `map` call it sees.
struct Counting {
    inner: Linear,
    maps: Arc<AtomicU32>,
}

impl Counting {
    fn table(maps: Arc<AtomicU32>) -> MappingTable {
        let mut tb = TableBuilder::new();
        let inner = Linear::new(Device::new(8, 0), 0, 0);
        tb.add(999, Box::new(Counting { inner, maps })).unwrap();
        tb.build()
    }
}

impl Target for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn map(&self, req: &mut Request, rw: Rw) -> MapResult {
        self.maps.fetch_add(1, Ordering::Relaxed);
        self.inner.map(req, rw)
    }
}

/// Between a suspend returning and the next activate, no target sees a
/// `map` call.
#[test]
fn no_map_while_suspended() {
    let (disk, reg) = harness();
    reg.create("vol0", None).unwrap();
    let old_maps = Arc::new(AtomicU32::new(0));
    let new_maps = Arc::new(AtomicU32::new(0));
    reg.activate(0, Counting::table(old_maps.clone())).unwrap();

    let (req, _log) = tracked_request(0, 1);
    reg.submit_request(req, Rw::Write);
    assert_eq!(old_maps.load(Ordering::Relaxed), 1);
    disk.complete_all(true);
    reg.suspend(0).unwrap();

    for i in 0..3 {
        let (req, _) = tracked_request(0, i);
        reg.submit_request(req, Rw::Write);
    }
    assert_eq!(old_maps.load(Ordering::Relaxed), 1);

    reg.activate(0, Counting::table(new_maps.clone())).unwrap();
    assert_eq!(old_maps.load(Ordering::Relaxed), 1);
    assert_eq!(new_maps.load(Ordering::Relaxed), 3);
}

/// Forwards everything unchanged, and claims every failed completion so it
/// can retry it itself.
struct Claiming {
    handled: Arc<AtomicU32>,
}

impl Target for Claiming {
    fn name(&self) -> &'static str {
        "claiming"
    }

    fn map(&self, _req: &mut Request, _rw: Rw) -> MapResult {
        MapResult::Forwarded
    }

    fn err(&self, _req: &mut Request, _rw: Rw) -> bool {
        self.handled.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// A handled completion error leaves the chain armed: no upstream
/// completion, no pending decrement, and the target's own later completion
/// finishes the request.
#[test]
fn handled_completion_error() {
    let (disk, reg) = harness();
    reg.create("vol0", None).unwrap();
    let handled = Arc::new(AtomicU32::new(0));
    let mut tb = TableBuilder::new();
    tb.add(999, Box::new(Claiming { handled: handled.clone() })).unwrap();
    reg.activate(0, tb.build()).unwrap();

    let (req, log) = tracked_request(0, 3);
    reg.submit_request(req, Rw::Write);
    let (_, mut req) = disk.take().pop().unwrap();

    req.complete(false);
    assert_eq!(handled.load(Ordering::Relaxed), 1);
    assert!(log.lock().unwrap().is_empty());

    // Still pending: a suspend must block on this request
    let r2 = reg.clone();
    let suspender = thread::spawn(move || r2.suspend(0).unwrap());
    settle();
    assert!(!suspender.is_finished());

    // The target makes the request good and completes it again
    req.complete(true);
    suspender.join().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![true]);
    assert_eq!(handled.load(Ordering::Relaxed), 1);
}
