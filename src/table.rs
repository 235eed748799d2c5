// vim: tw=80
//! The mapping table: an immutable, sorted partition of a device's sector
//! space into intervals, each bound to a target.
//!
//! Lookup goes through an implicit B-tree laid out as one flat key array per
//! level.  Nodes hold [`KEYS_PER_NODE`] keys, so with 8-byte sectors a node
//! fills a single cache line, and the per-level scan is a short linear loop
//! rather than a pointer chase.  The tree is frozen at build time; only the
//! pending count and its wait-set ever change afterwards.

use std::fmt;
use std::sync::{
    Condvar,
    Mutex,
    atomic::{AtomicU32, Ordering},
};

use crate::request::Request;
use crate::target::{MapResult, Target};
use crate::types::{Error, Result, Rw, SectorT};
use crate::util::div_roundup;

/// Keys per B-tree node.  7 keys of 8 bytes plus the implied fanout of 8
/// keeps each node within one cache line.
pub const KEYS_PER_NODE: usize = 7;

const CHILDREN_PER_NODE: usize = KEYS_PER_NODE + 1;

/// Key padding; compares greater than every real sector.
const KEY_SENTINEL: SectorT = SectorT::MAX;

/// Assembles a [`MappingTable`] from (interval, target) pairs supplied in
/// ascending order.
pub struct TableBuilder {
    highs: Vec<SectorT>,
    targets: Vec<Box<dyn Target>>,
    hardsect_size: u32,
}

impl TableBuilder {
    pub fn new() -> Self {
        TableBuilder {
            highs: Vec::new(),
            targets: Vec::new(),
            hardsect_size: 512,
        }
    }

    pub fn set_hardsect_size(&mut self, size: u32) {
        self.hardsect_size = size;
    }

    /// Append a target covering sectors from the previous entry's bound
    /// (exclusive) through `high` (inclusive).
    pub fn add(&mut self, high: SectorT, target: Box<dyn Target>)
        -> Result<()>
    {
        if let Some(&prev) = self.highs.last() {
            if high <= prev {
                return Err(Error::EINVAL);
            }
        }
        self.highs.push(high);
        self.targets.push(target);
        Ok(())
    }

    /// Freeze the table, building the lookup tree.
    pub fn build(self) -> MappingTable {
        let (counts, index) = build_index(&self.highs);
        MappingTable {
            counts,
            index,
            highs: self.highs,
            targets: self.targets,
            hardsect_size: self.hardsect_size,
            pending: AtomicU32::new(0),
            drain: Mutex::new(()),
            drained: Condvar::new(),
        }
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lay out the per-level key arrays, bottom-up.
///
/// The leaf level is `highs` padded to a whole number of nodes with
/// sentinels.  Each internal key is the largest leaf key reachable through
/// the corresponding child, found by descending always-last-child; a child
/// index past the end of its level reads as the sentinel, which keeps
/// partially-filled right edges routable.
fn build_index(highs: &[SectorT]) -> (Vec<usize>, Vec<Vec<SectorT>>) {
    let mut counts = vec![div_roundup(highs.len().max(1), KEYS_PER_NODE)];
    while counts[0] > 1 {
        counts.insert(0, div_roundup(counts[0], CHILDREN_PER_NODE));
    }
    let depth = counts.len();

    let mut index = counts.iter()
        .map(|c| vec![KEY_SENTINEL; c * KEYS_PER_NODE])
        .collect::<Vec<_>>();
    index[depth - 1][..highs.len()].copy_from_slice(highs);

    let high = |index: &[Vec<SectorT>], mut l: usize, mut n: usize| {
        while l < depth - 1 {
            n = n * CHILDREN_PER_NODE + (CHILDREN_PER_NODE - 1);
            l += 1;
        }
        if n >= counts[l] {
            KEY_SENTINEL
        } else {
            index[l][n * KEYS_PER_NODE + KEYS_PER_NODE - 1]
        }
    };

    for l in (0..depth - 1).rev() {
        let mut level = vec![KEY_SENTINEL; counts[l] * KEYS_PER_NODE];
        for n in 0..counts[l] {
            for k in 0..KEYS_PER_NODE {
                level[n * KEYS_PER_NODE + k] =
                    high(&index, l + 1, n * CHILDREN_PER_NODE + k);
            }
        }
        index[l] = level;
    }

    (counts, index)
}

/// An immutable sector-to-target index plus the accounting needed to drain
/// it: a count of in-flight forwarded requests and a wait-set signalled when
/// that count reaches zero.
pub struct MappingTable {
    counts: Vec<usize>,
    index: Vec<Vec<SectorT>>,
    highs: Vec<SectorT>,
    targets: Vec<Box<dyn Target>>,
    hardsect_size: u32,
    pending: AtomicU32,
    drain: Mutex<()>,
    drained: Condvar,
}

impl MappingTable {
    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn hardsect_size(&self) -> u32 {
        self.hardsect_size
    }

    /// Total sectors covered by the table.
    pub fn size(&self) -> SectorT {
        self.highs.last().map(|h| h + 1).unwrap_or(0)
    }

    /// In-flight forwarded requests issued against this table.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn target(&self, leaf: usize) -> &dyn Target {
        &*self.targets[leaf]
    }

    /// Walk the tree for the leaf index owning `sector`.  May land in the
    /// sentinel padding for sectors beyond the table's end.
    fn find(&self, sector: SectorT) -> usize {
        let mut n = 0;
        let mut k = 0;
        for l in 0..self.counts.len() {
            n = n * CHILDREN_PER_NODE + k;
            let node = &self.index[l][n * KEYS_PER_NODE..][..KEYS_PER_NODE];
            k = node.iter()
                .position(|key| *key >= sector)
                .unwrap_or(KEYS_PER_NODE);
        }
        KEYS_PER_NODE * n + k
    }

    /// The index of the target owning `sector`, or `None` for sectors past
    /// the end of the table.  A sector exactly on an interval boundary
    /// belongs to the lower-indexed target.
    pub fn find_target(&self, sector: SectorT) -> Option<usize> {
        let leaf = self.find(sector);
        (leaf < self.targets.len()).then_some(leaf)
    }

    /// Route `req` through the owning target's `map`.
    pub(crate) fn map_request(&self, leaf: usize, req: &mut Request, rw: Rw)
        -> MapResult
    {
        self.targets[leaf].map(req, rw)
    }

    pub(crate) fn inc_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Record one completion.  On the final one, wake anybody in
    /// [`MappingTable::quiesce`]; the wait-set mutex is held across the
    /// notify so a waiter between its check and its sleep cannot miss it.
    pub(crate) fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.drain.lock().unwrap();
            self.drained.notify_all();
        }
    }

    /// Block until every in-flight request against this table has
    /// completed.  Callers must not hold the registry lock.
    pub(crate) fn quiesce(&self) {
        let mut guard = self.drain.lock().unwrap();
        while self.pending.load(Ordering::Acquire) != 0 {
            guard = self.drained.wait(guard).unwrap();
        }
    }
}

impl fmt::Debug for MappingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingTable")
            .field("num_targets", &self.targets.len())
            .field("depth", &self.counts.len())
            .field("size", &self.size())
            .field("pending", &self.pending())
            .finish()
    }
}

// LCOV_EXCL_STOP
