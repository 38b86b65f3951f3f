//! Garbage-collector integration: revalidate collectible references held in
//! container records and evict records whose referent died.

use crate::sparse_table::SparseHashTable;
use crate::ObjectId;
use core::ops::AddAssign;

/// The host collector's view of one collection cycle.
pub trait ReferenceCollector {
    /// Report a reference held by a container. Returns `false` when the
    /// object is dead (collected or pending kill); the holder must then
    /// clear its reference.
    fn add_referenced_object(&mut self, object: ObjectId) -> bool;
}

/// Outcome of tracing one or more containers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceReport {
    /// Valid records inspected.
    pub visited: usize,
    /// Records evicted because a reference in them was cleared.
    pub removed: usize,
}

impl AddAssign for TraceReport {
    fn add_assign(&mut self, rhs: Self) {
        self.visited += rhs.visited;
        self.removed += rhs.removed;
    }
}

/// Implemented by everything the host collector traces once per cycle.
pub trait TraceReferences {
    fn trace_references(&mut self, collector: &mut dyn ReferenceCollector) -> TraceReport;
}

/// Runs one collection cycle's trace over any number of containers and
/// accumulates their reports.
pub struct ReferenceTracer<'c> {
    collector: &'c mut dyn ReferenceCollector,
    report: TraceReport,
}

impl<'c> ReferenceTracer<'c> {
    pub fn new(collector: &'c mut dyn ReferenceCollector) -> Self {
        Self {
            collector,
            report: TraceReport::default(),
        }
    }

    pub fn trace(&mut self, target: &mut dyn TraceReferences) -> TraceReport {
        let report = target.trace_references(self.collector);
        self.report += report;
        report
    }

    pub fn report(&self) -> TraceReport {
        self.report
    }
}

/// Trace every valid record of an owned table, highest index first.
///
/// A record is evicted when its key or its value reports a cleared
/// reference. Evictions only tombstone in place; the bucket index is
/// rebuilt once at the end.
pub(crate) fn trace_table(
    table: &mut SparseHashTable,
    collector: &mut dyn ReferenceCollector,
) -> TraceReport {
    let mut report = TraceReport::default();
    if table.is_empty() || !table.has_collectible_references() {
        return report;
    }
    for index in (0..table.max_index()).rev() {
        if !table.is_valid_index(index) {
            continue;
        }
        report.visited += 1;
        if table.trace_record(index, collector) {
            table.tombstone_unlinked(index);
            report.removed += 1;
        }
    }
    if report.removed > 0 {
        table.rehash();
        log::debug!(
            "trace evicted {} of {} records with dead references",
            report.removed,
            report.visited
        );
    }
    report
}
