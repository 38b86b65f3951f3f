//! Ownership plumbing shared by `MapProxy` and `SetProxy`.

use crate::descriptor::{check_shape, DescriptorRef};
use crate::error::Error;
use crate::sparse_table::SparseHashTable;
use crate::tracer::{trace_table, ReferenceCollector, TraceReferences, TraceReport};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

/// A table owned by the host object model and shared with the proxies that
/// expose it. Proxies hold only a weak reference, so dropping the last
/// `HostBuffer` clone frees the table and later proxy operations fail with
/// `InvalidHandle`. While the host holds a guard from `borrow`/`borrow_mut`,
/// conflicting proxy operations fail with `BufferBusy`.
#[derive(Clone, Debug)]
pub struct HostBuffer(Rc<RefCell<SparseHashTable>>);

impl HostBuffer {
    pub fn new(table: SparseHashTable) -> Self {
        Self(Rc::new(RefCell::new(table)))
    }

    pub fn borrow(&self) -> Ref<'_, SparseHashTable> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, SparseHashTable> {
        self.0.borrow_mut()
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<SparseHashTable>> {
        Rc::downgrade(&self.0)
    }
}

/// The host traces its own buffers; proxies viewing them never do.
impl TraceReferences for HostBuffer {
    fn trace_references(&mut self, collector: &mut dyn ReferenceCollector) -> TraceReport {
        match self.0.try_borrow_mut() {
            Ok(mut table) => table.trace_references(collector),
            Err(_) => {
                log::warn!("host buffer borrowed during trace; skipped");
                TraceReport::default()
            }
        }
    }
}

/// Where a proxy's descriptors came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorSource {
    /// Built from type tags for this proxy alone.
    Synthesized,
    /// Shared with the host schema that declared the container.
    Schema,
}

/// A proxy's records: either its own table or a view onto a host buffer.
#[derive(Debug)]
pub(crate) enum Backing {
    Owned(SparseHashTable),
    Borrowed(Weak<RefCell<SparseHashTable>>),
}

impl Backing {
    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Backing::Owned(_))
    }

    pub(crate) fn with_table<R>(&self, f: impl FnOnce(&SparseHashTable) -> R) -> Result<R, Error> {
        match self {
            Backing::Owned(table) => Ok(f(table)),
            Backing::Borrowed(weak) => {
                let shared = weak.upgrade().ok_or(Error::InvalidHandle)?;
                let table = shared.try_borrow().map_err(|_| Error::BufferBusy)?;
                Ok(f(&table))
            }
        }
    }

    pub(crate) fn with_table_mut<R>(
        &mut self,
        f: impl FnOnce(&mut SparseHashTable) -> R,
    ) -> Result<R, Error> {
        match self {
            Backing::Owned(table) => Ok(f(table)),
            Backing::Borrowed(weak) => {
                let shared = weak.upgrade().ok_or(Error::InvalidHandle)?;
                let mut table = shared.try_borrow_mut().map_err(|_| Error::BufferBusy)?;
                Ok(f(&mut table))
            }
        }
    }

    /// Report the descriptors' own references, then trace owned records.
    /// Borrowed records are traced by their host.
    pub(crate) fn trace(
        &mut self,
        descriptors: &[&DescriptorRef],
        collector: &mut dyn ReferenceCollector,
    ) -> TraceReport {
        for descriptor in descriptors {
            descriptor.add_referenced_objects(collector);
        }
        match self {
            Backing::Owned(table) => {
                log::trace!("tracing {} records", table.len());
                trace_table(table, collector)
            }
            Backing::Borrowed(_) => TraceReport::default(),
        }
    }
}

/// Attach to a host buffer after checking that the proxy's descriptors
/// describe the buffer's records.
pub(crate) fn attach_checked(
    buffer: &HostBuffer,
    key: &DescriptorRef,
    value: Option<&DescriptorRef>,
) -> Result<Backing, Error> {
    {
        let table = buffer.borrow();
        check_shape(&**table.key_descriptor(), &**key)?;
        match (table.value_descriptor(), value) {
            (Some(theirs), Some(ours)) => check_shape(&**theirs, &**ours)?,
            (None, None) => {}
            (Some(_), None) => return Err(Error::mismatch("set", "map")),
            (None, Some(_)) => return Err(Error::mismatch("map", "set")),
        }
    }
    Ok(Backing::Borrowed(buffer.downgrade()))
}
