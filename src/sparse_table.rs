//! SparseHashTable: index-addressable, type-erased hash table.
//!
//! Records live in a fixed-stride `RecordBuffer` addressed by index
//! `0..max_index()`. Each index is either valid or a tombstone; tombstones
//! are reused LIFO before the buffer is extended, so indices of live
//! records never move. A `hashbrown::HashTable<usize>` maps stored hashes
//! to indices. Every element operation goes through the key (and, for
//! maps, value) `TypeDescriptor`.

use crate::descriptor::{check_shape, DescriptorRef, TypeDescriptor, Value};
use crate::element_box::ElementBox;
use crate::error::Error;
use crate::record::{RecordBuffer, RecordLayout, ValidBits};
use crate::reentrancy::CallbackGuard;
use crate::tracer::{trace_table, ReferenceCollector, TraceReferences, TraceReport};
use hashbrown::HashTable;

/// Smallest non-empty bucket count.
pub const MIN_BUCKETS: usize = 8;
/// The bucket count doubles once `len > buckets * MAX_LOAD_NUM / MAX_LOAD_DEN`.
pub const MAX_LOAD_NUM: usize = 3;
pub const MAX_LOAD_DEN: usize = 4;

/// Who is responsible for destroying the elements stored in a table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElementOwnership {
    /// The table destroys records on removal, clear and drop.
    Owned,
    /// The records live in host-managed memory; the host's own destruction
    /// path releases them, so the table never calls `destroy`.
    HostManaged,
}

fn buckets_for(len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let mut buckets = MIN_BUCKETS;
    while len * MAX_LOAD_DEN > buckets * MAX_LOAD_NUM {
        buckets *= 2;
    }
    buckets
}

pub struct SparseHashTable {
    key: DescriptorRef,
    value: Option<DescriptorRef>,
    layout: RecordLayout,
    records: RecordBuffer,
    valid: ValidBits,
    // Stored hash per index; meaningless for tombstones. Its length is
    // the table's max index.
    hashes: Vec<u64>,
    free: Vec<usize>,
    len: usize,
    index: HashTable<usize>,
    bucket_count: usize,
    ownership: ElementOwnership,
    guard: CallbackGuard,
}

impl SparseHashTable {
    /// Empty table of single elements.
    pub fn new_set(element: DescriptorRef) -> Self {
        let layout = RecordLayout::for_element(element.layout());
        Self::from_parts(element, None, layout)
    }

    /// Empty table of key/value pairs.
    pub fn new_map(key: DescriptorRef, value: DescriptorRef) -> Self {
        let layout = RecordLayout::for_pair(key.layout(), value.layout());
        Self::from_parts(key, Some(value), layout)
    }

    fn from_parts(key: DescriptorRef, value: Option<DescriptorRef>, layout: RecordLayout) -> Self {
        Self {
            records: RecordBuffer::new(&layout),
            key,
            value,
            layout,
            valid: ValidBits::default(),
            hashes: Vec::new(),
            free: Vec::new(),
            len: 0,
            index: HashTable::new(),
            bucket_count: 0,
            ownership: ElementOwnership::Owned,
            guard: CallbackGuard::new(),
        }
    }

    /// Pre-reserve room for `capacity` records without growing.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.reserve(capacity);
        self
    }

    /// Set who destroys elements. Only meaningful before records exist.
    pub fn with_ownership(mut self, ownership: ElementOwnership) -> Self {
        debug_assert!(self.is_empty(), "ownership must be chosen up front");
        self.ownership = ownership;
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the highest index ever handed out since the last clear.
    pub fn max_index(&self) -> usize {
        self.hashes.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn ownership(&self) -> ElementOwnership {
        self.ownership
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn key_descriptor(&self) -> &DescriptorRef {
        &self.key
    }

    /// `None` for sets.
    pub fn value_descriptor(&self) -> Option<&DescriptorRef> {
        self.value.as_ref()
    }

    pub fn is_map(&self) -> bool {
        self.value.is_some()
    }

    pub(crate) fn has_collectible_references(&self) -> bool {
        self.key.is_collectible_reference()
            || self.value.as_ref().is_some_and(|v| v.is_collectible_reference())
    }

    fn needs_destroy(&self) -> bool {
        self.key.needs_destroy() || self.value.as_ref().is_some_and(|v| v.needs_destroy())
    }

    #[inline]
    pub fn is_valid_index(&self, index: usize) -> bool {
        index < self.max_index() && self.valid.get(index)
    }

    /// Valid indices, ascending.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.valid.iter_ones(self.max_index())
    }

    #[inline]
    fn key_ptr(&self, index: usize) -> *mut u8 {
        self.records.record_ptr(index)
    }

    #[inline]
    fn value_ptr(&self, index: usize) -> *mut u8 {
        self.records
            .record_ptr(index)
            .wrapping_add(self.layout.value_offset())
    }

    /// Key (or set element) at `index`, read as a scripting value.
    pub fn key_at(&self, index: usize) -> Option<Value> {
        if !self.is_valid_index(index) {
            return None;
        }
        // SAFETY: valid records hold a live key.
        Some(unsafe { self.key.read_value(self.key_ptr(index)) })
    }

    /// Value at `index`; `None` for tombstones and for sets.
    pub fn value_at(&self, index: usize) -> Option<Value> {
        let value = self.value.as_ref()?;
        if !self.is_valid_index(index) {
            return None;
        }
        // SAFETY: valid map records hold a live value.
        Some(unsafe { value.read_value(self.value_ptr(index)) })
    }

    /// Typed view of the key at `index`.
    ///
    /// # Safety
    /// The key descriptor must store exactly `T`.
    pub(crate) unsafe fn key_ref<T>(&self, index: usize) -> &T {
        debug_assert!(self.is_valid_index(index));
        // SAFETY: upheld by the caller.
        unsafe { &*self.key_ptr(index).cast::<T>() }
    }

    /// Typed view of the value at `index`.
    ///
    /// # Safety
    /// The table must be a map whose value descriptor stores exactly `T`.
    pub(crate) unsafe fn value_ref<T>(&self, index: usize) -> &T {
        debug_assert!(self.is_valid_index(index) && self.is_map());
        // SAFETY: upheld by the caller.
        unsafe { &*self.value_ptr(index).cast::<T>() }
    }

    fn assert_key_shape(&self, key: &ElementBox) {
        assert!(
            check_shape(&*self.key, &**key.descriptor()).is_ok(),
            "element of type {} does not fit a table keyed by {}",
            key.descriptor().type_name(),
            self.key.type_name()
        );
    }

    /// Index of the record whose key equals `key`.
    pub fn find(&self, key: &ElementBox) -> Option<usize> {
        self.assert_key_shape(key);
        let _g = self.guard.enter("find");
        // SAFETY: `key` has the key descriptor's shape.
        unsafe {
            let hash = self.key.hash(key.as_ptr());
            self.find_hashed(hash, key.as_ptr())
        }
    }

    /// # Safety
    /// `key` points at a live element of the key descriptor's shape.
    unsafe fn find_hashed(&self, hash: u64, key: *const u8) -> Option<usize> {
        self.index
            .find(hash, |&i| {
                // Stale entries may point at tombstones until the next rehash.
                self.valid.get(i)
                    && self.hashes[i] == hash
                    // SAFETY: `i` is valid, so its key is live.
                    && unsafe { self.key.equals(self.key_ptr(i), key) }
            })
            .copied()
    }

    /// Insert or overwrite a pair; returns its index. An existing key keeps
    /// its index and gets `value` copy-assigned over the old value.
    pub fn add_pair(&mut self, key: &ElementBox, value: &ElementBox) -> usize {
        self.assert_key_shape(key);
        let value_descriptor = match &self.value {
            Some(v) => v.clone(),
            None => panic!("add_pair on a set table"),
        };
        assert!(
            check_shape(&*value_descriptor, &**value.descriptor()).is_ok(),
            "value of type {} does not fit a table of {} values",
            value.descriptor().type_name(),
            value_descriptor.type_name()
        );
        // SAFETY: both elements were shape-checked against our descriptors.
        unsafe { self.add_pair_raw(key.as_ptr(), value.as_ptr()) }
    }

    /// # Safety
    /// `key` and `value` point at live elements of this map's key and value
    /// shapes, outside this table's buffer.
    pub(crate) unsafe fn add_pair_raw(&mut self, key: *const u8, value: *const u8) -> usize {
        let value_descriptor = self.value.clone().expect("add_pair on a set table");
        let _g = self.guard.enter("add_pair");
        // SAFETY: upheld by the caller.
        unsafe {
            let hash = self.key.hash(key);
            if let Some(index) = self.find_hashed(hash, key) {
                value_descriptor.copy_assign(self.value_ptr(index), value);
                return index;
            }
            let index = self.allocate_index();
            self.key.copy_construct(self.key_ptr(index), key);
            value_descriptor.copy_construct(self.value_ptr(index), value);
            self.commit_insert(index, hash);
            index
        }
    }

    /// Insert an element unless an equal one exists. Returns the index of
    /// the stored element and whether it was inserted.
    pub fn add_element(&mut self, element: &ElementBox) -> (usize, bool) {
        self.assert_key_shape(element);
        assert!(!self.is_map(), "add_element on a map table");
        // SAFETY: shape-checked above.
        unsafe { self.add_element_raw(element.as_ptr()) }
    }

    /// # Safety
    /// `element` points at a live element of this set's shape, outside this
    /// table's buffer.
    pub(crate) unsafe fn add_element_raw(&mut self, element: *const u8) -> (usize, bool) {
        let _g = self.guard.enter("add_element");
        // SAFETY: upheld by the caller.
        unsafe {
            let hash = self.key.hash(element);
            if let Some(index) = self.find_hashed(hash, element) {
                return (index, false);
            }
            let index = self.allocate_index();
            self.key.copy_construct(self.key_ptr(index), element);
            self.commit_insert(index, hash);
            (index, true)
        }
    }

    /// Reuse the most recent tombstone, or append a slot.
    fn allocate_index(&mut self) -> usize {
        if let Some(index) = self.free.pop() {
            return index;
        }
        let index = self.hashes.len();
        self.records.reserve(index + 1, index);
        self.hashes.push(0);
        index
    }

    fn commit_insert(&mut self, index: usize, hash: u64) {
        self.hashes[index] = hash;
        self.valid.set(index, true);
        self.len += 1;
        if self.len * MAX_LOAD_DEN > self.bucket_count * MAX_LOAD_NUM {
            self.bucket_count = buckets_for(self.len);
            log::trace!("growing bucket index to {} buckets", self.bucket_count);
            self.rebuild_index();
        } else {
            let hashes = &self.hashes;
            self.index.insert_unique(hash, index, |&i| hashes[i]);
        }
    }

    /// Remove `count` valid records, starting at `index` and skipping
    /// tombstones. `index` must be valid.
    pub fn remove_at(&mut self, index: usize, count: usize) {
        assert!(
            self.is_valid_index(index),
            "remove_at: index {index} is not a valid record"
        );
        let mut index = index;
        let mut remaining = count;
        while remaining > 0 {
            assert!(
                index < self.max_index(),
                "remove_at: fewer than {count} valid records from the start index"
            );
            if self.valid.get(index) {
                self.unlink(index);
                self.release(index);
                remaining -= 1;
            }
            index += 1;
        }
    }

    fn unlink(&mut self, index: usize) {
        let hash = self.hashes[index];
        if let Ok(entry) = self.index.find_entry(hash, |&i| i == index) {
            entry.remove();
        }
    }

    /// Tombstone a record without touching the bucket index. Callers must
    /// `rehash` before the next insertion.
    pub(crate) fn tombstone_unlinked(&mut self, index: usize) {
        debug_assert!(self.is_valid_index(index));
        self.release(index);
    }

    /// Tombstone first, then destroy: a panicking destructor can leak the
    /// record but never leaves a destroyed record marked valid.
    fn release(&mut self, index: usize) {
        self.valid.set(index, false);
        self.free.push(index);
        self.len -= 1;
        if self.ownership == ElementOwnership::Owned {
            let _g = self.guard.enter("destroy");
            // SAFETY: the record was valid and is now unreachable.
            unsafe { self.destroy_record(index) };
        }
    }

    /// # Safety
    /// The record at `index` is live and is not used again.
    unsafe fn destroy_record(&self, index: usize) {
        // SAFETY: upheld by the caller.
        unsafe {
            if self.key.needs_destroy() {
                self.key.destroy(self.key_ptr(index));
            }
            if let Some(value) = self.value.as_ref().filter(|v| v.needs_destroy()) {
                value.destroy(self.value_ptr(index));
            }
        }
    }

    /// Recompute every valid record's hash through the key descriptor and
    /// rebuild the bucket index sized for the current count.
    pub fn rehash(&mut self) {
        {
            let _g = self.guard.enter("rehash");
            for index in 0..self.max_index() {
                if self.valid.get(index) {
                    // SAFETY: valid records hold a live key.
                    self.hashes[index] = unsafe { self.key.hash(self.key_ptr(index)) };
                }
            }
        }
        self.bucket_count = buckets_for(self.len);
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        let mut index = HashTable::with_capacity(self.bucket_count);
        let hashes = &self.hashes;
        for i in self.valid.iter_ones(hashes.len()) {
            index.insert_unique(hashes[i], i, |&j| hashes[j]);
        }
        self.index = index;
    }

    fn reserve(&mut self, additional: usize) {
        let used = self.max_index();
        self.records.reserve(used + additional, used);
        self.hashes.reserve(additional);
        let wanted = buckets_for(self.len + additional);
        if wanted > self.bucket_count {
            self.bucket_count = wanted;
            self.rebuild_index();
        }
    }

    /// Destroy every record (per ownership) and forget all indices, then
    /// pre-reserve room for `reserve_hint` records.
    pub fn clear(&mut self, reserve_hint: usize) {
        if self.ownership == ElementOwnership::Owned && self.needs_destroy() {
            let _g = self.guard.enter("clear");
            for index in self.valid.iter_ones(self.max_index()) {
                // SAFETY: each valid record is destroyed once; the bookkeeping
                // below forgets all of them.
                unsafe { self.destroy_record(index) };
            }
        }
        self.valid.clear();
        self.hashes.clear();
        self.free.clear();
        self.len = 0;
        self.index.clear();
        self.bucket_count = 0;
        if reserve_hint > 0 {
            self.reserve(reserve_hint);
        }
    }

    /// Replace this table's records with deep copies of `source`'s. The
    /// source's ownership mode does not matter; its shapes must match ours.
    pub fn copy_records_from(&mut self, source: &SparseHashTable) -> Result<(), Error> {
        check_shape(&*self.key, &*source.key)?;
        match (&self.value, &source.value) {
            (Some(ours), Some(theirs)) => check_shape(&**ours, &**theirs)?,
            (None, None) => {}
            (Some(_), None) => return Err(Error::mismatch("map", "set")),
            (None, Some(_)) => return Err(Error::mismatch("set", "map")),
        }
        self.clear(source.len());
        for index in source.indices() {
            // SAFETY: shapes match and the records live in another buffer.
            unsafe {
                if self.is_map() {
                    self.add_pair_raw(source.key_ptr(index), source.value_ptr(index));
                } else {
                    self.add_element_raw(source.key_ptr(index));
                }
            }
        }
        Ok(())
    }

    /// Trace the key and value of one valid record. Returns whether either
    /// reported a cleared reference.
    pub(crate) fn trace_record(
        &mut self,
        index: usize,
        collector: &mut dyn ReferenceCollector,
    ) -> bool {
        debug_assert!(self.is_valid_index(index));
        let _g = self.guard.enter("trace");
        let key_cleared = self.key.is_collectible_reference()
            // SAFETY: valid records hold a live key; `&mut self` is exclusive.
            && unsafe { self.key.trace_and_maybe_clear(self.key_ptr(index), collector) };
        let value_cleared = match &self.value {
            Some(value) if value.is_collectible_reference() => {
                // SAFETY: as above, for the value.
                unsafe { value.trace_and_maybe_clear(self.value_ptr(index), collector) }
            }
            _ => false,
        };
        key_cleared || value_cleared
    }
}

impl Drop for SparseHashTable {
    fn drop(&mut self) {
        if self.ownership == ElementOwnership::Owned && self.needs_destroy() {
            let _g = self.guard.enter("drop");
            for index in self.valid.iter_ones(self.max_index()) {
                // SAFETY: every valid record is destroyed once, and the
                // table is going away.
                unsafe { self.destroy_record(index) };
            }
        }
    }
}

/// Reports the descriptors' own references, then evicts every record whose
/// key or value reference was cleared and rebuilds the bucket index.
impl TraceReferences for SparseHashTable {
    fn trace_references(&mut self, collector: &mut dyn ReferenceCollector) -> TraceReport {
        self.key.add_referenced_objects(collector);
        if let Some(value) = &self.value {
            value.add_referenced_objects(collector);
        }
        trace_table(self, collector)
    }
}

impl core::fmt::Debug for SparseHashTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SparseHashTable")
            .field("key", &self.key.type_name())
            .field("value", &self.value.as_ref().map(|v| v.type_name()))
            .field("len", &self.len)
            .field("max_index", &self.max_index())
            .field("bucket_count", &self.bucket_count)
            .field("ownership", &self.ownership)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::TypedDescriptor;
    use crate::descriptor::ObjectId;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::hash::BuildHasher;
    use std::rc::Rc;

    fn int_string_map() -> SparseHashTable {
        SparseHashTable::new_map(TypedDescriptor::<i32>::shared(), TypedDescriptor::<String>::shared())
    }

    fn k(t: &SparseHashTable, v: i64) -> ElementBox {
        ElementBox::from_value(t.key_descriptor().clone(), &Value::Int(v)).unwrap()
    }

    fn s(t: &SparseHashTable, v: &str) -> ElementBox {
        let d = t.value_descriptor().unwrap().clone();
        ElementBox::from_value(d, &Value::Str(v.into())).unwrap()
    }

    /// Invariant: filtering `0..max_index` by validity yields exactly `len`
    /// indices.
    fn assert_consistent(t: &SparseHashTable) {
        assert!(t.len() <= t.max_index());
        assert_eq!(t.indices().count(), t.len());
    }

    /// Invariant: a duplicate key overwrites the value in place and keeps
    /// the record count and index.
    #[test]
    fn duplicate_key_overwrites_value() {
        let mut t = int_string_map();
        let i1 = t.add_pair(&k(&t, 1), &s(&t, "a"));
        let i2 = t.add_pair(&k(&t, 1), &s(&t, "c"));
        assert_eq!(i1, i2);
        assert_eq!(t.len(), 1);
        assert_eq!(t.value_at(i1), Some(Value::Str("c".into())));
        assert_consistent(&t);
    }

    /// Invariant: removed indices become tombstones and are reused before
    /// the buffer grows; live indices never move.
    #[test]
    fn tombstones_are_reused_lifo() {
        let mut t = int_string_map();
        for i in 0..4 {
            t.add_pair(&k(&t, i), &s(&t, "x"));
        }
        let i1 = t.find(&k(&t, 1)).unwrap();
        let i3 = t.find(&k(&t, 3)).unwrap();
        t.remove_at(i1, 1);
        t.remove_at(i3, 1);
        assert!(!t.is_valid_index(i1));
        assert_eq!(t.max_index(), 4);
        assert_consistent(&t);

        let reused = t.add_pair(&k(&t, 10), &s(&t, "y"));
        assert_eq!(reused, i3, "most recent tombstone is reused first");
        let reused = t.add_pair(&k(&t, 11), &s(&t, "z"));
        assert_eq!(reused, i1);
        assert_eq!(t.max_index(), 4);
        assert_eq!(t.find(&k(&t, 0)), Some(0));
        assert_consistent(&t);
    }

    /// Invariant: `remove_at(index, count)` skips tombstones while counting.
    #[test]
    fn remove_at_range_skips_tombstones() {
        let mut t = int_string_map();
        for i in 0..5 {
            t.add_pair(&k(&t, i), &s(&t, "v"));
        }
        t.remove_at(1, 1);
        t.remove_at(0, 2);
        let left: BTreeSet<_> = t.indices().collect();
        assert_eq!(left, [3, 4].into_iter().collect());
        assert!(t.find(&k(&t, 2)).is_none());
        assert_consistent(&t);
    }

    #[test]
    #[should_panic(expected = "is not a valid record")]
    fn remove_at_tombstone_is_fatal() {
        let mut t = int_string_map();
        t.add_pair(&k(&t, 1), &s(&t, "v"));
        t.remove_at(0, 1);
        t.remove_at(0, 1);
    }

    #[test]
    #[should_panic(expected = "fewer than 3 valid records")]
    fn remove_at_past_max_index_is_fatal() {
        let mut t = int_string_map();
        t.add_pair(&k(&t, 1), &s(&t, "v"));
        t.add_pair(&k(&t, 2), &s(&t, "v"));
        t.remove_at(0, 3);
    }

    /// Invariant: the bucket count doubles as the load threshold is crossed
    /// and lookups keep working across growth.
    #[test]
    fn buckets_double_past_load_factor() {
        let mut t = SparseHashTable::new_set(TypedDescriptor::<i64>::shared());
        assert_eq!(t.bucket_count(), 0);
        let d = t.key_descriptor().clone();
        let e = |v: i64| ElementBox::from_value(d.clone(), &Value::Int(v)).unwrap();
        t.add_element(&e(0));
        assert_eq!(t.bucket_count(), MIN_BUCKETS);
        for v in 1..6 {
            t.add_element(&e(v));
        }
        assert_eq!(t.bucket_count(), 8, "6 of 8 buckets is at the threshold");
        t.add_element(&e(6));
        assert_eq!(t.bucket_count(), 16);
        for v in 7..100 {
            t.add_element(&e(v));
        }
        assert!(t.len() * MAX_LOAD_DEN <= t.bucket_count() * MAX_LOAD_NUM);
        for v in 0..100 {
            assert!(t.find(&e(v)).is_some(), "lost {v} across growth");
        }
    }

    /// Invariant: `clear` empties the table, resets indices and honors the
    /// reserve hint.
    #[test]
    fn clear_resets_and_reserves() {
        let mut t = int_string_map();
        for i in 0..10 {
            t.add_pair(&k(&t, i), &s(&t, "v"));
        }
        t.clear(64);
        assert!(t.is_empty());
        assert_eq!(t.max_index(), 0);
        assert!(t.bucket_count() >= buckets_for(64));
        assert!(t.find(&k(&t, 3)).is_none());
        assert_eq!(t.add_pair(&k(&t, 3), &s(&t, "w")), 0);
        assert_consistent(&t);
    }

    struct DropCounter(Rc<Cell<usize>>);

    /// Element that counts destructions through a shared counter.
    #[derive(Clone, Default)]
    struct Counted(Option<Rc<Cell<usize>>>, i64);

    impl Drop for Counted {
        fn drop(&mut self) {
            if let Some(c) = &self.0 {
                c.set(c.get() + 1);
            }
        }
    }

    impl crate::builtin::Element for Counted {
        const TAG: crate::descriptor::TypeTag = crate::descriptor::TypeTag::Int64;
        fn element_eq(&self, other: &Self) -> bool {
            self.1 == other.1
        }
        fn element_hash<H: std::hash::Hasher>(&self, state: &mut H) {
            std::hash::Hash::hash(&self.1, state)
        }
        fn to_value(&self) -> Value {
            Value::Int(self.1)
        }
        fn from_value(_value: &Value) -> Result<Self, Error> {
            Err(Error::mismatch("counted", "value"))
        }
    }

    fn counted_table(ownership: ElementOwnership, drops: &DropCounter) -> SparseHashTable {
        let d: DescriptorRef = Rc::new(TypedDescriptor::<Counted>::new());
        let mut t = SparseHashTable::new_set(d.clone()).with_ownership(ownership);
        for v in 0..3 {
            let e = ElementBox::from_element(d.clone(), Counted(Some(drops.0.clone()), v)).unwrap();
            t.add_element(&e);
        }
        t
    }

    /// Invariant: owned tables destroy exactly the removed/cleared/dropped
    /// records, each once.
    #[test]
    fn owned_tables_destroy_each_record_once() {
        let drops = DropCounter(Rc::new(Cell::new(0)));
        let mut t = counted_table(ElementOwnership::Owned, &drops);
        // Three staging boxes were dropped after insertion.
        assert_eq!(drops.0.get(), 3);
        t.remove_at(1, 1);
        assert_eq!(drops.0.get(), 4);
        t.clear(0);
        assert_eq!(drops.0.get(), 6);
        let t = counted_table(ElementOwnership::Owned, &drops);
        drop(t);
        assert_eq!(drops.0.get(), 12);
    }

    /// Invariant: host-managed tables never destroy records.
    #[test]
    fn host_managed_tables_skip_destruction() {
        let drops = DropCounter(Rc::new(Cell::new(0)));
        let mut t = counted_table(ElementOwnership::HostManaged, &drops);
        assert_eq!(drops.0.get(), 3);
        t.remove_at(0, 1);
        t.clear(0);
        drop(t);
        assert_eq!(drops.0.get(), 3);
    }

    /// Invariant: deep copy yields equal content in an independent buffer
    /// and rejects mismatched shapes.
    #[test]
    fn copy_records_from_is_independent() {
        let mut src = int_string_map();
        for i in 0..5 {
            src.add_pair(&k(&src, i), &s(&src, &format!("v{i}")));
        }
        src.remove_at(2, 1);
        let mut dst = int_string_map();
        dst.copy_records_from(&src).unwrap();
        assert_eq!(dst.len(), 4);
        let i4 = dst.find(&k(&dst, 4)).unwrap();
        assert_eq!(dst.value_at(i4), Some(Value::Str("v4".into())));
        dst.add_pair(&k(&dst, 4), &s(&dst, "changed"));
        let j4 = src.find(&k(&src, 4)).unwrap();
        assert_eq!(src.value_at(j4), Some(Value::Str("v4".into())));

        let mut set = SparseHashTable::new_set(TypedDescriptor::<i32>::shared());
        assert_eq!(set.copy_records_from(&src), Err(Error::mismatch("set", "map")));
        let mut other = SparseHashTable::new_map(
            TypedDescriptor::<i64>::shared(),
            TypedDescriptor::<String>::shared(),
        );
        assert!(other.copy_records_from(&src).is_err());
    }

    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl std::hash::Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        // Every key lands in the same bucket.
        fn finish(&self) -> u64 {
            0
        }
    }

    /// Invariant: lookups resolve collisions through descriptor equality.
    #[test]
    fn collisions_resolve_through_equals() {
        let d: DescriptorRef = Rc::new(TypedDescriptor::<String, _>::with_hasher(ConstBuildHasher));
        let mut t = SparseHashTable::new_set(d.clone());
        let e = |v: &str| ElementBox::from_value(d.clone(), &Value::Str(v.into())).unwrap();
        for v in ["a", "b", "c", "a"] {
            t.add_element(&e(v));
        }
        assert_eq!(t.len(), 3);
        let ia = t.find(&e("a")).unwrap();
        let ib = t.find(&e("b")).unwrap();
        assert_ne!(ia, ib);
        assert_eq!(t.key_at(ib), Some(Value::Str("b".into())));
        t.remove_at(ia, 1);
        assert!(t.find(&e("a")).is_none());
        assert!(t.find(&e("c")).is_some());
    }

    /// Invariant: after deferred tombstoning and a rehash, the index only
    /// resolves live records.
    #[test]
    fn rehash_after_deferred_removal() {
        let d: DescriptorRef = Rc::new(TypedDescriptor::<Option<ObjectId>>::new());
        let mut t = SparseHashTable::new_set(d.clone());
        let e = |v: u64| ElementBox::from_value(d.clone(), &Value::Object(ObjectId(v))).unwrap();
        for v in 0..20 {
            t.add_element(&e(v));
        }
        for v in (0..20).step_by(2) {
            let i = t.find(&e(v)).unwrap();
            t.tombstone_unlinked(i);
        }
        t.rehash();
        assert_eq!(t.len(), 10);
        assert_eq!(t.bucket_count(), buckets_for(10));
        for v in 0..20 {
            assert_eq!(t.find(&e(v)).is_some(), v % 2 == 1);
        }
        assert_consistent(&t);
    }

    #[test]
    #[should_panic(expected = "does not fit a table keyed by int")]
    fn foreign_key_shape_is_fatal() {
        let t = int_string_map();
        let wrong = ElementBox::new_default(TypedDescriptor::<String>::shared());
        let _ = t.find(&wrong);
    }
}
