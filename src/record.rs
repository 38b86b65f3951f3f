//! Fixed-stride record storage backing `SparseHashTable`.

use core::alloc::Layout;
use core::ptr::{self, NonNull};
use std::alloc;

/// Byte layout of one record: `[key][pad][value][pad]`, or `[element][pad]`
/// for sets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    key: Layout,
    value: Option<Layout>,
    value_offset: usize,
    stride: usize,
    align: usize,
}

impl RecordLayout {
    pub fn for_element(element: Layout) -> Self {
        let record = element.pad_to_align();
        Self {
            key: element,
            value: None,
            value_offset: record.size(),
            stride: record.size(),
            align: record.align(),
        }
    }

    pub fn for_pair(key: Layout, value: Layout) -> Self {
        let (pair, value_offset) = key
            .extend(value)
            .expect("record layout exceeds the address space");
        let record = pair.pad_to_align();
        Self {
            key,
            value: Some(value),
            value_offset,
            stride: record.size(),
            align: record.align(),
        }
    }

    pub fn key(&self) -> Layout {
        self.key
    }

    pub fn value(&self) -> Option<Layout> {
        self.value
    }

    /// Offset of the value within a record. Equals the stride for sets.
    pub fn value_offset(&self) -> usize {
        self.value_offset
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn align(&self) -> usize {
        self.align
    }
}

/// Aligned, well-formed dangling pointer for zero-sized storage.
pub(crate) fn dangling(align: usize) -> NonNull<u8> {
    debug_assert!(align.is_power_of_two());
    // SAFETY: alignments are never zero.
    unsafe { NonNull::new_unchecked(align as *mut u8) }
}

/// Untyped array of records. Knows nothing about which records are live;
/// the owning table constructs and destroys them.
pub(crate) struct RecordBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    stride: usize,
    align: usize,
}

impl RecordBuffer {
    pub(crate) fn new(layout: &RecordLayout) -> Self {
        Self {
            ptr: dangling(layout.align()),
            capacity: if layout.stride() == 0 { usize::MAX } else { 0 },
            stride: layout.stride(),
            align: layout.align(),
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn array_layout(&self, capacity: usize) -> Layout {
        let size = self
            .stride
            .checked_mul(capacity)
            .expect("record buffer capacity overflow");
        Layout::from_size_align(size, self.align).expect("record buffer capacity overflow")
    }

    /// Grow to hold at least `min_capacity` records, moving the first
    /// `used` records (bitwise) into the new allocation.
    pub(crate) fn reserve(&mut self, min_capacity: usize, used: usize) {
        if min_capacity <= self.capacity {
            return;
        }
        debug_assert!(used <= self.capacity);
        let new_capacity = min_capacity.max(self.capacity.saturating_mul(2)).max(4);
        let new_layout = self.array_layout(new_capacity);
        // SAFETY: stride is non-zero here (zero-stride buffers start at
        // usize::MAX capacity), so the layout has a non-zero size.
        let raw = unsafe { alloc::alloc(new_layout) };
        let new_ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(new_layout));
        if self.capacity > 0 {
            // SAFETY: both allocations hold at least `used` records and do
            // not overlap; the old one was allocated with `array_layout`.
            unsafe {
                ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), used * self.stride);
                alloc::dealloc(self.ptr.as_ptr(), self.array_layout(self.capacity));
            }
        }
        self.ptr = new_ptr;
        self.capacity = new_capacity;
    }

    /// Address of record `index`. Dereferencing is up to the caller.
    #[inline]
    pub(crate) fn record_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        self.ptr.as_ptr().wrapping_add(index * self.stride)
    }
}

impl Drop for RecordBuffer {
    fn drop(&mut self) {
        if self.stride != 0 && self.capacity != 0 {
            // SAFETY: allocated in `reserve` with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), self.array_layout(self.capacity)) }
        }
    }
}

/// One validity bit per record index.
#[derive(Clone, Debug, Default)]
pub(crate) struct ValidBits {
    words: Vec<u64>,
}

impl ValidBits {
    #[inline]
    pub(crate) fn get(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1 << (index % 64)) != 0)
    }

    pub(crate) fn set(&mut self, index: usize, valid: bool) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let bit = 1u64 << (index % 64);
        if valid {
            self.words[word] |= bit;
        } else {
            self.words[word] &= !bit;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.words.clear();
    }

    /// Valid indices below `limit`, ascending.
    pub(crate) fn iter_ones(&self, limit: usize) -> impl Iterator<Item = usize> + '_ {
        (0..limit).filter(move |&i| self.get(i))
    }
}
