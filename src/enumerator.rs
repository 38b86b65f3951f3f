//! Index-based enumeration over a proxy's records.
//!
//! An enumerator holds no reference to its proxy; every `next` takes the
//! proxy as an argument, like a handle resolved against its map. The
//! number of yields is capped at the count captured when enumeration
//! began, and each slot's validity is re-checked when reached, so records
//! evicted by a trace pass mid-iteration are never yielded.

use crate::descriptor::Value;
use crate::error::Error;
use crate::map_proxy::MapProxy;
use crate::set_proxy::SetProxy;
use crate::sparse_table::SparseHashTable;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Cursor {
    index: usize,
    remaining: usize,
}

impl Cursor {
    pub(crate) fn new(remaining: usize) -> Self {
        Self {
            index: 0,
            remaining,
        }
    }

    /// Next valid index, or `None` once `remaining` is spent or `max_index`
    /// is reached. Terminal states are sticky.
    pub(crate) fn advance(&mut self, table: &SparseHashTable) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let max_index = table.max_index();
        while self.index < max_index {
            let index = self.index;
            self.index += 1;
            if table.is_valid_index(index) {
                self.remaining -= 1;
                return Some(index);
            }
        }
        self.remaining = 0;
        None
    }

    pub(crate) fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

/// Yields `(key, value)` pairs of a `MapProxy`. Finite and not restartable.
#[derive(Clone, Debug)]
pub struct MapEnumerator {
    cursor: Cursor,
}

impl MapEnumerator {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            cursor: Cursor::new(count),
        }
    }

    /// Advance against `proxy`, which must be the proxy this enumerator was
    /// created from.
    pub fn next(&mut self, proxy: &MapProxy) -> Result<Option<(Value, Value)>, Error> {
        if self.cursor.is_done() {
            return Ok(None);
        }
        let cursor = &mut self.cursor;
        proxy.backing().with_table(|table| {
            let index = cursor.advance(table)?;
            Some((table.key_at(index)?, table.value_at(index)?))
        })
    }

    pub fn is_done(&self) -> bool {
        self.cursor.is_done()
    }
}

/// Yields the elements of a `SetProxy`. Finite and not restartable.
#[derive(Clone, Debug)]
pub struct SetEnumerator {
    cursor: Cursor,
}

impl SetEnumerator {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            cursor: Cursor::new(count),
        }
    }

    pub fn next(&mut self, proxy: &SetProxy) -> Result<Option<Value>, Error> {
        if self.cursor.is_done() {
            return Ok(None);
        }
        let cursor = &mut self.cursor;
        proxy
            .backing()
            .with_table(|table| cursor.advance(table).and_then(|index| table.key_at(index)))
    }

    pub fn is_done(&self) -> bool {
        self.cursor.is_done()
    }
}
