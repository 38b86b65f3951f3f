//! Debug-only guard against descriptor callbacks re-entering a table.
//!
//! `hash`, `equals`, `destroy` and friends are host code. While one runs,
//! the table may be between two structural steps, so a nested call into the
//! same table (through a raw pointer or a shared host buffer) is a bug. In
//! debug builds the guard panics naming both operations; in release builds
//! it compiles to nothing.

use core::marker::PhantomData;
#[cfg(debug_assertions)]
use std::{cell::Cell, rc::Rc};

/// Per-table tracker; guard an operation with
/// `let _g = self.guard.enter("find");`.
#[derive(Debug, Default)]
pub(crate) struct CallbackGuard {
    // Shared with live guards so holding one does not borrow the table.
    #[cfg(debug_assertions)]
    active: Rc<Cell<Option<&'static str>>>,
    _nosend: PhantomData<*mut ()>,
}

impl CallbackGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark `operation` as running until the returned guard drops.
    #[inline]
    pub(crate) fn enter(&self, operation: &'static str) -> Entered {
        #[cfg(debug_assertions)]
        {
            if let Some(outer) = self.active.get() {
                panic!("reentrancy detected: `{operation}` called while `{outer}` is running");
            }
            self.active.set(Some(operation));
            Entered {
                active: Rc::clone(&self.active),
            }
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = operation;
            Entered { _z: PhantomData }
        }
    }
}

/// RAII guard returned by `CallbackGuard::enter`.
pub(crate) struct Entered {
    #[cfg(debug_assertions)]
    active: Rc<Cell<Option<&'static str>>>,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<()>,
}

impl Drop for Entered {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(self.active.get().is_some());
            self.active.set(None);
        }
    }
}
