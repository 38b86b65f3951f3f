//! A single owned, type-erased element.
//!
//! Keys and values are staged in an `ElementBox` before they reach a table:
//! the box is default-constructed through its descriptor, then the scripting
//! value is adapted into it. The same type backs `create_default_value` and
//! `create_default_element`.

use crate::builtin::Element;
use crate::descriptor::{DescriptorRef, Value};
use crate::error::Error;
use crate::record::dangling;
use core::any::TypeId;
use core::fmt;
use core::ptr::NonNull;
use std::alloc;

pub struct ElementBox {
    descriptor: DescriptorRef,
    ptr: NonNull<u8>,
}

impl ElementBox {
    /// A fresh default-constructed instance of the descriptor's type.
    pub fn new_default(descriptor: DescriptorRef) -> Self {
        let layout = descriptor.layout();
        let ptr = if layout.size() == 0 {
            dangling(layout.align())
        } else {
            // SAFETY: non-zero size checked above.
            let raw = unsafe { alloc::alloc(layout) };
            NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout))
        };
        // SAFETY: `ptr` is fresh, aligned memory of the descriptor's layout.
        unsafe { descriptor.construct(ptr.as_ptr()) };
        Self { descriptor, ptr }
    }

    /// Adapt a scripting value to the descriptor's shape.
    pub fn from_value(descriptor: DescriptorRef, value: &Value) -> Result<Self, Error> {
        let element = Self::new_default(descriptor);
        // SAFETY: the element is live and owned by this box.
        unsafe { element.descriptor.write_value(element.ptr.as_ptr(), value)? };
        Ok(element)
    }

    /// Move a native value in; the descriptor must describe exactly `T`.
    pub fn from_element<T: Element>(descriptor: DescriptorRef, value: T) -> Result<Self, Error> {
        if descriptor.rust_type() != TypeId::of::<T>() {
            return Err(Error::mismatch(descriptor.type_name(), T::TAG.name()));
        }
        let mut element = Self::new_default(descriptor);
        if let Some(slot) = element.downcast_mut::<T>() {
            *slot = value;
        }
        Ok(element)
    }

    pub fn descriptor(&self) -> &DescriptorRef {
        &self.descriptor
    }

    pub fn to_value(&self) -> Value {
        // SAFETY: the element is live.
        unsafe { self.descriptor.read_value(self.ptr.as_ptr()) }
    }

    pub fn downcast_ref<T: Element>(&self) -> Option<&T> {
        if self.descriptor.rust_type() == TypeId::of::<T>() {
            // SAFETY: the descriptor stores exactly a `T` here.
            Some(unsafe { &*self.ptr.as_ptr().cast::<T>() })
        } else {
            None
        }
    }

    pub fn downcast_mut<T: Element>(&mut self) -> Option<&mut T> {
        if self.descriptor.rust_type() == TypeId::of::<T>() {
            // SAFETY: as above, and `&mut self` makes the access exclusive.
            Some(unsafe { &mut *self.ptr.as_ptr().cast::<T>() })
        } else {
            None
        }
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Clone for ElementBox {
    fn clone(&self) -> Self {
        let layout = self.descriptor.layout();
        let ptr = if layout.size() == 0 {
            dangling(layout.align())
        } else {
            // SAFETY: non-zero size checked above.
            let raw = unsafe { alloc::alloc(layout) };
            NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout))
        };
        // SAFETY: `ptr` is fresh memory; `self.ptr` is a live element.
        unsafe { self.descriptor.copy_construct(ptr.as_ptr(), self.ptr.as_ptr()) };
        Self {
            descriptor: self.descriptor.clone(),
            ptr,
        }
    }
}

impl Drop for ElementBox {
    fn drop(&mut self) {
        let layout = self.descriptor.layout();
        // SAFETY: the element is live and dropped exactly once; the memory
        // was allocated with `layout` when non-zero-sized.
        unsafe {
            self.descriptor.destroy(self.ptr.as_ptr());
            if layout.size() != 0 {
                alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

impl fmt::Debug for ElementBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ElementBox")
            .field(&self.descriptor.type_name())
            .field(&self.to_value())
            .finish()
    }
}
