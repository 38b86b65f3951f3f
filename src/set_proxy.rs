//! SetProxy: the scripting-side face of a container of unique elements.

use crate::builtin::{Element, TypedDescriptor};
use crate::descriptor::{check_shape, DescriptorRef, Value};
use crate::element_box::ElementBox;
use crate::enumerator::SetEnumerator;
use crate::error::Error;
use crate::proxy::{attach_checked, Backing, DescriptorSource, HostBuffer};
use crate::sparse_table::SparseHashTable;
use crate::tracer::{ReferenceCollector, TraceReferences, TraceReport};
use core::any::TypeId;

#[derive(Debug)]
pub struct SetProxy {
    element: DescriptorRef,
    backing: Backing,
    source: DescriptorSource,
}

impl SetProxy {
    pub fn new(element: DescriptorRef) -> Self {
        let table = SparseHashTable::new_set(element.clone());
        Self {
            element,
            backing: Backing::Owned(table),
            source: DescriptorSource::Synthesized,
        }
    }

    pub fn attach(element: DescriptorRef, buffer: &HostBuffer) -> Result<Self, Error> {
        let backing = attach_checked(buffer, &element, None)?;
        Ok(Self {
            element,
            backing,
            source: DescriptorSource::Schema,
        })
    }

    pub fn copy_of(element: DescriptorRef, source: &SparseHashTable) -> Result<Self, Error> {
        let mut table = SparseHashTable::new_set(element.clone());
        table.copy_records_from(source)?;
        Ok(Self {
            element,
            backing: Backing::Owned(table),
            source: DescriptorSource::Schema,
        })
    }

    pub fn try_clone(&self) -> Result<Self, Error> {
        let mut copy = self
            .backing
            .with_table(|table| Self::copy_of(self.element.clone(), table))??;
        copy.source = self.source;
        Ok(copy)
    }

    /// Build from native elements; duplicates collapse.
    pub fn from_elements<T: Element>(elements: impl IntoIterator<Item = T>) -> Self {
        let mut proxy = Self::new(TypedDescriptor::<T>::shared());
        if let Backing::Owned(table) = &mut proxy.backing {
            for element in elements {
                // SAFETY: the table's descriptor stores exactly `T`.
                unsafe { table.add_element_raw((&element as *const T).cast::<u8>()) };
            }
        }
        proxy
    }

    pub fn to_elements<T: Element>(&self) -> Result<Vec<T>, Error> {
        if self.element.rust_type() != TypeId::of::<T>() {
            return Err(Error::mismatch(self.element.type_name(), T::TAG.name()));
        }
        self.backing.with_table(|table| {
            table
                .indices()
                // SAFETY: the descriptor was checked to store `T`.
                .map(|i| unsafe { table.key_ref::<T>(i).clone() })
                .collect()
        })
    }

    pub fn element_descriptor(&self) -> &DescriptorRef {
        &self.element
    }

    pub fn owns_buffer(&self) -> bool {
        self.backing.is_owned()
    }

    pub fn owns_descriptors(&self) -> bool {
        self.source == DescriptorSource::Synthesized
    }

    pub(crate) fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn count(&self) -> Result<usize, Error> {
        self.backing.with_table(|table| table.len())
    }

    pub fn contains(&self, element: &Value) -> Result<bool, Error> {
        let element = ElementBox::from_value(self.element.clone(), element)?;
        self.backing.with_table(|table| table.find(&element).is_some())
    }

    /// Returns whether the element was new.
    pub fn add(&mut self, element: &Value) -> Result<bool, Error> {
        let element = ElementBox::from_value(self.element.clone(), element)?;
        self.backing
            .with_table_mut(|table| table.add_element(&element).1)
    }

    pub fn add_boxed(&mut self, element: &ElementBox) -> Result<bool, Error> {
        check_shape(&*self.element, &**element.descriptor())?;
        self.backing.with_table_mut(|table| table.add_element(element).1)
    }

    pub fn remove(&mut self, element: &Value) -> Result<bool, Error> {
        let element = ElementBox::from_value(self.element.clone(), element)?;
        self.backing.with_table_mut(|table| match table.find(&element) {
            Some(index) => {
                table.remove_at(index, 1);
                true
            }
            None => false,
        })
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.backing.with_table_mut(|table| table.clear(0))
    }

    pub fn create_default_element(&self) -> ElementBox {
        ElementBox::new_default(self.element.clone())
    }

    pub fn enumerate(&self) -> Result<SetEnumerator, Error> {
        Ok(SetEnumerator::new(self.count()?))
    }

    pub fn elements(&self) -> Result<Vec<Value>, Error> {
        self.backing
            .with_table(|table| table.indices().filter_map(|i| table.key_at(i)).collect())
    }
}

impl TraceReferences for SetProxy {
    fn trace_references(&mut self, collector: &mut dyn ReferenceCollector) -> TraceReport {
        self.backing.trace(&[&self.element], collector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_novelty_and_dedups() {
        let mut s = SetProxy::new(TypedDescriptor::<String>::shared());
        assert_eq!(s.add(&Value::Str("a".into())), Ok(true));
        assert_eq!(s.add(&Value::Int(3)), Ok(true), "numbers coerce to strings");
        assert_eq!(s.add(&Value::Str("3".into())), Ok(false));
        assert_eq!(s.count(), Ok(2));
        assert_eq!(s.add(&Value::Nil), Err(Error::mismatch("string", "nil")));
    }

    #[test]
    fn typed_elements_round_trip() {
        let s = SetProxy::from_elements([3i64, 1, 3, 2]);
        let mut v = s.to_elements::<i64>().unwrap();
        v.sort_unstable();
        assert_eq!(v, vec![1, 2, 3]);
        assert!(s.to_elements::<String>().is_err());
    }

    #[test]
    fn copy_of_host_buffer_is_independent() {
        let d = TypedDescriptor::<i32>::shared();
        let host = HostBuffer::new(SparseHashTable::new_set(d.clone()));
        let mut view = SetProxy::attach(d.clone(), &host).unwrap();
        view.add(&Value::Int(1)).unwrap();
        let mut copy = SetProxy::copy_of(d, &host.borrow()).unwrap();
        copy.add(&Value::Int(2)).unwrap();
        assert_eq!(view.count(), Ok(1));
        assert_eq!(copy.count(), Ok(2));
        assert!(copy.owns_buffer() && !copy.owns_descriptors());
    }
}
