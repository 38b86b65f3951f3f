//! MapProxy: the scripting-side face of an unordered key/value container.

use crate::builtin::{Element, TypedDescriptor};
use crate::descriptor::{check_shape, DescriptorRef, Value};
use crate::element_box::ElementBox;
use crate::enumerator::MapEnumerator;
use crate::error::Error;
use crate::proxy::{attach_checked, Backing, DescriptorSource, HostBuffer};
use crate::sparse_table::SparseHashTable;
use crate::tracer::{ReferenceCollector, TraceReferences, TraceReport};
use core::any::TypeId;

#[derive(Debug)]
pub struct MapProxy {
    key: DescriptorRef,
    value: DescriptorRef,
    backing: Backing,
    source: DescriptorSource,
}

impl MapProxy {
    /// Empty map with its own buffer, for descriptors built from type tags.
    pub fn new(key: DescriptorRef, value: DescriptorRef) -> Self {
        let table = SparseHashTable::new_map(key.clone(), value.clone());
        Self {
            key,
            value,
            backing: Backing::Owned(table),
            source: DescriptorSource::Synthesized,
        }
    }

    /// View onto a host-owned map. Nothing is copied; mutations are visible
    /// to the host.
    pub fn attach(key: DescriptorRef, value: DescriptorRef, buffer: &HostBuffer) -> Result<Self, Error> {
        let backing = attach_checked(buffer, &key, Some(&value))?;
        Ok(Self {
            key,
            value,
            backing,
            source: DescriptorSource::Schema,
        })
    }

    /// Owned deep copy of `source`'s records, whatever its ownership mode.
    pub fn copy_of(key: DescriptorRef, value: DescriptorRef, source: &SparseHashTable) -> Result<Self, Error> {
        let mut table = SparseHashTable::new_map(key.clone(), value.clone());
        table.copy_records_from(source)?;
        Ok(Self {
            key,
            value,
            backing: Backing::Owned(table),
            source: DescriptorSource::Schema,
        })
    }

    /// Owned deep copy of this proxy, borrowed or not.
    pub fn try_clone(&self) -> Result<Self, Error> {
        let mut copy = self
            .backing
            .with_table(|table| Self::copy_of(self.key.clone(), self.value.clone(), table))??;
        copy.source = self.source;
        Ok(copy)
    }

    /// Build from native pairs; descriptors are deduced from `K` and `V`.
    pub fn from_pairs<K: Element, V: Element>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut proxy = Self::new(TypedDescriptor::<K>::shared(), TypedDescriptor::<V>::shared());
        if let Backing::Owned(table) = &mut proxy.backing {
            for (key, value) in pairs {
                // SAFETY: the table's descriptors store exactly `K` and `V`.
                unsafe {
                    table.add_pair_raw(
                        (&key as *const K).cast::<u8>(),
                        (&value as *const V).cast::<u8>(),
                    );
                }
            }
        }
        proxy
    }

    /// Copy the records out as native pairs. Fails unless the proxy stores
    /// exactly `K` keys and `V` values.
    pub fn to_pairs<K: Element, V: Element>(&self) -> Result<Vec<(K, V)>, Error> {
        if self.key.rust_type() != TypeId::of::<K>() {
            return Err(Error::mismatch(self.key.type_name(), K::TAG.name()));
        }
        if self.value.rust_type() != TypeId::of::<V>() {
            return Err(Error::mismatch(self.value.type_name(), V::TAG.name()));
        }
        self.backing.with_table(|table| {
            table
                .indices()
                // SAFETY: the descriptors were checked to store `K` and `V`.
                .map(|i| unsafe { (table.key_ref::<K>(i).clone(), table.value_ref::<V>(i).clone()) })
                .collect()
        })
    }

    pub fn key_descriptor(&self) -> &DescriptorRef {
        &self.key
    }

    pub fn value_descriptor(&self) -> &DescriptorRef {
        &self.value
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

    /// Value stored under `key`, or `None` when no key compares equal.
    pub fn get(&self, key: &Value) -> Result<Option<Value>, Error> {
        let key = ElementBox::from_value(self.key.clone(), key)?;
        self.backing.with_table(|table| {
            let index = table.find(&key)?;
            table.value_at(index)
        })
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool, Error> {
        let key = ElementBox::from_value(self.key.clone(), key)?;
        self.backing.with_table(|table| table.find(&key).is_some())
    }

    /// Insert or overwrite. Both sides are adapted before the table is
    /// touched, so a mismatch leaves the map unchanged.
    pub fn add(&mut self, key: &Value, value: &Value) -> Result<(), Error> {
        let key = ElementBox::from_value(self.key.clone(), key)?;
        let value = ElementBox::from_value(self.value.clone(), value)?;
        self.backing.with_table_mut(|table| {
            table.add_pair(&key, &value);
        })
    }

    /// Insert pre-built elements, e.g. from `create_default_value`.
    pub fn add_boxed(&mut self, key: &ElementBox, value: &ElementBox) -> Result<(), Error> {
        check_shape(&*self.key, &**key.descriptor())?;
        check_shape(&*self.value, &**value.descriptor())?;
        self.backing.with_table_mut(|table| {
            table.add_pair(key, value);
        })
    }

    /// Returns whether a record existed.
    pub fn remove(&mut self, key: &Value) -> Result<bool, Error> {
        let key = ElementBox::from_value(self.key.clone(), key)?;
        self.backing.with_table_mut(|table| match table.find(&key) {
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

    /// Fresh default instance of the value type.
    pub fn create_default_value(&self) -> ElementBox {
        ElementBox::new_default(self.value.clone())
    }

    /// Start an enumeration over the records present now.
    pub fn enumerate(&self) -> Result<MapEnumerator, Error> {
        Ok(MapEnumerator::new(self.count()?))
    }

    /// Snapshot of all pairs, in index order.
    pub fn entries(&self) -> Result<Vec<(Value, Value)>, Error> {
        self.backing.with_table(|table| {
            table
                .indices()
                .filter_map(|i| Some((table.key_at(i)?, table.value_at(i)?)))
                .collect()
        })
    }
}

impl TraceReferences for MapProxy {
    fn trace_references(&mut self, collector: &mut dyn ReferenceCollector) -> TraceReport {
        self.backing.trace(&[&self.key, &self.value], collector)
    }
}
