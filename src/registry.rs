//! ProxyRegistry: the handle-based surface the scripting runtime drives.
//!
//! Proxies and enumerators live in generational slot maps, so a released
//! handle can never alias a newer proxy. Each proxy carries a reference
//! count; an enumerator holds one of those references for as long as it
//! lives, which keeps its proxy alive by construction.

use crate::builtin::create_descriptor;
use crate::descriptor::{DescriptorRef, ObjectId, TypeTag, Value};
use crate::element_box::ElementBox;
use crate::enumerator::{MapEnumerator, SetEnumerator};
use crate::error::Error;
use crate::map_proxy::MapProxy;
use crate::proxy::HostBuffer;
use crate::set_proxy::SetProxy;
use crate::tracer::{ReferenceCollector, ReferenceTracer, TraceReferences, TraceReport};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Scripting-side reference to a live proxy.
    pub struct ProxyHandle;
    /// Scripting-side reference to a live enumerator.
    pub struct EnumeratorHandle;
}

#[derive(Debug)]
pub enum Proxy {
    Map(MapProxy),
    Set(SetProxy),
}

impl Proxy {
    fn kind(&self) -> &'static str {
        match self {
            Proxy::Map(_) => "map",
            Proxy::Set(_) => "set",
        }
    }

    fn as_map(&self) -> Result<&MapProxy, Error> {
        match self {
            Proxy::Map(map) => Ok(map),
            other => Err(Error::mismatch("map", other.kind())),
        }
    }

    fn as_map_mut(&mut self) -> Result<&mut MapProxy, Error> {
        match self {
            Proxy::Map(map) => Ok(map),
            other => Err(Error::mismatch("map", other.kind())),
        }
    }

    fn as_set_mut(&mut self) -> Result<&mut SetProxy, Error> {
        match self {
            Proxy::Set(set) => Ok(set),
            other => Err(Error::mismatch("set", other.kind())),
        }
    }

    pub fn count(&self) -> Result<usize, Error> {
        match self {
            Proxy::Map(map) => map.count(),
            Proxy::Set(set) => set.count(),
        }
    }

    pub fn owns_buffer(&self) -> bool {
        match self {
            Proxy::Map(map) => map.owns_buffer(),
            Proxy::Set(set) => set.owns_buffer(),
        }
    }
}

impl TraceReferences for Proxy {
    fn trace_references(&mut self, collector: &mut dyn ReferenceCollector) -> TraceReport {
        match self {
            Proxy::Map(map) => map.trace_references(collector),
            Proxy::Set(set) => set.trace_references(collector),
        }
    }
}

/// One step of an enumeration.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Pair(Value, Value),
    Element(Value),
}

/// Outcome of dropping a reference to a proxy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Released {
    /// Other references remain.
    Live,
    /// That was the last reference; the proxy is gone.
    Destroyed,
}

#[derive(Debug)]
struct Counted {
    refcount: usize,
    proxy: Proxy,
}

#[derive(Debug)]
enum Enumeration {
    Map(MapEnumerator),
    Set(SetEnumerator),
}

#[derive(Debug)]
struct EnumeratorSlot {
    proxy: ProxyHandle,
    cursor: Enumeration,
}

#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: SlotMap<ProxyHandle, Counted>,
    enumerators: SlotMap<EnumeratorHandle, EnumeratorSlot>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live proxies.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn insert(&mut self, proxy: Proxy) -> ProxyHandle {
        let handle = self.proxies.insert(Counted { refcount: 1, proxy });
        log::debug!("registered {} proxy {:?}", self.proxies[handle].proxy.kind(), handle);
        handle
    }

    /// New owned map. Both descriptors are built before anything is
    /// registered, so a failure leaves no partial proxy behind.
    pub fn construct_map(
        &mut self,
        key: TypeTag,
        value: TypeTag,
        key_class: Option<ObjectId>,
        value_class: Option<ObjectId>,
    ) -> Result<ProxyHandle, Error> {
        let key = create_descriptor(key, key_class)?;
        let value = create_descriptor(value, value_class)?;
        Ok(self.insert(Proxy::Map(MapProxy::new(key, value))))
    }

    pub fn construct_set(&mut self, element: TypeTag, class: Option<ObjectId>) -> Result<ProxyHandle, Error> {
        let element = create_descriptor(element, class)?;
        Ok(self.insert(Proxy::Set(SetProxy::new(element))))
    }

    /// Surface a host-owned map without copying it.
    pub fn expose_map(
        &mut self,
        key: DescriptorRef,
        value: DescriptorRef,
        buffer: &HostBuffer,
    ) -> Result<ProxyHandle, Error> {
        let map = MapProxy::attach(key, value, buffer)?;
        Ok(self.insert(Proxy::Map(map)))
    }

    pub fn expose_set(&mut self, element: DescriptorRef, buffer: &HostBuffer) -> Result<ProxyHandle, Error> {
        let set = SetProxy::attach(element, buffer)?;
        Ok(self.insert(Proxy::Set(set)))
    }

    /// Owned deep copy of any proxy, for independent mutation.
    pub fn copy_proxy(&mut self, handle: ProxyHandle) -> Result<ProxyHandle, Error> {
        let copy = match self.proxy(handle)? {
            Proxy::Map(map) => Proxy::Map(map.try_clone()?),
            Proxy::Set(set) => Proxy::Set(set.try_clone()?),
        };
        log::debug!("copied proxy {:?}", handle);
        Ok(self.insert(copy))
    }

    pub fn proxy(&self, handle: ProxyHandle) -> Result<&Proxy, Error> {
        self.proxies
            .get(handle)
            .map(|c| &c.proxy)
            .ok_or(Error::InvalidHandle)
    }

    fn proxy_mut(&mut self, handle: ProxyHandle) -> Result<&mut Proxy, Error> {
        self.proxies
            .get_mut(handle)
            .map(|c| &mut c.proxy)
            .ok_or(Error::InvalidHandle)
    }

    pub fn retain(&mut self, handle: ProxyHandle) -> Result<(), Error> {
        let counted = self.proxies.get_mut(handle).ok_or(Error::InvalidHandle)?;
        counted.refcount += 1;
        Ok(())
    }

    /// Drop one reference; the last one destroys the proxy, freeing an
    /// owned buffer and leaving a borrowed one to its host.
    pub fn release(&mut self, handle: ProxyHandle) -> Result<Released, Error> {
        let counted = self.proxies.get_mut(handle).ok_or(Error::InvalidHandle)?;
        debug_assert!(counted.refcount > 0);
        counted.refcount -= 1;
        if counted.refcount > 0 {
            return Ok(Released::Live);
        }
        if let Some(counted) = self.proxies.remove(handle) {
            log::debug!("destroyed {} proxy {:?}", counted.proxy.kind(), handle);
        }
        Ok(Released::Destroyed)
    }

    pub fn count(&self, handle: ProxyHandle) -> Result<usize, Error> {
        self.proxy(handle)?.count()
    }

    pub fn get(&self, handle: ProxyHandle, key: &Value) -> Result<Option<Value>, Error> {
        self.proxy(handle)?.as_map()?.get(key)
    }

    pub fn add_pair(&mut self, handle: ProxyHandle, key: &Value, value: &Value) -> Result<(), Error> {
        self.proxy_mut(handle)?.as_map_mut()?.add(key, value)
    }

    /// Returns whether the element was new.
    pub fn add_element(&mut self, handle: ProxyHandle, element: &Value) -> Result<bool, Error> {
        self.proxy_mut(handle)?.as_set_mut()?.add(element)
    }

    /// Remove a map key or a set element; returns whether it existed.
    pub fn remove(&mut self, handle: ProxyHandle, key: &Value) -> Result<bool, Error> {
        match self.proxy_mut(handle)? {
            Proxy::Map(map) => map.remove(key),
            Proxy::Set(set) => set.remove(key),
        }
    }

    pub fn clear(&mut self, handle: ProxyHandle) -> Result<(), Error> {
        match self.proxy_mut(handle)? {
            Proxy::Map(map) => map.clear(),
            Proxy::Set(set) => set.clear(),
        }
    }

    /// Default value (maps) or element (sets) to fill before adding.
    pub fn create_default(&self, handle: ProxyHandle) -> Result<ElementBox, Error> {
        Ok(match self.proxy(handle)? {
            Proxy::Map(map) => map.create_default_value(),
            Proxy::Set(set) => set.create_default_element(),
        })
    }

    /// Begin enumerating; the enumerator keeps the proxy alive until
    /// `release_enumerator`.
    pub fn iterate(&mut self, handle: ProxyHandle) -> Result<EnumeratorHandle, Error> {
        let cursor = match self.proxy(handle)? {
            Proxy::Map(map) => Enumeration::Map(map.enumerate()?),
            Proxy::Set(set) => Enumeration::Set(set.enumerate()?),
        };
        self.retain(handle)?;
        Ok(self.enumerators.insert(EnumeratorSlot {
            proxy: handle,
            cursor,
        }))
    }

    /// Next entry, or `None` once the enumeration is exhausted.
    pub fn next(&mut self, enumerator: EnumeratorHandle) -> Result<Option<Entry>, Error> {
        let slot = self
            .enumerators
            .get_mut(enumerator)
            .ok_or(Error::InvalidHandle)?;
        let counted = self.proxies.get(slot.proxy).ok_or(Error::InvalidHandle)?;
        match (&mut slot.cursor, &counted.proxy) {
            (Enumeration::Map(cursor), Proxy::Map(map)) => {
                Ok(cursor.next(map)?.map(|(k, v)| Entry::Pair(k, v)))
            }
            (Enumeration::Set(cursor), Proxy::Set(set)) => Ok(cursor.next(set)?.map(Entry::Element)),
            (_, proxy) => Err(Error::mismatch("enumerated proxy", proxy.kind())),
        }
    }

    /// Drop the enumerator and its reference to the proxy.
    pub fn release_enumerator(&mut self, enumerator: EnumeratorHandle) -> Result<Released, Error> {
        let slot = self
            .enumerators
            .remove(enumerator)
            .ok_or(Error::InvalidHandle)?;
        self.release(slot.proxy)
    }

    /// Host GC entry point: trace every live proxy once.
    pub fn collect_garbage(&mut self, collector: &mut dyn ReferenceCollector) -> TraceReport {
        let mut tracer = ReferenceTracer::new(collector);
        for (handle, counted) in self.proxies.iter_mut() {
            let report = tracer.trace(&mut counted.proxy);
            if report.removed > 0 {
                log::debug!("{:?}: evicted {} dead records", handle, report.removed);
            }
        }
        tracer.report()
    }
}
