//! erased-collections: type-erased map and set containers exposed to a
//! dynamically typed scripting runtime.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a hash table whose element types are only known at runtime,
//!   wrapped in proxies that a scripting runtime can drive through
//!   handles and a host garbage collector can trace.
//! - Layers:
//!   - TypeDescriptor: capability set (layout, construct, destroy, hash,
//!     equals, trace) for one element type. `TypedDescriptor<T, S>`
//!     implements it for any `T: Element`.
//!   - SparseHashTable: index-addressable records with tombstones, a
//!     LIFO free list and a bucket index of stored hashes. Indices of
//!     live records never move.
//!   - MapProxy / SetProxy: own their table or borrow a `HostBuffer`,
//!     adapt scripting `Value`s through the descriptors and hand out
//!     enumerators.
//!   - ProxyRegistry: generational handles with reference counts;
//!     enumerators keep their proxy alive.
//!   - ReferenceTracer: evicts records whose collectible reference died,
//!     then rebuilds the bucket index once.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` by design (`Rc`, `RefCell`).
//! - Every mutation commits its structural change before a descriptor
//!   callback can observe the table; a removed record is tombstoned
//!   before it is destroyed.
//! - Reentrancy: descriptor callbacks must not call back into the table
//!   they are running for. Debug builds panic when they do.
//! - Borrowed proxies never free the host's table. Once the host drops
//!   it, operations fail with `Error::InvalidHandle`; while the host
//!   holds a conflicting borrow they fail with `Error::BufferBusy`. The
//!   host traces its own buffers through `HostBuffer::trace_references`.
//!
//! Unsafe code
//! - Raw-pointer element access is confined to the `TypeDescriptor`
//!   contract, `TypedDescriptor`'s impl of it, `record`, `element_box`
//!   and the typed views in `sparse_table`.
//!
//! Notes and non-goals
//! - Iteration order is index order and carries no meaning.
//! - Removing entries from a proxy while enumerating it yourself is
//!   memory-safe but the number of yields is unspecified. Evictions by a
//!   trace pass are handled: evicted records are never yielded.
//! - Scripting-stack marshalling is reduced to the `Value` enum.

pub mod builtin;
pub mod descriptor;
mod element_box;
mod enumerator;
mod error;
mod map_proxy;
mod proxy;
mod record;
mod reentrancy;
pub mod registry;
pub mod sparse_table;
mod sparse_table_proptest;
mod set_proxy;
mod tracer;

// Public surface
pub use builtin::{create_descriptor, Element, TypedDescriptor};
pub use descriptor::{same_shape, DescriptorRef, ObjectId, TypeDescriptor, TypeTag, Value};
pub use element_box::ElementBox;
pub use enumerator::{MapEnumerator, SetEnumerator};
pub use error::Error;
pub use map_proxy::MapProxy;
pub use proxy::{DescriptorSource, HostBuffer};
pub use record::RecordLayout;
pub use registry::{EnumeratorHandle, Entry, Proxy, ProxyHandle, ProxyRegistry, Released};
pub use set_proxy::SetProxy;
pub use sparse_table::{ElementOwnership, SparseHashTable};
pub use tracer::{ReferenceCollector, ReferenceTracer, TraceReferences, TraceReport};
