// ReferenceTracer integration suite.
//
// Core invariants exercised:
// - Eviction: after clearing N dead keys from a map of M, `count()` is M-N
//   and lookups of cleared keys miss.
// - Both sides: a dead reference in the value evicts the record too.
// - Scope: borrowed proxies are left to their host; descriptor classes
//   are always reported.
// - Enumeration: records evicted mid-iteration are never yielded.
use erased_collections::{
    create_descriptor, HostBuffer, MapProxy, ObjectId, ReferenceCollector, ReferenceTracer,
    SetProxy, SparseHashTable, TraceReferences, TraceReport, TypeTag, TypedDescriptor, Value,
};
use std::collections::HashSet;

/// Collector with a fixed set of live objects that records every report.
#[derive(Default)]
struct Heap {
    live: HashSet<ObjectId>,
    reported: Vec<ObjectId>,
}

impl Heap {
    fn with_live(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            live: ids.into_iter().map(ObjectId).collect(),
            reported: Vec::new(),
        }
    }
}

impl ReferenceCollector for Heap {
    fn add_referenced_object(&mut self, object: ObjectId) -> bool {
        self.reported.push(object);
        self.live.contains(&object)
    }
}

const CLASS: ObjectId = ObjectId(1_000);

fn object_keyed_map() -> MapProxy {
    MapProxy::new(
        create_descriptor(TypeTag::Object, Some(CLASS)).unwrap(),
        TypedDescriptor::<i32>::shared(),
    )
}

fn obj(id: u64) -> Value {
    Value::Object(ObjectId(id))
}

// Test: eviction of dead object keys.
// Assumes: the collector reports ids 1..=3 dead, 4..=8 live.
// Verifies: count drops by the number of dead keys and cleared keys miss.
#[test]
fn dead_keys_are_evicted() {
    let mut m = object_keyed_map();
    for id in 1..=8 {
        m.add(&obj(id), &Value::Int(id as i64)).unwrap();
    }
    let mut heap = Heap::with_live(4..=8);
    let report = m.trace_references(&mut heap);
    assert_eq!(report, TraceReport { visited: 8, removed: 3 });
    assert_eq!(m.count(), Ok(5));
    for id in 1..=3 {
        assert_eq!(m.get(&obj(id)), Ok(None));
    }
    assert_eq!(m.get(&obj(6)), Ok(Some(Value::Int(6))));
    assert!(heap.reported.contains(&CLASS), "key class must be kept alive");

    // The rebuilt index accepts new records.
    m.add(&obj(2), &Value::Int(-2)).unwrap();
    assert_eq!(m.count(), Ok(6));
}

// Test: dead reference on the value side.
// Verifies: the whole record is evicted even though its key is plain data.
#[test]
fn dead_values_evict_their_record() {
    let mut m = MapProxy::new(
        TypedDescriptor::<String>::shared(),
        create_descriptor(TypeTag::Object, Some(CLASS)).unwrap(),
    );
    m.add(&Value::Str("alive".into()), &obj(1)).unwrap();
    m.add(&Value::Str("dead".into()), &obj(2)).unwrap();
    m.add(&Value::Str("null".into()), &Value::Nil).unwrap();
    let mut heap = Heap::with_live([1]);
    let report = m.trace_references(&mut heap);
    assert_eq!(report.removed, 1);
    assert_eq!(m.get(&Value::Str("dead".into())), Ok(None));
    assert_eq!(m.get(&Value::Str("null".into())), Ok(Some(Value::Nil)));
    assert_eq!(m.count(), Ok(2));
}

// Test: tracer over borrowed, empty, and plain proxies.
// Verifies: none of them lose records; the accumulated report only counts
// the owned object set.
#[test]
fn only_owned_collectible_proxies_are_walked() {
    let element = create_descriptor(TypeTag::Object, Some(CLASS)).unwrap();
    let host = HostBuffer::new(SparseHashTable::new_set(element.clone()));
    let mut borrowed = SetProxy::attach(element.clone(), &host).unwrap();
    borrowed.add(&obj(1)).unwrap();
    let mut owned = SetProxy::new(element);
    owned.add(&obj(1)).unwrap();
    owned.add(&obj(2)).unwrap();
    let mut empty = object_keyed_map();
    let mut plain = SetProxy::from_elements([1i32, 2, 3]);

    let mut heap = Heap::with_live([2]);
    let mut tracer = ReferenceTracer::new(&mut heap);
    tracer.trace(&mut borrowed);
    tracer.trace(&mut owned);
    tracer.trace(&mut empty);
    tracer.trace(&mut plain);
    assert_eq!(tracer.report(), TraceReport { visited: 2, removed: 1 });
    assert_eq!(borrowed.count(), Ok(1));
    assert_eq!(owned.count(), Ok(1));
    assert_eq!(plain.count(), Ok(3));
}

// Test: trace pass between two steps of an enumeration.
// Assumes: the pass evicts only records the enumerator already yielded.
// Verifies: the total yield count equals the count at enumeration start,
// and no evicted record is yielded.
#[test]
fn enumeration_survives_trace_between_steps() {
    let mut m = object_keyed_map();
    for id in 1..=6 {
        m.add(&obj(id), &Value::Int(0)).unwrap();
    }
    let start = m.count().unwrap();
    let mut e = m.enumerate().unwrap();
    let mut yielded = Vec::new();
    for _ in 0..3 {
        yielded.push(e.next(&m).unwrap().unwrap().0);
    }
    let live: Vec<u64> = (1..=6)
        .filter(|id| !yielded.contains(&obj(*id)))
        .collect();
    let report = m.trace_references(&mut Heap::with_live(live));
    assert_eq!(report.removed, 3);
    while let Some((k, _)) = e.next(&m).unwrap() {
        assert!(!yielded.contains(&k));
        yielded.push(k);
    }
    assert_eq!(yielded.len(), start);
}

// Test: trace pass that evicts records not yet reached.
// Verifies: evicted records are skipped and the enumerator ends at the
// table's max index instead of reading past it.
#[test]
fn enumeration_never_yields_evicted_records() {
    let mut m = object_keyed_map();
    for id in 1..=4 {
        m.add(&obj(id), &Value::Int(0)).unwrap();
    }
    let mut e = m.enumerate().unwrap();
    let first = e.next(&m).unwrap().unwrap().0;
    m.trace_references(&mut Heap::with_live(match first {
        Value::Object(ObjectId(id)) => vec![id],
        _ => unreachable!(),
    }));
    assert_eq!(m.count(), Ok(1));
    assert_eq!(e.next(&m), Ok(None));
    assert!(e.is_done());
}

// Test: the host traces its own buffer.
// Assumes: a proxy views the buffer, so the proxy's trace skips it.
// Verifies: tracing the buffer itself evicts dead keys, reports the element
// class, and leaves evicted keys unreachable through the view.
#[test]
fn host_buffers_are_traced_by_their_owner() {
    let element = create_descriptor(TypeTag::Object, Some(CLASS)).unwrap();
    let mut host = HostBuffer::new(SparseHashTable::new_set(element.clone()));
    let mut view = SetProxy::attach(element, &host).unwrap();
    for id in 1..=5 {
        view.add(&obj(id)).unwrap();
    }

    let mut heap = Heap::with_live([2, 4]);
    assert_eq!(view.trace_references(&mut heap).removed, 0);
    let report = host.trace_references(&mut heap);
    assert_eq!(report, TraceReport { visited: 5, removed: 3 });
    assert!(heap.reported.contains(&CLASS));
    assert_eq!(host.borrow().len(), 2);
    assert_eq!(view.count(), Ok(2));
    for id in [1, 3, 5] {
        assert_eq!(view.contains(&obj(id)), Ok(false));
    }
    assert_eq!(view.contains(&obj(4)), Ok(true));
}
