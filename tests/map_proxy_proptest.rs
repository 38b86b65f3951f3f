// Property tests for MapProxy through its public API.
use erased_collections::{MapProxy, TypedDescriptor, Value};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Op {
    Add(i64, String),
    Remove(i64),
    Copy,
    Clear,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    // A small key range forces overwrites and removals of present keys.
    let key = -8i64..8;
    let op = prop_oneof![
        5 => (key.clone(), "[a-z]{0,3}").prop_map(|(k, v)| Op::Add(k, v)),
        3 => key.prop_map(Op::Remove),
        1 => Just(Op::Copy),
        1 => Just(Op::Clear),
    ];
    proptest::collection::vec(op, 1..100)
}

fn snapshot(m: &MapProxy) -> HashMap<i64, String> {
    m.to_pairs::<i64, String>().unwrap().into_iter().collect()
}

// Property:
// - `count()` equals the number of distinct keys currently inserted.
// - `remove` reports presence exactly as the model does.
// - A deep copy taken at any point keeps its contents while the original
//   continues to mutate, and vice versa.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_count_and_copy_independence(ops in arb_ops()) {
        let mut sut = MapProxy::new(TypedDescriptor::<i64>::shared(), TypedDescriptor::<String>::shared());
        let mut model: HashMap<i64, String> = HashMap::new();
        let mut copies: Vec<(MapProxy, HashMap<i64, String>)> = Vec::new();

        for op in ops {
            match op {
                Op::Add(k, v) => {
                    sut.add(&Value::Int(k), &Value::Str(v.clone())).unwrap();
                    model.insert(k, v);
                }
                Op::Remove(k) => {
                    let existed = sut.remove(&Value::Int(k)).unwrap();
                    prop_assert_eq!(existed, model.remove(&k).is_some());
                }
                Op::Copy => {
                    let copy = sut.try_clone().unwrap();
                    prop_assert_eq!(snapshot(&copy), model.clone());
                    copies.push((copy, model.clone()));
                }
                Op::Clear => {
                    sut.clear().unwrap();
                    model.clear();
                }
            }
            prop_assert_eq!(sut.count().unwrap(), model.len());
        }

        prop_assert_eq!(snapshot(&sut), model);
        for (copy, frozen) in &copies {
            prop_assert_eq!(&snapshot(copy), frozen);
        }
    }
}
