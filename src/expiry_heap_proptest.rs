#![cfg(test)]

// Property tests for ExpiryHeap against a map of owner -> deadline.

use crate::expiry_heap::ExpiryHeap;
use proptest::prelude::*;
use slotmap::{DefaultKey, SlotMap};
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Op {
    Add(u64),
    // Index into the live owners, taken modulo their count.
    Reschedule(usize, u64),
    Cancel(usize),
    PopDue(u64),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        4 => (0u64..1000).prop_map(Op::Add),
        2 => (any::<usize>(), 0u64..1000).prop_map(|(i, v)| Op::Reschedule(i, v)),
        2 => any::<usize>().prop_map(Op::Cancel),
        1 => (0u64..1000).prop_map(Op::PopDue),
    ];
    proptest::collection::vec(op, 1..250)
}

// Property: After every op the array is heap-ordered, `position` matches
// every owner's actual index, and deadlines equal the model's. `pop_due`
// drains exactly the due owners, smallest deadline first.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_heap_matches_model(ops in arb_ops()) {
        let mut owners: SlotMap<DefaultKey, ()> = SlotMap::new();
        let mut sut: ExpiryHeap<DefaultKey> = ExpiryHeap::new();
        let mut model: HashMap<DefaultKey, u64> = HashMap::new();
        let mut live: Vec<DefaultKey> = Vec::new();

        for op in ops {
            match op {
                Op::Add(v) => {
                    let k = owners.insert(());
                    sut.schedule(k, v);
                    model.insert(k, v);
                    live.push(k);
                }
                Op::Reschedule(i, v) => {
                    if !live.is_empty() {
                        let k = live[i % live.len()];
                        sut.schedule(k, v);
                        model.insert(k, v);
                    }
                }
                Op::Cancel(i) => {
                    if !live.is_empty() {
                        let k = live.swap_remove(i % live.len());
                        prop_assert_eq!(sut.cancel(k), model.remove(&k));
                        prop_assert_eq!(sut.cancel(k), None);
                    }
                }
                Op::PopDue(now) => {
                    let mut last = 0;
                    while let Some(item) = sut.pop_due(now) {
                        prop_assert!(item.val <= now);
                        prop_assert!(item.val >= last);
                        last = item.val;
                        prop_assert_eq!(model.remove(&item.owner), Some(item.val));
                        live.retain(|k| *k != item.owner);
                    }
                    prop_assert!(model.values().all(|v| *v > now));
                }
            }

            let items = sut.as_slice();
            prop_assert_eq!(items.len(), model.len());
            for (i, item) in items.iter().enumerate() {
                prop_assert_eq!(sut.position(item.owner), Some(i));
                prop_assert_eq!(model.get(&item.owner), Some(&item.val));
                if i > 0 {
                    prop_assert!(items[(i - 1) / 2].val <= item.val);
                }
            }
            prop_assert_eq!(sut.peek().map(|t| t.val), model.values().min().copied());
        }
    }
}
