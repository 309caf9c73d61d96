#![cfg(test)]

// Property tests for OrderTree against a sorted Vec model.

use crate::order_tree::{NodeId, OrderTree};
use core::cmp::Ordering;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Insert(u16),
    // Index into the live ids, taken modulo their count.
    Remove(usize),
    Update(usize, u16),
    Offset(usize, i64),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        4 => (0u16..200).prop_map(Op::Insert),
        2 => any::<usize>().prop_map(Op::Remove),
        1 => (any::<usize>(), 0u16..200).prop_map(|(i, v)| Op::Update(i, v)),
        1 => (any::<usize>(), -40i64..40).prop_map(|(i, k)| Op::Offset(i, k)),
    ];
    proptest::collection::vec(op, 1..300)
}

fn cmp(a: &u16, b: &u16) -> Ordering {
    a.cmp(b)
}

// Property: After every insert, remove and update the AVL, count and parent
// invariants hold, the in-order sequence equals the sorted model, and ids
// of untouched nodes keep their values.
// `offset` agrees with index arithmetic on the model and inverts itself.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_tree_matches_sorted_model(ops in arb_ops()) {
        let mut sut: OrderTree<u16> = OrderTree::new();
        let mut live: Vec<(NodeId, u16)> = Vec::new();
        let mut stale: Vec<NodeId> = Vec::new();

        for op in ops {
            match op {
                Op::Insert(v) => {
                    let id = sut.insert_by(v, cmp);
                    live.push((id, v));
                }
                Op::Remove(i) => {
                    if !live.is_empty() {
                        let (id, v) = live.swap_remove(i % live.len());
                        prop_assert_eq!(sut.remove(id), Some(v));
                        stale.push(id);
                    }
                }
                Op::Update(i, nv) => {
                    if !live.is_empty() {
                        let j = i % live.len();
                        prop_assert!(sut.update_by(live[j].0, |v| *v = nv, cmp));
                        live[j].1 = nv;
                    }
                }
                Op::Offset(i, k) => {
                    if !live.is_empty() {
                        let (id, _) = live[i % live.len()];
                        let rank = sut.rank(id).expect("live id has a rank");
                        let target = rank as i64 + k;
                        let got = sut.offset(id, k);
                        if target < 0 || target >= sut.len() as i64 {
                            prop_assert!(got.is_none());
                        } else {
                            let m = got.expect("in-range offset resolves");
                            prop_assert_eq!(sut.rank(m), Some(target as usize));
                            prop_assert_eq!(sut.offset(m, -k), Some(id));
                        }
                    }
                }
            }

            sut.assert_invariants_by(cmp);
            let mut model: Vec<u16> = live.iter().map(|(_, v)| *v).collect();
            model.sort_unstable();
            let in_order: Vec<u16> = sut.iter().map(|(_, v)| *v).collect();
            prop_assert_eq!(in_order, model);
            for (id, v) in &live {
                prop_assert_eq!(sut.get(*id), Some(v));
            }
            for id in &stale {
                prop_assert!(sut.get(*id).is_none());
            }
        }
    }
}
