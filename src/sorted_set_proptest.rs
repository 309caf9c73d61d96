#![cfg(test)]

// Property tests for SortedSet against a BTreeMap model keyed by name.

use crate::hash_engine::HashConfig;
use crate::sorted_set::{Member, SortedSet};
use core::cmp::Ordering;
use proptest::prelude::*;
use std::collections::hash_map::RandomState;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, f64),
    Remove(usize),
    Seek(f64, usize),
    Range(f64, i64, usize),
}

// Few distinct scores so ties on score are common.
fn arb_score() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => (-5i8..5).prop_map(f64::from),
        1 => Just(-0.0),
        1 => Just(f64::INFINITY),
        1 => Just(f64::NEG_INFINITY),
    ]
}

fn arb_scenario() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<Op>)> {
    proptest::collection::vec(proptest::collection::vec(b'a'..=b'c', 0..4), 1..=40).prop_flat_map(
        |pool| {
            let idx = 0..pool.len();
            let op = prop_oneof![
                4 => (idx.clone(), arb_score()).prop_map(|(i, s)| Op::Insert(i, s)),
                2 => idx.clone().prop_map(Op::Remove),
                2 => (arb_score(), idx.clone()).prop_map(|(s, i)| Op::Seek(s, i)),
                1 => (arb_score(), -5i64..5, 0usize..8).prop_map(|(s, o, l)| Op::Range(s, o, l)),
            ];
            proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
        },
    )
}

fn key_cmp(a: &(f64, Vec<u8>), b: &(f64, Vec<u8>)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
}

fn sorted(model: &BTreeMap<Vec<u8>, f64>) -> Vec<(f64, Vec<u8>)> {
    let mut v: Vec<(f64, Vec<u8>)> = model.iter().map(|(n, s)| (*s, n.clone())).collect();
    v.sort_by(key_cmp);
    v
}

fn pair(m: &Member) -> (f64, Vec<u8>) {
    (m.score(), m.name().to_vec())
}

// Property: SortedSet agrees with the model after every op.
// - insert reports newness exactly when the model lacked the name.
// - iteration order is (score by total order, then name bytes).
// - seek_ge returns the first model entry at or after the query.
// - lookup/seek consistency: for every member, seek_ge(score, name)
//   and lookup(name) return the same id.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_sorted_set_matches_model((pool, ops) in arb_scenario(), quota in 1usize..4) {
        let config = HashConfig { rehash_quota: quota, initial_capacity: 1, ..HashConfig::default() };
        let mut sut = SortedSet::with_config(config, RandomState::new()).unwrap();
        let mut model: BTreeMap<Vec<u8>, f64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(i, s) => {
                    let name = &pool[i];
                    let fresh = model.insert(name.clone(), s).is_none();
                    prop_assert_eq!(sut.insert(name, s), fresh);
                }
                Op::Remove(i) => {
                    let name = &pool[i];
                    prop_assert_eq!(sut.remove(name), model.remove(name).is_some());
                }
                Op::Seek(s, i) => {
                    let q = (s, pool[i].clone());
                    let expect = sorted(&model).into_iter().find(|e| key_cmp(e, &q).is_ge());
                    let got = sut.seek_ge(s, &pool[i]).and_then(|id| sut.get(id)).map(pair);
                    prop_assert_eq!(got, expect);
                }
                Op::Range(s, offset, limit) => {
                    let all = sorted(&model);
                    let start = all.iter().position(|e| e.0.total_cmp(&s).is_ge());
                    let expect: Vec<(f64, Vec<u8>)> = match start {
                        None => Vec::new(),
                        Some(p) => {
                            let from = p as i64 + offset;
                            if from < 0 || from >= all.len() as i64 {
                                Vec::new()
                            } else {
                                all[from as usize..].iter().take(limit).cloned().collect()
                            }
                        }
                    };
                    let got: Vec<(f64, Vec<u8>)> =
                        sut.range(s, b"", offset, limit).map(|(_, m)| pair(m)).collect();
                    prop_assert_eq!(got, expect);
                }
            }

            sut.assert_invariants();
            prop_assert_eq!(sut.len(), model.len());
            let in_order: Vec<(f64, Vec<u8>)> = sut.iter().map(|(_, m)| pair(m)).collect();
            prop_assert_eq!(in_order, sorted(&model));
            for (name, score) in &model {
                let id = sut.lookup(name);
                prop_assert!(id.is_some());
                prop_assert_eq!(sut.seek_ge(*score, name), id);
            }
        }
    }
}
