use super::*;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Checks the sum invariant at every checkpoint of every internal node, and
/// that `(depth, next_key)` agree with the addressing rules.
fn validate_tree(t: &HexSumTree) {
    let (depth, next_key) = t.state();
    assert_eq!(depth, depth_for(next_key), "depth must be minimal for next key");

    for (node, history) in t.checkpoints().histories() {
        assert!(!history.is_empty(), "materialized node without checkpoints");
        assert!(
            history.iter().zip(history.iter().skip(1)).all(|(a, b)| a.time < b.time),
            "checkpoint times must be strictly increasing at {node:?}"
        );

        if node.level == 0 {
            assert!(node.index < next_key, "leaf {} beyond next key", node.index);
            continue;
        }
        assert!(node.level <= depth, "node {node:?} above the root");

        for c in history.iter() {
            let children: Weight = (0..CHILDREN)
                .map(|slot| t.checkpoints().value_at_or_before(node.child(slot), c.time))
                .sum();
            assert_eq!(
                c.value, children,
                "node {node:?} at time {} must equal the sum of its children",
                c.time
            );
        }
    }
}

/// Key whose cumulative range holds `offset`.
fn linear_select(leaves: &[Weight], offset: Weight) -> Key {
    let mut acc = 0;
    for (key, w) in leaves.iter().enumerate() {
        acc += w;
        if offset < acc {
            return key as Key;
        }
    }
    panic!("offset {offset} beyond total {acc}");
}

/// Checks every read against a full copy of the leaves as they stood at `time`.
fn check_snapshot(t: &HexSumTree, time: Time, leaves: &[Weight], check_items: bool) {
    let total: Weight = leaves.iter().sum();
    assert_eq!(t.total_sum_at(time), total, "total at {time}");

    if check_items {
        for (key, w) in leaves.iter().enumerate() {
            assert_eq!(t.item_at(key as Key, time), *w, "leaf {key} at {time}");
        }
        assert_eq!(t.item_at(leaves.len() as Key, time), 0);
    }

    assert_eq!(
        t.sortition(&[total], time),
        Err(Error::OutOfRange {
            offset: total,
            total
        })
    );
    if total == 0 {
        return;
    }

    let step = (total / 48).max(1) as usize;
    let mut offsets: Vec<Weight> = (0..total).step_by(step).collect();
    offsets.push(total - 1);
    offsets.reverse();

    let keys = t.sortition(&offsets, time).unwrap();
    for (offset, key) in offsets.iter().zip(&keys) {
        assert_eq!(*key, linear_select(leaves, *offset), "offset {offset} at {time}");
        let before: Weight = leaves[..*key as usize].iter().sum();
        assert!(before <= *offset && *offset < before + leaves[*key as usize]);
    }
}

#[derive(Clone, Debug)]
enum Op {
    Insert(Weight),
    Update(prop::sample::Index, Weight),
    Skip(u64),
    Tick(Time),
    Backdate(Time),
}

fn weight_strategy() -> impl Strategy<Value = Weight> + Clone {
    prop_oneof![
        1 => Just(0 as Weight),
        8 => 1..1_000 as Weight,
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let weight = weight_strategy();
    let op = prop_oneof![
        40 => weight.clone().prop_map(Op::Insert),
        30 => (any::<prop::sample::Index>(), weight).prop_map(|(i, w)| Op::Update(i, w)),
        2 => (0u64..40).prop_map(Op::Skip),
        20 => (0 as Time..3).prop_map(Op::Tick),
        3 => (1 as Time..4).prop_map(Op::Backdate),
    ];
    prop::collection::vec(op, 0..=200)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_with_model(ops in ops_strategy()) {
        let mut t = HexSumTree::new();
        let mut leaves: Vec<Weight> = Vec::new();
        let mut snapshots: BTreeMap<Time, Vec<Weight>> = BTreeMap::new();
        let mut time: Time = 0;
        let mut last_write: Option<Time> = None;

        for op in ops {
            match op {
                Op::Insert(w) => {
                    let key = t.insert(time, w).unwrap();
                    prop_assert_eq!(key, leaves.len() as Key);
                    leaves.push(w);
                    last_write = Some(time);
                }
                Op::Update(idx, w) => {
                    if leaves.is_empty() {
                        prop_assert!(
                            matches!(t.update(time, 0, w), Err(Error::InvalidKey { .. })),
                            "update on an empty tree must fail with InvalidKey"
                        );
                        continue;
                    }
                    let key = idx.index(leaves.len());
                    t.update(time, key as Key, w).unwrap();
                    leaves[key] = w;
                    last_write = Some(time);
                }
                Op::Skip(n) => {
                    let grows = depth_for(t.next_key() + n) > t.depth();
                    t.set_next_key(time, t.next_key() + n).unwrap();
                    leaves.resize(leaves.len() + n as usize, 0);
                    if grows {
                        last_write = Some(time);
                    }
                }
                Op::Tick(dt) => {
                    time += dt;
                    continue;
                }
                Op::Backdate(dt) => {
                    let Some(last) = last_write.filter(|&last| last >= dt) else { continue };
                    let state = t.state();
                    let total = t.total_sum();
                    prop_assert!(
                        matches!(t.insert(last - dt, 1), Err(Error::TimeTravel { .. })),
                        "insert before the last write at {} must fail with TimeTravel",
                        last
                    );
                    prop_assert_eq!(t.state(), state);
                    prop_assert_eq!(t.total_sum(), total);
                    continue;
                }
            }

            prop_assert_eq!(t.state().1, leaves.len() as Key);
            prop_assert_eq!(t.total_sum(), leaves.iter().sum::<Weight>());
            snapshots.insert(time, leaves.clone());
        }

        validate_tree(&t);
        for check_time in 0..=time + 1 {
            match snapshots.range(..=check_time).next_back() {
                Some((&snap_time, snap)) => {
                    check_snapshot(&t, check_time, snap, snap_time == check_time)
                }
                None => check_snapshot(&t, check_time, &[], false),
            }
        }
    }
}

#[test]
fn backdated_insert_after_gap() {
    let mut t = HexSumTree::new();
    for _ in 0..3 {
        t.insert(0, 1).unwrap();
    }
    for _ in 0..13 {
        t.insert(2, 1).unwrap();
    }

    assert!(matches!(t.insert(1, 1), Err(Error::TimeTravel { .. })));
    assert_eq!(t.state(), (1, 16));
    assert_eq!(t.total_sum_at(1), 3);
    validate_tree(&t);
    check_snapshot(&t, 1, &[1; 3], true);
    check_snapshot(&t, 2, &[1; 16], true);
}

#[test]
fn randomized_growth_and_updates() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut t = HexSumTree::new();
    let mut leaves: Vec<Weight> = Vec::new();
    let mut saved: Vec<(Time, Vec<Weight>)> = Vec::new();

    for time in 0..600u64 {
        for _ in 0..8 {
            let w = rng.gen_range(0..10_000);
            t.insert(time, w).unwrap();
            leaves.push(w);
        }
        for _ in 0..4 {
            let key = rng.gen_range(0..leaves.len());
            let w = rng.gen_range(0..10_000);
            t.update(time, key as Key, w).unwrap();
            leaves[key] = w;
        }
        if time % 97 == 0 {
            saved.push((time, leaves.clone()));
        }
    }

    assert_eq!(t.state(), (4, 4_800));
    assert_eq!(t.depth_at(31), 2);
    assert_eq!(t.depth_at(32), 3);
    assert_eq!(t.depth_at(511), 3);
    assert_eq!(t.depth_at(512), 4);

    validate_tree(&t);
    for (time, snap) in &saved {
        check_snapshot(&t, *time, snap, true);
    }
    check_snapshot(&t, 599, &leaves, true);
}

/// Sparse deep tree: a handful of leaves far from key zero, updated over many
/// spaced-out times, then sampled at every time a value changed.
#[test]
fn sparse_deep_tree_rounds() {
    const NODES: u64 = 10;
    const UPDATES: u64 = 30;
    const SAMPLES: usize = 10;
    const TIME_STEP: Time = 243;

    let mut rng = StdRng::seed_from_u64(4);
    let mut t = HexSumTree::new();
    let start = 16u64.pow(5);
    t.set_next_key(0, start).unwrap();
    assert_eq!(t.depth(), 5);

    for _ in 0..NODES {
        t.insert(0, 10).unwrap();
    }
    assert_eq!(t.state(), (6, start + NODES));
    assert_eq!(t.total_sum(), 10 * NODES as Weight);

    let mut time: Time = 0;
    let mut history: Vec<(Time, Weight)> = Vec::new();
    for round in 1..=UPDATES {
        for j in 0..NODES {
            time += TIME_STEP;
            t.update(time, start + j, 10 + Weight::from(round)).unwrap();
            history.push((time, t.total_sum()));
        }
    }

    validate_tree(&t);
    for &(time, total) in &history {
        assert_eq!(t.total_sum_at(time), total);
        let offsets: Vec<Weight> = (0..SAMPLES).map(|_| rng.gen_range(0..total)).collect();
        let keys = t.sortition(&offsets, time).unwrap();
        for (offset, key) in offsets.iter().zip(&keys) {
            assert!((start..start + NODES).contains(key));
            let before: Weight = (start..*key).map(|k| t.item_at(k, time)).sum();
            assert!(before <= *offset && *offset < before + t.item_at(*key, time));
            assert_eq!(t.select(*offset, time).unwrap(), *key);
        }
    }
    assert_eq!(t.total_sum_at(0), 10 * NODES as Weight);
}
