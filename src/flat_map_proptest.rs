#![cfg(test)]

// Property tests for FlatMap kept inside the crate so they can assert on
// tombstone bookkeeping without exposing more surface than `tombstones()`.

use crate::FlatMap;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::rc::Rc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Candidate load factors for the setter op: mixes accepted values with the
// boundary and out-of-range ones that must be rejected.
const LOAD_FACTORS: [f32; 8] = [0.0, 0.1, 0.2, 0.5, 0.7, 0.9, 0.95, 1.0];

fn load_factor_is_valid(f: f32) -> bool {
    f > 0.1 && f < 0.95
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertLazy(usize, i32),
    Remove(usize),
    Get(usize),
    Contains(String),
    Mutate(usize, i32),
    Iterate,
    Clear,
    Reserve(usize),
    Rehash(usize),
    SetLoadFactor(usize),
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertLazy(i, v)),
            3 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::Get),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Clear),
            1 => (0usize..64).prop_map(OpI::Reserve),
            1 => (0usize..64).prop_map(OpI::Rehash),
            1 => (0usize..LOAD_FACTORS.len()).prop_map(OpI::SetLoadFactor),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Shared state-machine runner, checked against std::collections::HashMap as
// the model. Invariants exercised across random operation sequences:
// - Round-trip: `get` returns the most recently assigned value per key.
// - `insert_or_assign` reports new-vs-overwrite exactly when the model does;
//   `get_or_insert_with` runs its closure only on actual inserts.
// - `remove` returns the model's value for present keys, `None` otherwise,
//   and removal is idempotent.
// - Structural invariants after every op: capacity zero or a power of two,
//   tombstones never exceed half of capacity, and combined live + tombstone
//   load stays within the configured max load factor.
// - `len`/`is_empty` parity and iterator key-set parity with the model.
fn run_scenario<S: BuildHasher>(
    sut: &mut FlatMap<Key, i32, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Key, i32> = HashMap::new();
    let lazy_calls = Rc::new(Cell::new(0));
    let mut max_load_factor = 0.7f32;

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let (stored, inserted) = sut.insert_or_assign(k.clone(), v);
                prop_assert_eq!(*stored, v);
                prop_assert_eq!(inserted, !already);
                model.insert(k, v);
            }
            OpI::InsertLazy(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let counter = lazy_calls.clone();
                let before = counter.get();
                let stored = *sut.get_or_insert_with(k.clone(), move || {
                    counter.set(counter.get() + 1);
                    v
                });
                if already {
                    prop_assert_eq!(stored, model[&k], "hit must keep stored value");
                    prop_assert_eq!(lazy_calls.get(), before, "closure must not run on hit");
                } else {
                    prop_assert_eq!(stored, v);
                    prop_assert_eq!(lazy_calls.get(), before + 1);
                    model.insert(k, v);
                }
            }
            OpI::Remove(i) => {
                let k = key_from(pool, i);
                let removed = sut.remove(&k);
                prop_assert_eq!(removed, model.remove(&k));
                // Idempotence: a second erase of the same key is a no-op.
                prop_assert_eq!(sut.remove(&k), None);
            }
            OpI::Get(i) => {
                let k = key_from(pool, i);
                prop_assert_eq!(sut.get(&k), model.get(&k));
                prop_assert_eq!(sut.contains_key(&k), model.contains_key(&k));
            }
            OpI::Contains(s) => {
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(sut.contains_key(s.as_str()), has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                match (sut.get_mut(&k), model.get_mut(&k)) {
                    (Some(v), Some(mv)) => {
                        *v = v.saturating_add(d);
                        *mv = mv.saturating_add(d);
                    }
                    (None, None) => {}
                    _ => prop_assert!(false, "presence must match the model"),
                }
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(k, _)| k.clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
            }
            OpI::Clear => {
                let cap = sut.bucket_count();
                sut.clear();
                model.clear();
                prop_assert_eq!(sut.bucket_count(), cap, "clear keeps capacity");
                prop_assert_eq!(sut.tombstones(), 0);
            }
            OpI::Reserve(n) => {
                let cap = sut.bucket_count();
                sut.reserve(n);
                prop_assert!(sut.bucket_count() >= cap, "reserve never shrinks");
            }
            OpI::Rehash(n) => {
                sut.rehash(n);
                prop_assert_eq!(sut.tombstones(), 0, "rehash purges tombstones");
            }
            OpI::SetLoadFactor(i) => {
                let f = LOAD_FACTORS[i];
                let res = sut.set_max_load_factor(f);
                if load_factor_is_valid(f) {
                    prop_assert!(res.is_ok());
                    max_load_factor = f;
                } else {
                    prop_assert!(res.is_err());
                }
                prop_assert!(sut.max_load_factor() == max_load_factor);
            }
        }

        // Post-conditions after each op
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        let cap = sut.bucket_count();
        if cap == 0 {
            prop_assert_eq!(sut.tombstones(), 0);
        } else {
            prop_assert!(cap.is_power_of_two());
            prop_assert!(cap >= 2);
            prop_assert!(sut.tombstones() <= cap / 2);
            let load = (sut.len() + sut.tombstones()) as f32 / cap as f32;
            prop_assert!(
                load <= sut.max_load_factor(),
                "load {} exceeds factor {}",
                load,
                sut.max_load_factor()
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let mut sut: FlatMap<Key, i32> = FlatMap::new();
        run_scenario(&mut sut, &pool, ops)?;
    }
}

// Collision variant using a constant hasher: every key lands in the same
// home bucket, so correctness rests entirely on linear probing, wraparound,
// and tombstone-chain integrity.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let mut sut: FlatMap<Key, i32, ConstBuildHasher> =
            FlatMap::with_hasher(ConstBuildHasher);
        run_scenario(&mut sut, &pool, ops)?;
    }
}
