//! FlatMap: open-addressing storage with linear probing and tombstone deletion.

use crate::reentrancy::ReentrancyFlag;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::mem;
use core::ops::Index;
use core::slice;

/// Default hash capability: fast, non-cryptographic, randomly seeded.
pub type DefaultHashBuilder = ahash::RandomState;

/// Capacity allocated by the first mutating operation on a fresh map.
const INITIAL_CAPACITY: usize = 16;

const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.7;

// Accepted load factors form the open interval (MIN, MAX). Values at or
// below the minimum waste memory pathologically; values at or above the
// maximum make probe chains pathologically long near capacity.
const MIN_LOAD_FACTOR: f32 = 0.1;
const MAX_LOAD_FACTOR: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Requested max load factor falls outside the open interval (0.1, 0.95).
    InvalidLoadFactor,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidLoadFactor => {
                write!(f, "max load factor must lie strictly between 0.1 and 0.95")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Tri-state slot. `Deleted` keeps the probe chain intact for lookups while
/// counting as vacant for insertion; it reverts to `Empty` only through a
/// whole-table rehash or `clear`.
#[derive(Debug)]
enum Slot<K, V> {
    Empty,
    Occupied { key: K, value: V },
    Deleted,
}

/// Outcome of an insertion probe.
enum Probe {
    /// Occupied slot holding an equal key.
    Existing(usize),
    /// Insertion target: the first tombstone seen on the chain, else the
    /// `Empty` slot that terminated it.
    Vacant(usize),
}

fn round_capacity(n: usize) -> usize {
    n.max(2).next_power_of_two()
}

/// Storage layer: slot array, hasher, counters, and every probing algorithm.
/// Runs user code only through `K: Hash`/`K: Eq` during probes; at every
/// method boundary the structure is consistent.
struct Table<K, V, S> {
    hasher: S,
    slots: Vec<Slot<K, V>>,
    /// Number of `Occupied` slots.
    live: usize,
    /// Number of `Deleted` slots (tombstones).
    dead: usize,
    max_load_factor: f32,
}

impl<K, V, S> Table<K, V, S> {
    fn len(&self) -> usize {
        self.live
    }

    fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    fn tombstones(&self) -> usize {
        self.dead
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Empty;
        }
        self.live = 0;
        self.dead = 0;
    }

    fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots.iter(),
            remaining: self.live,
        }
    }

    fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            slots: self.slots.iter_mut(),
            remaining: self.live,
        }
    }
}

impl<K, V, S> Table<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            slots: Vec::new(),
            live: 0,
            dead: 0,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Smallest power-of-two capacity keeping `n` live entries within the
    /// configured load factor.
    fn capacity_for(&self, n: usize) -> usize {
        round_capacity((n as f32 / self.max_load_factor) as usize + 1)
    }

    /// Locate the slot holding `q`, scanning from its home bucket. Stops at
    /// the first `Empty` slot: anything past it cannot belong to the chain.
    fn find_index<Q>(&self, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.mask();
        let mut idx = (self.make_hash(q) as usize) & mask;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Occupied { key, .. } if key.borrow() == q => return Some(idx),
                _ => {}
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Insertion probe: walk the chain for `key`, remembering the first
    /// tombstone. Reusing that tombstone (rather than the terminating
    /// `Empty` slot) keeps chains short after delete/insert churn.
    fn probe<Q>(&self, hash: u64, key: &Q) -> Probe
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        debug_assert!(!self.slots.is_empty());
        let mask = self.mask();
        let mut idx = (hash as usize) & mask;
        let mut first_tombstone = None;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return Probe::Vacant(first_tombstone.unwrap_or(idx)),
                Slot::Deleted => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Occupied { key: k, .. } if k.borrow() == key => {
                    return Probe::Existing(idx)
                }
                Slot::Occupied { .. } => {}
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Growth check, run before every insertion. Guarantees the load-factor
    /// invariant and thereby that at least one `Empty` slot always remains,
    /// which is what bounds every probe loop.
    fn grow_if_needed(&mut self) {
        if self.slots.is_empty() {
            self.rehash(INITIAL_CAPACITY);
        }
        // Loops so a drastically tightened load factor is restored in one
        // call, not merely halved toward compliance.
        while (self.live + self.dead + 1) as f32 / self.slots.len() as f32 > self.max_load_factor
        {
            let doubled = self.slots.len() * 2;
            self.rehash(doubled);
        }
    }

    /// Rebuild the slot array at `bucket_count` (rounded up to a power of
    /// two, minimum 2), re-placing every occupied entry and discarding all
    /// tombstones. The only operation that changes capacity or reverts
    /// tombstones to `Empty`.
    fn rehash(&mut self, bucket_count: usize) {
        // Never shrink below what the live entries need; a table without an
        // `Empty` slot would make probe loops non-terminating.
        let new_cap = round_capacity(bucket_count).max(self.capacity_for(self.live));

        // Build the replacement array in full before the old one is dropped,
        // so an unwinding allocation leaves the previous state intact.
        let mut fresh: Vec<Slot<K, V>> = Vec::with_capacity(new_cap);
        fresh.resize_with(new_cap, || Slot::Empty);

        let old = mem::replace(&mut self.slots, fresh);
        self.live = 0;
        self.dead = 0;
        for slot in old {
            if let Slot::Occupied { key, value } = slot {
                match self.probe(self.make_hash(&key), &key) {
                    Probe::Vacant(idx) => {
                        self.slots[idx] = Slot::Occupied { key, value };
                        self.live += 1;
                    }
                    // Keys were unique in the old array and the fresh one
                    // holds no tombstones.
                    Probe::Existing(_) => unreachable!("duplicate key during rehash"),
                }
            }
        }
    }

    fn insert_or_assign(&mut self, key: K, value: V) -> (&mut V, bool) {
        self.grow_if_needed();
        let hash = self.make_hash(&key);
        match self.probe(hash, &key) {
            Probe::Existing(idx) => match &mut self.slots[idx] {
                Slot::Occupied { value: slot_value, .. } => {
                    *slot_value = value;
                    (slot_value, false)
                }
                _ => unreachable!("probe returned a non-occupied slot as existing"),
            },
            Probe::Vacant(idx) => {
                if matches!(self.slots[idx], Slot::Deleted) {
                    self.dead -= 1;
                }
                self.slots[idx] = Slot::Occupied { key, value };
                self.live += 1;
                match &mut self.slots[idx] {
                    Slot::Occupied { value, .. } => (value, true),
                    _ => unreachable!(),
                }
            }
        }
    }

    fn get_or_insert_with<F>(&mut self, key: K, default: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        if let Some(idx) = self.find_index(&key) {
            return match &mut self.slots[idx] {
                Slot::Occupied { value, .. } => value,
                _ => unreachable!("find_index only returns occupied slots"),
            };
        }
        self.insert_or_assign(key, default()).0
    }

    fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find_index(q).map(|idx| match &self.slots[idx] {
            Slot::Occupied { value, .. } => value,
            _ => unreachable!("find_index only returns occupied slots"),
        })
    }

    fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.find_index(q)?;
        match &mut self.slots[idx] {
            Slot::Occupied { value, .. } => Some(value),
            _ => unreachable!("find_index only returns occupied slots"),
        }
    }

    fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.find_index(q)?;
        let old = mem::replace(&mut self.slots[idx], Slot::Deleted);
        self.live -= 1;
        self.dead += 1;
        // Tombstone-heavy tables degrade every probe; compact at the same
        // capacity once they outnumber half the slots.
        if self.dead > self.slots.len() / 2 {
            let cap = self.slots.len();
            self.rehash(cap);
        }
        match old {
            Slot::Occupied { value, .. } => Some(value),
            _ => unreachable!("find_index only returns occupied slots"),
        }
    }

    fn reserve(&mut self, n: usize) {
        let needed = self.capacity_for(n);
        if needed > self.slots.len() {
            self.rehash(needed);
        }
    }

    fn set_max_load_factor(&mut self, f: f32) -> Result<(), ConfigError> {
        if !(f > MIN_LOAD_FACTOR && f < MAX_LOAD_FACTOR) {
            return Err(ConfigError::InvalidLoadFactor);
        }
        self.max_load_factor = f;
        // A stricter factor may already be exceeded; restore the invariant
        // eagerly. A never-allocated table satisfies it trivially.
        if !self.slots.is_empty() {
            self.grow_if_needed();
        }
        Ok(())
    }
}

/// A hash map storing entries directly in one contiguous slot array.
///
/// Collisions resolve by linear probing with wraparound; deletion leaves a
/// tombstone so later entries on the same chain stay reachable; capacity is
/// always a power of two and doubles when the combined live + tombstone load
/// crosses the configured maximum load factor. Tombstones are purged by a
/// same-size rehash once they exceed half of capacity.
///
/// Hashing is injected as a [`BuildHasher`] type parameter (defaulting to
/// [`DefaultHashBuilder`]); equality comes from `K: Eq`, which must agree
/// with the hash (`a == b` implies equal hashes) or lookups may miss present
/// keys. Lookups accept any borrowed form of the key via the usual
/// `K: Borrow<Q>` pattern.
///
/// Returned `&mut V` handles are plain borrows: any subsequent mutating call
/// may rehash and relocate entries, and the borrow checker enforces that no
/// handle survives across one.
///
/// Single-threaded by design: the map is `!Send`/`!Sync`, and debug builds
/// panic if key `Hash`/`Eq` code re-enters the same map mid-operation.
pub struct FlatMap<K, V, S = DefaultHashBuilder> {
    // The guard lives beside the storage, not inside it, so guarded methods
    // can reborrow `self.table` mutably while the guard is held.
    table: Table<K, V, S>,
    reentrancy: ReentrancyFlag,
}

impl<K, V> FlatMap<K, V>
where
    K: Eq + Hash,
{
    /// Empty map with capacity 0; the first mutating operation allocates
    /// 16 slots.
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Empty map pre-sized to `bucket_count` slots, rounded up to the next
    /// power of two (minimum 2). A hint of 0 allocates nothing.
    pub fn with_capacity(bucket_count: usize) -> Self {
        Self::with_capacity_and_hasher(bucket_count, DefaultHashBuilder::default())
    }
}

impl<K, V, S> Default for FlatMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> FlatMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            table: Table::with_hasher(hasher),
            reentrancy: ReentrancyFlag::new(),
        }
    }

    pub fn with_capacity_and_hasher(bucket_count: usize, hasher: S) -> Self {
        let mut map = Self::with_hasher(hasher);
        if bucket_count > 0 {
            map.table.rehash(bucket_count);
        }
        map
    }

    /// Insert `value` under `key`, overwriting in place if the key is already
    /// present. Returns a handle to the stored value and `true` iff the key
    /// was newly inserted.
    pub fn insert_or_assign(&mut self, key: K, value: V) -> (&mut V, bool) {
        let _g = self.reentrancy.enter();
        self.table.insert_or_assign(key, value)
    }

    /// Read-only lookup. Never allocates or mutates any bookkeeping.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        self.table.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        self.table.get_mut(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        self.table.find_index(key).is_some()
    }

    /// Handle to the value under `key`, inserting `default()` first if the
    /// key is absent. The closure runs only on an actual insert.
    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter();
        self.table.get_or_insert_with(key, default)
    }

    /// The indexing operator of the source design: lookup, inserting
    /// `V::default()` on a miss.
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        let _g = self.reentrancy.enter();
        self.table.get_or_insert_with(key, V::default)
    }

    /// Remove `key`, returning its value. A tombstone is left in the slot so
    /// probe chains running through it stay intact; once tombstones exceed
    /// half of capacity the table compacts via a same-size rehash.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        self.table.remove(key)
    }

    /// Rebuild the table with at least `bucket_count` slots (rounded up to a
    /// power of two), dropping every tombstone. Never shrinks below what the
    /// live entries require.
    pub fn rehash(&mut self, bucket_count: usize) {
        let _g = self.reentrancy.enter();
        self.table.rehash(bucket_count);
    }

    /// Grow up-front so `n` entries fit without exceeding the maximum load
    /// factor. Never shrinks.
    pub fn reserve(&mut self, n: usize) {
        let _g = self.reentrancy.enter();
        self.table.reserve(n);
    }

    /// Set the maximum load factor, which must lie strictly between 0.1 and
    /// 0.95. On success the growth invariant is re-checked immediately, which
    /// may rehash; on failure the map is untouched.
    pub fn set_max_load_factor(&mut self, f: f32) -> Result<(), ConfigError> {
        let _g = self.reentrancy.enter();
        self.table.set_max_load_factor(f)
    }
}

impl<K, V, S> FlatMap<K, V, S> {
    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Current capacity of the slot array: zero before first use, a power of
    /// two afterwards.
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Number of tombstoned slots awaiting the next rehash.
    pub fn tombstones(&self) -> usize {
        self.table.tombstones()
    }

    pub fn max_load_factor(&self) -> f32 {
        self.table.max_load_factor
    }

    pub fn hasher(&self) -> &S {
        &self.table.hasher
    }

    /// Reset every slot to empty, keeping the current capacity.
    pub fn clear(&mut self) {
        let _g = self.reentrancy.enter();
        self.table.clear();
    }

    /// Iterate over entries in unspecified (table) order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.table.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        self.table.iter_mut()
    }
}

impl<K, V, S> fmt::Debug for FlatMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, Q, V, S> Index<&Q> for FlatMap<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Eq + Hash,
    S: BuildHasher,
{
    type Output = V;

    /// Panics if the key is absent, like `std::collections::HashMap`.
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not present in FlatMap")
    }
}

impl<K, V, S> Extend<(K, V)> for FlatMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(self.len() + lower);
        for (key, value) in iter {
            self.insert_or_assign(key, value);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for FlatMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

/// Iterator over the occupied slots of a [`FlatMap`].
pub struct Iter<'a, K, V> {
    slots: slice::Iter<'a, Slot<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied { key, value } = slot {
                self.remaining -= 1;
                return Some((key, value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Mutable-value iterator over the occupied slots of a [`FlatMap`].
pub struct IterMut<'a, K, V> {
    slots: slice::IterMut<'a, Slot<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied { key, value } = slot {
                self.remaining -= 1;
                return Some((&*key, value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<'a, K, V, S> IntoIterator for &'a FlatMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut FlatMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::hash::Hasher;
    use std::cell::Cell;
    use std::collections::BTreeSet;

    /// Build hasher sending every key to the same fixed hash value, to pin
    /// home buckets and force collision chains.
    #[derive(Clone, Default)]
    struct FixedBuildHasher(u64);
    struct FixedHasher(u64);
    impl BuildHasher for FixedBuildHasher {
        type Hasher = FixedHasher;
        fn build_hasher(&self) -> FixedHasher {
            FixedHasher(self.0)
        }
    }
    impl Hasher for FixedHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            self.0
        }
    }

    /// Invariant: A fresh map owns no storage; lookups and removals on it are
    /// no-ops rather than allocations.
    #[test]
    fn fresh_map_has_no_storage() {
        let mut m: FlatMap<String, i32> = FlatMap::new();
        assert_eq!(m.len(), 0);
        assert!(m.is_empty());
        assert_eq!(m.bucket_count(), 0);
        assert_eq!(m.tombstones(), 0);
        assert_eq!(m.get("absent"), None);
        assert_eq!(m.remove("absent"), None);
        assert!(!m.contains_key("absent"));
        assert_eq!(m.bucket_count(), 0, "read paths must not allocate");
    }

    /// Invariant: The first insertion on a never-allocated map brings the
    /// table to the initial capacity of 16.
    #[test]
    fn first_insert_allocates_initial_capacity() {
        let mut m: FlatMap<i32, i32> = FlatMap::new();
        m.insert_or_assign(1, 1);
        assert_eq!(m.bucket_count(), INITIAL_CAPACITY);
    }

    /// Invariant: Capacity hints round up to the next power of two with a
    /// minimum of 2; a hint of zero allocates nothing.
    #[test]
    fn capacity_hint_rounds_to_power_of_two() {
        let m: FlatMap<i32, i32> = FlatMap::with_capacity(3);
        assert_eq!(m.bucket_count(), 4);
        let m: FlatMap<i32, i32> = FlatMap::with_capacity(1);
        assert_eq!(m.bucket_count(), 2);
        let m: FlatMap<i32, i32> = FlatMap::with_capacity(0);
        assert_eq!(m.bucket_count(), 0);
        let m: FlatMap<i32, i32> = FlatMap::with_capacity(16);
        assert_eq!(m.bucket_count(), 16);
    }

    /// Invariant: `insert_or_assign` reports whether the key was new and
    /// overwrites in place on a duplicate without changing `len`.
    #[test]
    fn insert_or_assign_overwrites_in_place() {
        let mut m: FlatMap<String, i32> = FlatMap::new();
        let (v, inserted) = m.insert_or_assign("k".to_string(), 1);
        assert_eq!((*v, inserted), (1, true));
        let (v, inserted) = m.insert_or_assign("k".to_string(), 2);
        assert_eq!((*v, inserted), (2, false));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("k"), Some(&2));
    }

    /// Invariant: Borrowed lookup works (store `String`, query with `&str`).
    #[test]
    fn borrowed_lookup_with_str() {
        let mut m: FlatMap<String, i32> = FlatMap::new();
        m.insert_or_assign("hello".to_string(), 1);
        assert!(m.contains_key("hello"));
        assert!(!m.contains_key("world"));
        assert_eq!(m.get("hello"), Some(&1));
        assert_eq!(m.get_mut("hello").map(|v| *v), Some(1));
    }

    /// Invariant: Probing wraps around the end of the slot array. With every
    /// key hashed to the last bucket, chains must spill into index 0.
    #[test]
    fn probe_wraps_around_capacity() {
        let mut m: FlatMap<i32, &str, FixedBuildHasher> =
            FlatMap::with_capacity_and_hasher(16, FixedBuildHasher(15));
        m.insert_or_assign(1, "a");
        m.insert_or_assign(2, "b");
        m.insert_or_assign(3, "c");
        assert_eq!(m.bucket_count(), 16);
        assert_eq!(m.get(&1), Some(&"a"));
        assert_eq!(m.get(&2), Some(&"b"));
        assert_eq!(m.get(&3), Some(&"c"));
    }

    /// Invariant: Erasing mid-chain leaves a tombstone, so keys placed past
    /// it on the same chain remain reachable.
    #[test]
    fn erase_mid_chain_keeps_later_keys_reachable() {
        let mut m: FlatMap<i32, i32, FixedBuildHasher> =
            FlatMap::with_capacity_and_hasher(16, FixedBuildHasher(0));
        for k in 0..5 {
            m.insert_or_assign(k, k * 10);
        }
        assert_eq!(m.remove(&2), Some(20));
        assert_eq!(m.tombstones(), 1);
        // Keys 3 and 4 sit past the tombstone on the same chain.
        assert_eq!(m.get(&3), Some(&30));
        assert_eq!(m.get(&4), Some(&40));
        assert_eq!(m.get(&2), None);
    }

    /// Invariant: Re-inserting on a chain with a tombstone reuses the first
    /// tombstone instead of consuming a fresh empty slot.
    #[test]
    fn reinsert_reuses_first_tombstone() {
        let mut m: FlatMap<i32, i32, FixedBuildHasher> =
            FlatMap::with_capacity_and_hasher(16, FixedBuildHasher(0));
        for k in 0..4 {
            m.insert_or_assign(k, k);
        }
        m.remove(&1);
        assert_eq!(m.tombstones(), 1);
        m.insert_or_assign(9, 9);
        assert_eq!(m.tombstones(), 0, "new entry must reclaim the tombstone");
        assert_eq!(m.len(), 4);
        for k in [0, 2, 3, 9] {
            assert!(m.contains_key(&k));
        }
    }

    /// Invariant: Growth preserves every entry, keeps capacity a power of
    /// two, and keeps combined live + tombstone load within the max factor.
    #[test]
    fn growth_rehash_preserves_entries() {
        let mut m: FlatMap<i32, i32> = FlatMap::new();
        for k in 0..100 {
            m.insert_or_assign(k, k * 2);
            assert!(m.bucket_count().is_power_of_two());
            let load = (m.len() + m.tombstones()) as f32 / m.bucket_count() as f32;
            assert!(load <= m.max_load_factor());
        }
        assert_eq!(m.len(), 100);
        for k in 0..100 {
            assert_eq!(m.get(&k), Some(&(k * 2)));
        }
    }

    /// Invariant: Rehash drops tombstones and never shrinks below what the
    /// live entries need, so probe loops stay bounded.
    #[test]
    fn rehash_never_starves_probing() {
        let mut m: FlatMap<i32, i32> = FlatMap::new();
        for k in 0..10 {
            m.insert_or_assign(k, k);
        }
        m.remove(&0);
        assert_eq!(m.tombstones(), 1);
        m.rehash(2);
        assert_eq!(m.tombstones(), 0);
        // 9 live entries at factor 0.7 need ceil(9/0.7)+1 = 13 -> 16 slots.
        assert_eq!(m.bucket_count(), 16);
        for k in 1..10 {
            assert_eq!(m.get(&k), Some(&k));
        }
    }

    /// Invariant: Load factors outside the open interval (0.1, 0.95) are
    /// rejected and leave the map untouched.
    #[test]
    fn load_factor_validation() {
        let mut m: FlatMap<i32, i32> = FlatMap::with_capacity(16);
        m.insert_or_assign(1, 1);
        for bad in [0.0, 0.1, 0.95, 1.0, f32::NAN] {
            assert_eq!(
                m.set_max_load_factor(bad),
                Err(ConfigError::InvalidLoadFactor)
            );
            assert_eq!(m.max_load_factor(), DEFAULT_MAX_LOAD_FACTOR);
            assert_eq!(m.bucket_count(), 16);
            assert_eq!(m.len(), 1);
        }
        assert_eq!(m.set_max_load_factor(0.5), Ok(()));
        assert_eq!(m.max_load_factor(), 0.5);
    }

    /// Invariant: Tightening the load factor rehashes eagerly until the
    /// growth invariant holds again.
    #[test]
    fn tightened_load_factor_rehashes_eagerly() {
        let mut m: FlatMap<i32, i32> = FlatMap::with_capacity(16);
        for k in 0..10 {
            m.insert_or_assign(k, k);
        }
        assert_eq!(m.bucket_count(), 16);
        m.set_max_load_factor(0.2).unwrap();
        // (10 live + 1) / capacity must not exceed 0.2: 64 slots.
        assert_eq!(m.bucket_count(), 64);
        for k in 0..10 {
            assert_eq!(m.get(&k), Some(&k));
        }
    }

    /// Invariant: `get_or_insert_with` runs its closure only on an actual
    /// insert, never on a hit.
    #[test]
    fn get_or_insert_with_is_lazy() {
        let mut m: FlatMap<String, String> = FlatMap::new();
        let calls = Cell::new(0);

        let v = m.get_or_insert_with("k".to_string(), || {
            calls.set(calls.get() + 1);
            "v".to_string()
        });
        assert_eq!(v, "v");
        assert_eq!(calls.get(), 1);

        let v = m.get_or_insert_with("k".to_string(), || {
            calls.set(calls.get() + 1);
            "v2".to_string()
        });
        assert_eq!(v, "v", "hit must keep the stored value");
        assert_eq!(calls.get(), 1, "closure must not run on a hit");
    }

    /// Invariant: `get_or_insert_default` inserts exactly once and then
    /// keeps returning the same entry, mutably.
    #[test]
    fn get_or_insert_default_behaves_like_index_operator() {
        let mut m: FlatMap<i32, String> = FlatMap::new();
        assert_eq!(m.get_or_insert_default(3), "");
        *m.get_or_insert_default(3) = "cherry".to_string();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(&3), Some(&"cherry".to_string()));
    }

    /// Invariant: `clear` empties the map but keeps the allocated capacity.
    #[test]
    fn clear_keeps_capacity() {
        let mut m: FlatMap<i32, i32> = FlatMap::new();
        for k in 0..20 {
            m.insert_or_assign(k, k);
        }
        m.remove(&0);
        let cap = m.bucket_count();
        m.clear();
        assert_eq!(m.len(), 0);
        assert_eq!(m.tombstones(), 0);
        assert_eq!(m.bucket_count(), cap);
        assert_eq!(m.get(&1), None);
        // The cleared table is immediately reusable.
        m.insert_or_assign(1, 1);
        assert_eq!(m.get(&1), Some(&1));
    }

    /// Invariant: `reserve` sizes the table for the requested entry count in
    /// one step and never shrinks.
    #[test]
    fn reserve_grows_once_and_never_shrinks() {
        let mut m: FlatMap<i32, i32> = FlatMap::new();
        m.reserve(8);
        // ceil(8 / 0.7) + 1 = 12 -> next power of two is 16.
        assert_eq!(m.bucket_count(), 16);
        let cap = m.bucket_count();
        m.reserve(1);
        assert_eq!(m.bucket_count(), cap);
        for k in 0..8 {
            m.insert_or_assign(k, k);
        }
        assert_eq!(m.bucket_count(), 16, "reserved inserts must not grow");
    }

    /// Invariant: Iteration yields each live entry exactly once, skipping
    /// tombstones; `iter_mut` updates values as seen by later lookups.
    #[test]
    fn iteration_and_mutation() {
        let mut m: FlatMap<String, i32> = FlatMap::new();
        for (i, k) in ["k1", "k2", "k3"].iter().enumerate() {
            m.insert_or_assign((*k).to_string(), i as i32);
        }
        m.remove("k2");

        let seen: BTreeSet<String> = m.iter().map(|(k, _)| k.clone()).collect();
        let expected: BTreeSet<String> =
            ["k1", "k3"].iter().map(|s| (*s).to_string()).collect();
        assert_eq!(seen, expected);
        assert_eq!(m.iter().len(), 2);

        for (_, v) in m.iter_mut() {
            *v += 10;
        }
        assert_eq!(m.get("k1"), Some(&10));
        assert_eq!(m.get("k3"), Some(&12));
    }

    /// Invariant: `FromIterator`/`Extend` load all pairs with last-write-wins
    /// semantics for duplicate keys.
    #[test]
    fn from_iterator_and_extend() {
        let m: FlatMap<i32, i32> = (0..50).map(|k| (k, k)).collect();
        assert_eq!(m.len(), 50);
        assert_eq!(m.get(&49), Some(&49));

        let mut m: FlatMap<i32, i32> = FlatMap::new();
        m.extend([(1, 1), (2, 2), (1, 10)]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(&1), Some(&10));
    }

    /// Invariant: `Index` panics on a missing key, matching the std map.
    #[test]
    fn index_reads_present_keys() {
        let mut m: FlatMap<String, i32> = FlatMap::new();
        m.insert_or_assign("k".to_string(), 7);
        assert_eq!(m["k"], 7);
    }

    #[test]
    #[should_panic(expected = "key not present")]
    fn index_panics_on_missing_key() {
        let m: FlatMap<String, i32> = FlatMap::new();
        let _ = m["missing"];
    }

    /// Invariant (debug-only): Re-entering the map from `K: Eq` during a
    /// probe panics via the reentrancy guard.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_probe() {
        struct ReentryKey {
            id: &'static str,
            map: *const FlatMap<ReentryKey, i32, FixedBuildHasher>,
            trigger: bool,
        }
        impl PartialEq for ReentryKey {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                if other.trigger {
                    // Re-enter the same map mid-probe.
                    unsafe {
                        let m = &*other.map;
                        let _ = m.len();
                        let _ = m.get(other.id);
                    }
                }
                false
            }
        }
        impl Eq for ReentryKey {}
        impl Hash for ReentryKey {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
        impl Borrow<str> for ReentryKey {
            fn borrow(&self) -> &str {
                self.id
            }
        }

        let mut m: FlatMap<ReentryKey, i32, FixedBuildHasher> =
            FlatMap::with_hasher(FixedBuildHasher(0));
        let mut key = ReentryKey {
            id: "a",
            map: core::ptr::null(),
            trigger: false,
        };
        key.map = &m as *const _;
        m.insert_or_assign(key, 1);

        let query = ReentryKey {
            id: "b",
            map: &m as *const _,
            trigger: true,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = m.get(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }

    /// Invariant: Debug formatting renders as a map without requiring `Eq`
    /// or a hasher bound.
    #[test]
    fn debug_formats_as_map() {
        let mut m: FlatMap<&str, i32> = FlatMap::new();
        m.insert_or_assign("a", 1);
        assert_eq!(format!("{m:?}"), r#"{"a": 1}"#);
    }
}
