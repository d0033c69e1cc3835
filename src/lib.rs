//! flat-hashmap: an open-addressing hash map with linear probing and
//! tombstone-based deletion.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: one contiguous slot array holding every entry directly, with
//!   amortized O(1) insert/lookup/update/delete and no per-entry
//!   allocations or pointer chasing.
//! - Layers:
//!   - `Table<K, V, S>` (private): the storage layer owning the slot array,
//!     counters, and every probing/growth/compaction algorithm. At each
//!     method boundary the structure is consistent; the only user code it
//!     runs is `K: Hash`/`K: Eq` during probing.
//!   - `FlatMap<K, V, S>` (public): thin wrapper adding a debug-only
//!     reentrancy guard at each entry point plus the trait surface
//!     (`Index`, `Debug`, `Extend`, `FromIterator`, iterators).
//!
//! Core invariants
//! - Each slot is one of three states: empty, occupied, or deleted
//!   (tombstone). Capacity is a power of two, never zero after first use.
//! - A present key occupies exactly one slot, reachable from its home
//!   bucket `hash(k) & (capacity - 1)` by +1 linear probing before any
//!   empty slot. An empty slot is the probe terminator; a tombstone is not.
//! - Tombstones revert to empty only through a whole-table rehash (growth,
//!   `rehash`, or the same-size compaction triggered when tombstones exceed
//!   half of capacity) or `clear`.
//! - The growth check before every insertion keeps
//!   `(live + tombstones) / capacity` within the configured max load factor
//!   (default 0.7, accepted range the open interval (0.1, 0.95)), which
//!   also guarantees at least one empty slot and so bounds every probe.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` by design (no atomics). Callers
//!   needing threads must wrap whole operations in external locking.
//! - Value handles are plain `&mut V` borrows; any later mutating call may
//!   rehash and relocate entries, and the borrow checker rules out holding
//!   a handle across one.
//! - Reentrancy from key `Hash`/`Eq` back into the same map is disallowed
//!   and panics in debug builds; release builds elide the check.
//!
//! Notes and non-goals
//! - Hash values are not cached per slot; rehashing re-hashes every key
//!   (memory density is preferred over rehash speed).
//! - No ordered iteration, no persistence, no non-linear probing.

mod flat_map;
mod flat_map_proptest;
mod reentrancy;

// Public surface
pub use flat_map::{ConfigError, DefaultHashBuilder, FlatMap, Iter, IterMut};
