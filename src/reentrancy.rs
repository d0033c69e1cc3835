//! Debug-only reentrancy detection.
//!
//! Probing runs user `Hash`/`Eq` code while the table may be mid-mutation. In
//! debug builds this flag turns a nested call back into the same map into a
//! panic instead of silent state corruption; release builds compile the whole
//! mechanism to a no-op.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-map flag. Public entry points hold the guard returned by
/// [`ReentrancyFlag::enter`] for their whole body.
#[derive(Debug)]
pub(crate) struct ReentrancyFlag {
    #[cfg(debug_assertions)]
    entered: Cell<bool>,
    // Also pins the owning map to one thread (!Send + !Sync).
    _single_thread: PhantomData<*mut ()>,
}

impl ReentrancyFlag {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            entered: Cell::new(false),
            _single_thread: PhantomData,
        }
    }

    /// Enter a guarded section. Panics in debug builds if a guard is already
    /// outstanding.
    #[inline]
    pub(crate) fn enter(&self) -> EntryGuard<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.entered.replace(true),
                "reentrant call into the map from key Hash/Eq"
            );
            return EntryGuard { flag: self };
        }

        #[cfg(not(debug_assertions))]
        {
            return EntryGuard { _flag: PhantomData };
        }
    }
}

impl Default for ReentrancyFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard clearing the flag on drop.
pub(crate) struct EntryGuard<'a> {
    #[cfg(debug_assertions)]
    flag: &'a ReentrancyFlag,
    #[cfg(not(debug_assertions))]
    _flag: PhantomData<&'a ()>,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.flag.entered.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::ReentrancyFlag;

    #[test]
    fn sequential_entries_are_fine() {
        let flag = ReentrancyFlag::new();
        drop(flag.enter());
        drop(flag.enter());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn nested_entry_panics_in_debug() {
        let flag = ReentrancyFlag::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _outer = flag.enter();
            let _inner = flag.enter();
        }));
        assert!(res.is_err(), "nested entry must panic in debug builds");
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn nested_entry_is_noop_in_release() {
        let flag = ReentrancyFlag::new();
        let _outer = flag.enter();
        let _inner = flag.enter();
    }
}
