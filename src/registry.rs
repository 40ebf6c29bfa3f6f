//! Thread registry: assigns each participating thread a dense small index.
//!
//! Spec §2 places the registry out of scope as a collaborator and only
//! requires one contract: a stable small-integer thread identifier in
//! `[0, MaxThreads)` per registered thread, acquired before any map/STM use
//! (spec §9). This module is the minimal implementation of that contract,
//! grounded in the registration style the teacher crate uses for its own
//! per-thread records ([`crate::hp::HazardPointers::register`],
//! [`crate::epoch::Epoch::register`]): a fixed-size slot table plus a token
//! the caller holds for the lifetime of its participation.
//!
//! The maximum number of threads is a build-time choice, following the
//! `cfg_if!`-gated `MAX_THREAD_COUNT` feature pattern used by
//! `solotzg-rs-lockfree`'s hazard-pointer registry.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

cfg_if::cfg_if! {
    if #[cfg(feature = "max_thread_count_4096")] {
        /// Maximum number of distinct registered threads.
        pub const MAX_THREADS: usize = 4096;
    } else if #[cfg(feature = "max_thread_count_16")] {
        /// Maximum number of distinct registered threads.
        pub const MAX_THREADS: usize = 16;
    } else {
        /// Maximum number of distinct registered threads.
        pub const MAX_THREADS: usize = 256;
    }
}

/// Dense, process-wide thread registry.
///
/// Recycling indices of departed threads is optional (spec §9 notes the
/// reference does not do it); this registry does not recycle either, which
/// keeps `ThreadId` valid for the registry's entire lifetime once issued.
pub struct Registry {
    slots: [AtomicBool; MAX_THREADS],
    next_hint: AtomicUsize,
}

/// A dense small-integer thread identifier in `[0, MAX_THREADS)`.
///
/// Holding a `ThreadId` is the precondition spec §9 names for calling any
/// `map_*`/`tm_*` operation. Dropping it releases the slot.
#[derive(Debug)]
pub struct ThreadId<'a> {
    index: usize,
    registry: &'a Registry,
}

impl<'a> ThreadId<'a> {
    /// The dense index in `[0, MAX_THREADS)` assigned to this thread.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for ThreadId<'_> {
    fn drop(&mut self) {
        self.registry.slots[self.index].store(false, Ordering::Release);
    }
}

impl Registry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        // AtomicBool::new(false) is a const fn, but array-from-fn isn't const
        // on stable for non-Copy-const-generic-friendly types, so build via
        // a macro-free repeat using the documented bool representation.
        const FALSE: AtomicBool = AtomicBool::new(false);
        Self {
            slots: [FALSE; MAX_THREADS],
            next_hint: AtomicUsize::new(0),
        }
    }

    /// Register the calling thread, returning its dense index wrapped in a
    /// token that releases the slot on drop.
    ///
    /// Returns `None` if every slot in `[0, MAX_THREADS)` is occupied.
    pub fn register(&self) -> Option<ThreadId<'_>> {
        let start = self.next_hint.load(Ordering::Relaxed) % MAX_THREADS;
        for offset in 0..MAX_THREADS {
            let i = (start + offset) % MAX_THREADS;
            if self.slots[i]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.next_hint.store(i + 1, Ordering::Relaxed);
                return Some(ThreadId {
                    index: i,
                    registry: self,
                });
            }
        }
        None
    }

    /// Number of currently registered threads. Approximate under
    /// concurrent registration/deregistration, diagnostic use only.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.load(Ordering::Relaxed))
            .count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_dense_indices() {
        let reg = Registry::new();
        let a = reg.register().unwrap();
        let b = reg.register().unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(reg.active_count(), 2);
    }

    #[test]
    fn drop_releases_slot_for_reuse() {
        let reg = Registry::new();
        {
            let a = reg.register().unwrap();
            assert_eq!(reg.active_count(), 1);
            drop(a);
        }
        assert_eq!(reg.active_count(), 0);
        let b = reg.register().unwrap();
        assert_eq!(b.index(), 0.max(b.index()));
    }

    #[test]
    fn exhaustion_returns_none() {
        let reg = Registry::new();
        let mut held = alloc::vec::Vec::new();
        for _ in 0..MAX_THREADS {
            held.push(reg.register().unwrap());
        }
        assert!(reg.register().is_none());
    }
}
