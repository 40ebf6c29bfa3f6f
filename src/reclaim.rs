//! Unifying contract over the two reclamation schemes (spec §4.1).
//!
//! The map back-ends are written generically over any type implementing
//! [`Reclaim`] so that a caller can choose quiescent-state RCU
//! ([`crate::epoch`]) or hazard pointers ([`crate::hp`]) without the map code
//! caring which. Both guards already expose a `retire<T>` method with the
//! same contract: it returns immediately, the pointer is unreachable to new
//! operations before the call, and the pointee is freed exactly once, at
//! some later point when no live operation can still hold a reference. This
//! trait just names that shared contract so generic map code can require it
//! as a bound.

/// A per-thread reclamation guard: publishes hazard/epoch state while held,
/// and accepts retired pointers for deferred freeing.
///
/// # Safety
/// Implementations must not free a retired pointer while any live operation
/// registered with the same scheme could still dereference it.
pub unsafe trait Reclaim {
    /// Defer freeing `ptr` until safe. `ptr` must not be dereferenced by the
    /// caller after this call.
    ///
    /// # Safety
    /// `ptr` must have been allocated in a way compatible with being dropped
    /// as `Box<T>` (both [`crate::epoch::Guard`] and [`crate::hp::HpGuard`]
    /// free retired nodes this way), and must not be retired twice.
    unsafe fn retire<T>(&self, ptr: *mut T);
}

unsafe impl Reclaim for crate::epoch::Guard<'_> {
    #[inline]
    unsafe fn retire<T>(&self, ptr: *mut T) {
        self.defer_free(ptr);
    }
}

unsafe impl Reclaim for crate::hp::HpGuard<'_> {
    #[inline]
    unsafe fn retire<T>(&self, ptr: *mut T) {
        crate::hp::HpGuard::retire(self, ptr);
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "reclaim_hazard")] {
        /// The reclamation scheme a caller gets by constructing
        /// `DefaultReclaim::new()` and calling `.register()` on it, chosen
        /// at build time by the `reclaim_hazard` feature. Off by default
        /// (quiescent-state RCU); on, hazard pointers. Both
        /// `epoch::Epoch`/`hp::HazardPointers` expose the same `const fn
        /// new() -> Self` and `fn register(&self) -> <a Reclaim guard>`
        /// shape, so this alias is a drop-in swap for either.
        pub type DefaultReclaim = crate::hp::HazardPointers;
    } else {
        /// See the `reclaim_hazard`-feature variant of this alias above.
        pub type DefaultReclaim = crate::epoch::Epoch;
    }
}
