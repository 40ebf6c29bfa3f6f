//! Hazard pointer memory reclamation (spec §4.1).
//!
//! Hazard pointers provide safe memory reclamation for lock-free data
//! structures. Each thread owns a fixed small set of "static" hazard slots
//! plus a dynamically growable list (spec: "a fixed small set of static
//! hazard slots plus a dynamically growable list"); the growable part is a
//! linked chain of [`HazardChunk`]s appended lazily as a thread protects more
//! concurrent pointers than the static array holds. Before dereferencing a
//! shared pointer, the reader publishes it in a hazard slot and re-reads the
//! source to confirm it is still current. On retire, if the retire list
//! exceeds a threshold, the retiring thread scans every hazard slot across
//! every thread (static and chained) and frees any retired pointer absent
//! from that scan.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Number of static hazard slots a thread gets without growing.
const HP_PER_THREAD: usize = 4;

/// Slots added per growable chunk once the static set is exhausted.
const HP_CHUNK_SIZE: usize = 4;

/// Threshold for triggering garbage collection.
const SCAN_THRESHOLD: usize = 2 * HP_PER_THREAD;

/// One link in a thread's growable hazard slot chain. Chunks are appended,
/// never removed or reallocated in place, so a reference into one stays
/// valid for the chain's lifetime; only the owning thread appends.
struct HazardChunk {
    slots: [AtomicPtr<()>; HP_CHUNK_SIZE],
    next: AtomicPtr<HazardChunk>,
}

impl HazardChunk {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A hazard pointer record for a thread.
#[repr(C)]
pub struct HpRecord {
    hazards: [AtomicPtr<()>; HP_PER_THREAD],
    extra: AtomicPtr<HazardChunk>,
    next: AtomicPtr<HpRecord>,
    active: AtomicUsize,
    retire_list: UnsafeCell<Vec<RetiredNode>>,
}

struct RetiredNode {
    ptr: *mut (),
    free_fn: unsafe fn(*mut ()),
}

impl HpRecord {
    fn new() -> Self {
        Self {
            hazards: core::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            extra: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            active: AtomicUsize::new(1),
            retire_list: UnsafeCell::new(Vec::new()),
        }
    }

    /// The chunk holding dynamic slot `index`, growing the chain if needed.
    /// Only the owning thread ever calls this, so no CAS race is possible;
    /// other threads only read the chain via `scan`'s `Acquire` loads.
    fn chunk_for(&self, index: usize) -> &HazardChunk {
        let target = index / HP_CHUNK_SIZE;
        let mut link = &self.extra;
        let mut depth = 0;
        loop {
            let mut cur = link.load(Ordering::Acquire);
            if cur.is_null() {
                let fresh = Box::into_raw(Box::new(HazardChunk::new()));
                link.store(fresh, Ordering::Release);
                cur = fresh;
            }
            if depth == target {
                return unsafe { &*cur };
            }
            depth += 1;
            link = unsafe { &(*cur).next };
        }
    }
}

/// Global hazard pointer state.
pub struct HazardPointers {
    records: AtomicPtr<HpRecord>,
}

impl HazardPointers {
    /// Create a new hazard pointer instance.
    pub const fn new() -> Self {
        Self {
            records: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Register the current thread.
    pub fn register(&self) -> HpGuard<'_> {
        let record = Box::into_raw(Box::new(HpRecord::new()));

        // Add to linked list
        loop {
            let head = self.records.load(Ordering::Relaxed);
            unsafe {
                (*record).next.store(head, Ordering::Relaxed);
            }
            if self
                .records
                .compare_exchange_weak(head, record, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        HpGuard { hp: self, record }
    }

    /// Collect all active hazard pointers, static and chained.
    fn collect_hazards(&self) -> Vec<*mut ()> {
        let mut hazards = Vec::new();
        let mut current = self.records.load(Ordering::Acquire);

        while !current.is_null() {
            let record = unsafe { &*current };
            if record.active.load(Ordering::Acquire) != 0 {
                for hp in &record.hazards {
                    let ptr = hp.load(Ordering::Acquire);
                    if !ptr.is_null() {
                        hazards.push(ptr);
                    }
                }
                let mut chunk = record.extra.load(Ordering::Acquire);
                while !chunk.is_null() {
                    let c = unsafe { &*chunk };
                    for hp in &c.slots {
                        let ptr = hp.load(Ordering::Acquire);
                        if !ptr.is_null() {
                            hazards.push(ptr);
                        }
                    }
                    chunk = c.next.load(Ordering::Acquire);
                }
            }
            current = record.next.load(Ordering::Acquire);
        }

        hazards
    }
}

impl Default for HazardPointers {
    fn default() -> Self {
        Self::new()
    }
}

/// A guard for hazard pointer protected access.
pub struct HpGuard<'a> {
    hp: &'a HazardPointers,
    record: *mut HpRecord,
}

impl<'a> HpGuard<'a> {
    /// Protect a pointer with a hazard pointer.
    ///
    /// `slot` indexes the thread's combined static-plus-growable slot space;
    /// slots `>= HP_PER_THREAD` are served from the chained chunks, growing
    /// the chain on demand. Returns the slot index.
    pub fn protect<T>(&self, slot: usize, ptr: *const T) -> Option<usize> {
        let record = unsafe { &*self.record };
        if slot < HP_PER_THREAD {
            record.hazards[slot].store(ptr as *mut (), Ordering::Release);
        } else {
            let index = slot - HP_PER_THREAD;
            let chunk = record.chunk_for(index);
            chunk.slots[index % HP_CHUNK_SIZE].store(ptr as *mut (), Ordering::Release);
        }
        crate::pr::fence_acquire();

        Some(slot)
    }

    /// Clear a hazard pointer slot.
    pub fn clear(&self, slot: usize) {
        let record = unsafe { &*self.record };
        if slot < HP_PER_THREAD {
            record.hazards[slot].store(ptr::null_mut(), Ordering::Release);
        } else {
            let index = slot - HP_PER_THREAD;
            let chunk = record.chunk_for(index);
            chunk.slots[index % HP_CHUNK_SIZE].store(ptr::null_mut(), Ordering::Release);
        }
    }

    /// Clear all hazard pointers, static and chained.
    pub fn clear_all(&self) {
        let record = unsafe { &*self.record };
        for hp in &record.hazards {
            hp.store(ptr::null_mut(), Ordering::Release);
        }
        let mut chunk = record.extra.load(Ordering::Acquire);
        while !chunk.is_null() {
            let c = unsafe { &*chunk };
            for hp in &c.slots {
                hp.store(ptr::null_mut(), Ordering::Release);
            }
            chunk = c.next.load(Ordering::Acquire);
        }
    }

    /// Retire a pointer for later reclamation.
    ///
    /// # Safety
    ///
    /// The pointer must be valid and will be freed when safe.
    pub unsafe fn retire<T>(&self, ptr: *mut T) {
        let record = &*self.record;
        let retire_list = &mut *record.retire_list.get();

        retire_list.push(RetiredNode {
            ptr: ptr as *mut (),
            free_fn: |p| {
                drop(Box::from_raw(p as *mut T));
            },
        });

        if retire_list.len() >= SCAN_THRESHOLD {
            self.scan();
        }
    }

    /// Scan and reclaim retired nodes.
    pub fn scan(&self) {
        let hazards = self.hp.collect_hazards();
        let record = unsafe { &*self.record };
        let retire_list = unsafe { &mut *record.retire_list.get() };

        retire_list.retain(|node| {
            if hazards.contains(&node.ptr) {
                true // Keep - still hazardous
            } else {
                // Safe to free
                unsafe {
                    (node.free_fn)(node.ptr);
                }
                false
            }
        });
    }
}

impl Drop for HpGuard<'_> {
    fn drop(&mut self) {
        self.clear_all();
        let record = unsafe { &*self.record };
        record.active.store(0, Ordering::Release);
    }
}
