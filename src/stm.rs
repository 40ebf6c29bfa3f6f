//! Multi-version timestamp-ordered software transactional memory (spec
//! §4.7), layered on top of any [`crate::map::Map`].
//!
//! A transaction never touches a key's value in place. `tm_set` allocates an
//! [`Update`] record and CASes the map's value slot from whatever it held to
//! a `TAG2`-tagged pointer at that record, threading the slot's previous
//! content onto `Update::next`. A read walks that chain newest-first,
//! skipping records not yet visible to the reader's snapshot. This is the
//! same "tagged successor, walk and help" shape as [`crate::list`] and
//! [`crate::skiplist`], just with the chain riding inside a map's value word
//! instead of a dedicated node type.
//!
//! Simplification recorded in `DESIGN.md`: cross-transaction validation
//! helping (spec §4.7's "recursively help W validate") is approximated by
//! skipping past a writer that has not yet finalized rather than directly
//! driving its validation to completion. This is sound because `write_ts`
//! is only assigned at commit time from a monotonic counter: any writer
//! still `Running`/`Validating` when we check it is guaranteed to finalize
//! with a `write_ts` no smaller than our own, so it cannot retroactively
//! conflict with a snapshot already taken.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::error::{Error, Result};
use crate::key::{self, Key, DEFAULT_KEY_DESCRIPTOR, DOES_NOT_EXIST, TOMBSTONE, UNDETERMINED};
use crate::list::Expect;
use crate::map::Map;
use crate::reclaim::Reclaim;
use crate::skiplist::Skiplist;

const ABORTED_VERSION: u64 = key::ABORTED_VERSION;

/// Begin-time isolation choice (spec §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Isolation {
    /// Snapshot fixed at `read_ts`, the default.
    RepeatableRead,
    /// `tm_get` re-snapshots `GlobalVersion` on every call.
    ReadCommitted,
    /// No `writes` array is ever populated; `commit` only releases `Active`.
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum TxnState {
    Running = 0,
    Validating = 1,
    Validated = 2,
    Committed = 3,
    Aborted = 4,
}

impl TxnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TxnState::Running,
            1 => TxnState::Validating,
            2 => TxnState::Validated,
            3 => TxnState::Committed,
            _ => TxnState::Aborted,
        }
    }
}

/// Shared, heap-stable transaction state an `Update` record's version field
/// can point at while the writing transaction is still deciding its fate.
struct TxnHandle {
    write_ts: AtomicU64,
    state: AtomicU8,
}

struct Update {
    value: u64,
    /// While pointer-tagged (`TAG1`): points at the writing `TxnHandle`.
    /// Once finalized: the plain committed `write_ts`, or `ABORTED_VERSION`.
    version: AtomicU64,
    /// The map slot's word immediately before this record was installed:
    /// either a plain committed value or another `TAG2`-tagged `Update`.
    /// Atomic (rather than a plain `u64`, as at install time) because
    /// opportunistic GC unlinks a stale tail in place by CASing the
    /// predecessor's `next` past it.
    next: AtomicU64,
}

/// A finalized record's comparable age: the committed `write_ts`, or `0`
/// for an aborted record — always GC-eligible, since every reader already
/// skips a record at `ABORTED_VERSION` regardless of snapshot. `None`
/// means the record has not finalized yet (`RUNNING`/`VALIDATING`); its
/// eventual `write_ts` can only be `>=` any `read_ts` already captured
/// (`GlobalVersion` only grows), so it is never GC-eligible.
fn record_age(version: u64) -> Option<u64> {
    if version == ABORTED_VERSION {
        Some(0)
    } else if key::has_tag1(version) {
        None
    } else {
        Some(version)
    }
}

/// Process-wide STM state: the version clock, the set of in-flight readers'
/// snapshots, and the map the transactions operate over.
pub struct StmRuntime {
    global_version: AtomicU64,
    active: Skiplist,
    map: Map,
}

impl StmRuntime {
    /// Wrap `map` with transactional semantics. `map`'s value slots become
    /// owned by the STM layer from this point on.
    pub fn new(map: Map) -> Self {
        Self {
            global_version: AtomicU64::new(1),
            active: Skiplist::new(DEFAULT_KEY_DESCRIPTOR),
            map,
        }
    }

    fn active_incr<R: Reclaim>(&self, ts: u64, reclaim: &R) {
        loop {
            let cur = self.active.get(&Key::Int(ts), reclaim);
            if cur == DOES_NOT_EXIST {
                if self.active.cas(Key::Int(ts), Expect::DoesNotExist, 1, reclaim) == DOES_NOT_EXIST {
                    return;
                }
                continue;
            }
            if self.active.cas(Key::Int(ts), Expect::Value(cur), cur + 1, reclaim) == cur {
                return;
            }
        }
    }

    fn active_decr<R: Reclaim>(&self, ts: u64, reclaim: &R) {
        loop {
            let cur = self.active.get(&Key::Int(ts), reclaim);
            if cur <= 1 {
                self.active.remove(&Key::Int(ts), reclaim);
                return;
            }
            if self.active.cas(Key::Int(ts), Expect::Value(cur), cur - 1, reclaim) == cur {
                return;
            }
        }
    }

    /// The oldest snapshot any live transaction still depends on, used to
    /// bound how far GC may reclaim. Falls back to the current version when
    /// no transaction is active.
    fn min_active(&self) -> u64 {
        match self.active.min_key() {
            Some(Key::Int(v)) => v,
            _ => self.global_version.load(Ordering::Acquire),
        }
    }

    /// Begin a new transaction, snapshotting `GlobalVersion`.
    pub fn begin<R: Reclaim>(&self, isolation: Isolation, reclaim: &R) -> Transaction<'_, R> {
        let read_ts = loop {
            let ts = self.global_version.load(Ordering::Acquire);
            self.active_incr(ts, reclaim);
            if self.global_version.load(Ordering::Acquire) == ts {
                break ts;
            }
            self.active_decr(ts, reclaim);
        };
        Transaction {
            runtime: self,
            reclaim,
            isolation,
            read_ts,
            handle: Box::new(TxnHandle {
                write_ts: AtomicU64::new(UNDETERMINED),
                state: AtomicU8::new(TxnState::Running as u8),
            }),
            writes: Vec::new(),
            finished: false,
        }
    }
}

/// A single transaction against a [`StmRuntime`]. Borrows the reclamation
/// guard for its whole lifetime, matching every other map operation's
/// per-call reclamation contract.
pub struct Transaction<'a, R: Reclaim> {
    runtime: &'a StmRuntime,
    reclaim: &'a R,
    isolation: Isolation,
    read_ts: u64,
    handle: Box<TxnHandle>,
    writes: Vec<(Key, *mut Update)>,
    finished: bool,
}

impl<'a, R: Reclaim> Transaction<'a, R> {
    fn handle_word(&self) -> u64 {
        key::pack_tagged_ptr(key::TAG1, Box::as_ref(&self.handle) as *const TxnHandle as *mut TxnHandle)
    }

    fn snapshot_ts(&self) -> u64 {
        match self.isolation {
            Isolation::ReadCommitted => self.runtime.global_version.load(Ordering::Acquire),
            Isolation::RepeatableRead | Isolation::ReadOnly => self.read_ts,
        }
    }

    /// `tm_set(k, v)`.
    pub fn set(&mut self, key: Key, value: u64) {
        debug_assert!(
            !matches!(self.isolation, Isolation::ReadOnly),
            "tm_set on a read-only transaction"
        );
        loop {
            let observed = self.runtime.map.get(&key, self.reclaim);
            let update = Box::into_raw(Box::new(Update {
                value,
                version: AtomicU64::new(self.handle_word()),
                next: AtomicU64::new(observed),
            }));
            let new_word = key::pack_tagged_ptr(key::TAG2, update);
            if self.runtime.map.cas_word(key.clone(), observed, new_word, self.reclaim) == observed {
                self.writes.push((key, update));
                return;
            }
            unsafe { drop(Box::from_raw(update)) };
        }
    }

    /// `tm_get(k)`: walk the update chain newest-first, returning the first
    /// value visible to this transaction's snapshot, then run one
    /// opportunistic GC step (spec §4.7) over the same chain.
    pub fn get(&self, key: &Key) -> u64 {
        let read_ts = self.snapshot_ts();
        let head_word = self.runtime.map.get(key, self.reclaim);
        let result = self.read_chain(head_word, read_ts);
        self.opportunistic_gc(key, head_word);
        result
    }

    fn read_chain(&self, head_word: u64, read_ts: u64) -> u64 {
        let mut word = head_word;
        loop {
            if !key::has_tag2(word) {
                return if word == TOMBSTONE || word == DOES_NOT_EXIST {
                    DOES_NOT_EXIST
                } else {
                    word
                };
            }
            let update = unsafe { key::unpack_tagged_ptr::<Update>(word) };
            let node = unsafe { &*update };
            let version = node.version.load(Ordering::Acquire);
            if version == ABORTED_VERSION {
                word = node.next.load(Ordering::Acquire);
                continue;
            }
            if key::has_tag1(version) {
                let handle_ptr = unsafe { key::unpack_tagged_ptr::<TxnHandle>(version) };
                if handle_ptr == Box::as_ref(&self.handle) as *const TxnHandle as *mut TxnHandle {
                    return node.value;
                }
                let handle = unsafe { &*handle_ptr };
                let state = TxnState::from_u8(handle.state.load(Ordering::Acquire));
                let w_ts = handle.write_ts.load(Ordering::Acquire);
                let visible = matches!(state, TxnState::Validating | TxnState::Validated | TxnState::Committed)
                    && w_ts != UNDETERMINED
                    && w_ts <= read_ts;
                if visible {
                    return node.value;
                }
                word = node.next.load(Ordering::Acquire);
                continue;
            }
            if version <= read_ts {
                return node.value;
            }
            word = node.next.load(Ordering::Acquire);
        }
    }

    /// Opportunistic GC (spec.md:161), run once per `tm_get` over the chain
    /// already walked for that call: if the tail is older than every live
    /// transaction's snapshot, unlink and retire it; if the whole chain is
    /// a single record and it is that old, collapse the map slot itself
    /// back to a plain value and retire the record. `min_active()` is the
    /// oldest `read_ts` any live transaction could still need visible.
    ///
    /// Either collapse splices in the record's committed *value*, not
    /// whatever it used to point to: `age < min_active` means every live
    /// transaction's snapshot already sees this record (or something
    /// newer), so nothing beneath it can ever be reached again — the
    /// record becomes an ordinary terminal plain value instead of a
    /// `TAG2`-tagged indirection to one.
    fn opportunistic_gc(&self, key: &Key, head_word: u64) {
        if !key::has_tag2(head_word) {
            return;
        }
        let min_active = self.runtime.min_active();
        let head_ptr = unsafe { key::unpack_tagged_ptr::<Update>(head_word) };
        let head_node = unsafe { &*head_ptr };
        let head_next = head_node.next.load(Ordering::Acquire);

        if !key::has_tag2(head_next) {
            // Singular chain: collapse the slot itself back to plain.
            let age = match record_age(head_node.version.load(Ordering::Acquire)) {
                Some(age) => age,
                None => return,
            };
            if age < min_active
                && self.runtime.map.cas_word(key.clone(), head_word, head_node.value, self.reclaim) == head_word
            {
                unsafe { self.reclaim.retire(head_ptr) };
            }
            return;
        }

        // Walk to the tail, keeping the record just above it so a stale
        // tail can be CASed out of the chain in place.
        let mut prev_node = head_node;
        let mut cur_word = head_next;
        loop {
            let cur_ptr = unsafe { key::unpack_tagged_ptr::<Update>(cur_word) };
            let cur_node = unsafe { &*cur_ptr };
            let cur_next = cur_node.next.load(Ordering::Acquire);
            if key::has_tag2(cur_next) {
                prev_node = cur_node;
                cur_word = cur_next;
                continue;
            }
            let age = match record_age(cur_node.version.load(Ordering::Acquire)) {
                Some(age) => age,
                None => return,
            };
            if age < min_active
                && prev_node
                    .next
                    .compare_exchange(cur_word, cur_node.value, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                unsafe { self.reclaim.retire(cur_ptr) };
            }
            return;
        }
    }

    /// `tm_validate_key`: no entry on `k` other than our own may have
    /// committed with a `write_ts` greater than our `read_ts`.
    ///
    /// Chain depth tracks *install* order (when `tm_set` CASed the slot),
    /// not *commit* order, so a shallower entry can finalize with a smaller
    /// `write_ts` than a deeper one (whoever calls `commit` first claims the
    /// smaller timestamp regardless of write order). That means a conflict
    /// can appear at any depth, so every entry is inspected; our own entry
    /// is skipped rather than treated as an automatic pass.
    ///
    /// A writer still `Running` or `Validating` has not acquired a final
    /// `write_ts` we can compare against — and by the time it does, that
    /// `write_ts` is guaranteed to exceed any `read_ts` already captured
    /// (`GlobalVersion` only grows), so it can never retroactively conflict
    /// with us. We skip past such nodes rather than waiting on them, which
    /// is what makes this non-blocking without needing to drive the other
    /// transaction's validation ourselves.
    fn validate_key(&self, key: &Key) -> bool {
        let my_handle = Box::as_ref(&self.handle) as *const TxnHandle as *mut TxnHandle;
        let mut word = self.runtime.map.get(key, self.reclaim);
        loop {
            if !key::has_tag2(word) {
                return true;
            }
            let update = unsafe { key::unpack_tagged_ptr::<Update>(word) };
            let node = unsafe { &*update };
            let version = node.version.load(Ordering::Acquire);
            if version == ABORTED_VERSION {
                word = node.next.load(Ordering::Acquire);
                continue;
            }
            if key::has_tag1(version) {
                let handle_ptr = unsafe { key::unpack_tagged_ptr::<TxnHandle>(version) };
                if handle_ptr == my_handle {
                    word = node.next.load(Ordering::Acquire);
                    continue;
                }
                let handle = unsafe { &*handle_ptr };
                let state = TxnState::from_u8(handle.state.load(Ordering::Acquire));
                match state {
                    TxnState::Running | TxnState::Validating | TxnState::Aborted => {
                        word = node.next.load(Ordering::Acquire);
                        continue;
                    }
                    TxnState::Validated | TxnState::Committed => {
                        let w_ts = handle.write_ts.load(Ordering::Acquire);
                        if w_ts != UNDETERMINED && w_ts > self.read_ts {
                            return false;
                        }
                        word = node.next.load(Ordering::Acquire);
                        continue;
                    }
                }
            }
            if version > self.read_ts {
                return false;
            }
            word = node.next.load(Ordering::Acquire);
        }
    }

    /// `commit`. Returns `Ok(())` on success, `Err(Error::TxnNotRunning)` if
    /// validation failed and every write was rolled back.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if matches!(self.isolation, Isolation::ReadOnly) {
            self.runtime.active_decr(self.read_ts, self.reclaim);
            return Ok(());
        }

        self.handle
            .state
            .store(TxnState::Validating as u8, Ordering::Release);
        // fetch_add returns GlobalVersion's value before the increment; the
        // timestamp we've just claimed is one past that.
        let write_ts = self.runtime.global_version.fetch_add(1, Ordering::AcqRel) + 1;
        self.handle.write_ts.store(write_ts, Ordering::Release);

        let mut ok = true;
        for (key, _) in &self.writes {
            if !self.validate_key(key) {
                ok = false;
                break;
            }
        }

        self.handle.state.store(
            if ok {
                TxnState::Validated as u8
            } else {
                TxnState::Aborted as u8
            },
            Ordering::Release,
        );

        let final_version = if ok { write_ts } else { ABORTED_VERSION };
        for (_, update) in &self.writes {
            unsafe { &(**update).version }.store(final_version, Ordering::Release);
        }
        self.handle.state.store(
            if ok {
                TxnState::Committed as u8
            } else {
                TxnState::Aborted as u8
            },
            Ordering::Release,
        );

        self.runtime.active_decr(self.read_ts, self.reclaim);
        if ok {
            Ok(())
        } else {
            Err(Error::TxnNotRunning)
        }
    }

    /// `abort`: mark every write dead and release our snapshot.
    pub fn abort(mut self) {
        self.finished = true;
        self.handle
            .state
            .store(TxnState::Aborted as u8, Ordering::Release);
        for (_, update) in &self.writes {
            unsafe { &(**update).version }.store(ABORTED_VERSION, Ordering::Release);
        }
        self.runtime.active_decr(self.read_ts, self.reclaim);
    }
}

impl<R: Reclaim> Drop for Transaction<'_, R> {
    fn drop(&mut self) {
        // A transaction dropped without an explicit commit/abort behaves as
        // an abort: this is the only way to guarantee `Active` is always
        // released, mirroring the map back-ends' own "best effort on the
        // unhappy path, never leak accounting" discipline.
        if !self.finished {
            self.handle
                .state
                .store(TxnState::Aborted as u8, Ordering::Release);
            for (_, update) in &self.writes {
                unsafe { &(**update).version }.store(ABORTED_VERSION, Ordering::Release);
            }
            self.runtime.active_decr(self.read_ts, self.reclaim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::Epoch;
    use crate::key::DEFAULT_KEY_DESCRIPTOR;

    #[test]
    fn scenario_basic_commit_is_visible() {
        let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
        let epoch = Epoch::new();
        let g = epoch.register();

        let mut txn = runtime.begin(Isolation::RepeatableRead, &g);
        txn.set(Key::Int(1), 100);
        assert_eq!(txn.get(&Key::Int(1)), 100);
        assert!(txn.commit().is_ok());

        let txn2 = runtime.begin(Isolation::RepeatableRead, &g);
        assert_eq!(txn2.get(&Key::Int(1)), 100);
    }

    #[test]
    fn write_write_conflict_aborts_loser() {
        let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
        let epoch = Epoch::new();
        let g = epoch.register();

        let mut t1 = runtime.begin(Isolation::RepeatableRead, &g);
        let mut t2 = runtime.begin(Isolation::RepeatableRead, &g);
        t1.set(Key::Int(7), 1);
        t2.set(Key::Int(7), 2);
        assert!(t1.commit().is_ok());
        assert!(t2.commit().is_err());

        let reader = runtime.begin(Isolation::RepeatableRead, &g);
        assert_eq!(reader.get(&Key::Int(7)), 1);
    }

    #[test]
    fn read_only_never_conflicts() {
        let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
        let epoch = Epoch::new();
        let g = epoch.register();
        let mut writer = runtime.begin(Isolation::RepeatableRead, &g);
        writer.set(Key::Int(3), 9);
        assert!(writer.commit().is_ok());

        let reader = runtime.begin(Isolation::ReadOnly, &g);
        assert_eq!(reader.get(&Key::Int(3)), 9);
        assert!(reader.commit().is_ok());
    }

    #[test]
    fn abort_discards_writes() {
        let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
        let epoch = Epoch::new();
        let g = epoch.register();
        let mut txn = runtime.begin(Isolation::RepeatableRead, &g);
        txn.set(Key::Int(4), 42);
        txn.abort();

        let reader = runtime.begin(Isolation::RepeatableRead, &g);
        assert_eq!(reader.get(&Key::Int(4)), DOES_NOT_EXIST);
    }

    #[test]
    fn opportunistic_gc_collapses_stale_singular_chain() {
        let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
        let epoch = Epoch::new();
        let g = epoch.register();

        let mut first = runtime.begin(Isolation::RepeatableRead, &g);
        first.set(Key::Int(1), 10);
        assert!(first.commit().is_ok());

        // Raw map slot still carries the `TAG2`-tagged update record; no
        // transaction has called `get` on it yet to trigger GC.
        assert!(key::has_tag2(runtime.map.get(&Key::Int(1), &g)));

        // Commit an unrelated key to advance `GlobalVersion` past the first
        // record's `write_ts`, so that record becomes old enough to collect
        // once no active transaction's snapshot still needs it.
        let mut second = runtime.begin(Isolation::RepeatableRead, &g);
        second.set(Key::Int(2), 20);
        assert!(second.commit().is_ok());

        let third = runtime.begin(Isolation::RepeatableRead, &g);
        assert_eq!(third.get(&Key::Int(1)), 10);
        assert!(!key::has_tag2(runtime.map.get(&Key::Int(1), &g)));
        assert_eq!(runtime.map.get(&Key::Int(1), &g), 10);
        assert!(third.commit().is_ok());
    }
}
