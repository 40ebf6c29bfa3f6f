//! Lock-free ordered skiplist (spec §4.4).
//!
//! Structurally this is the same mark-then-unlink protocol as [`crate::list`]
//! generalized to multiple forward-pointer levels: level 0 is the
//! authoritative ordered chain (every live key appears there and only
//! there), and levels above it are a probabilistic fast lane built by
//! linking additional `next` slots once level 0 has already been linked.
//! Logical removal marks level 0's successor pointer first — that CAS is
//! the linearization point — then best-effort unlinks the higher levels
//! top-down.
//!
//! Level is sampled per spec §4.4: count the trailing zero bits of a random
//! word, one extra level per zero bit, capped at `MAX_LEVEL`.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Ordering as CmpOrdering;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::backoff::Backoff;
use crate::key::{Key, KeyDescriptor, DOES_NOT_EXIST};
use crate::list::Expect;
use crate::reclaim::Reclaim;

/// Highest level index a node may occupy; level 0 is always present.
pub const MAX_LEVEL: usize = 31;

const MARK: usize = 1;

#[inline(always)]
fn is_marked(word: usize) -> bool {
    word & MARK != 0
}

#[inline(always)]
fn unmarked(word: usize) -> *mut Node {
    (word & !MARK) as *mut Node
}

#[inline(always)]
fn marked(ptr: *mut Node) -> usize {
    ptr as usize | MARK
}

/// A cheap, lock-free xorshift64* generator used only to sample skiplist
/// levels. Not cryptographic, not reproducible across runs; spec §4.4 only
/// requires the *distribution* of levels to be geometric, not the sequence.
static LEVEL_SEED: AtomicU64 = AtomicU64::new(0x9e37_79b9_7f4a_7c15);

fn next_random_word() -> u64 {
    let mut x = LEVEL_SEED.fetch_add(0x2545_f491_4f6c_dd1d, Ordering::Relaxed);
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    x.wrapping_mul(0x2545_f491_4f6c_dd1d)
}

/// Sample a level in `0..=MAX_LEVEL` (spec §4.4: one extra level per
/// trailing zero bit of a random word, capped at `MAX_LEVEL`).
fn random_level() -> usize {
    let word = next_random_word() | (1 << 63);
    (word.trailing_zeros() as usize).min(MAX_LEVEL)
}

struct Node {
    key: Key,
    value: AtomicU64,
    top_level: usize,
    next: Box<[AtomicUsize]>,
}

impl Node {
    fn new(key: Key, value: u64, top_level: usize, succs: &[*mut Node]) -> Self {
        let next: Vec<AtomicUsize> = (0..=top_level)
            .map(|lvl| AtomicUsize::new(succs[lvl] as usize))
            .collect();
        Self {
            key,
            value: AtomicU64::new(value),
            top_level,
            next: next.into_boxed_slice(),
        }
    }
}

/// A lock-free ordered skiplist, keyed by [`Key`].
pub struct Skiplist {
    head: Box<[AtomicUsize]>,
    desc: KeyDescriptor,
}

impl Skiplist {
    /// Create an empty skiplist ordering byte-string keys via `desc`.
    pub fn new(desc: KeyDescriptor) -> Self {
        let head: Vec<AtomicUsize> = (0..=MAX_LEVEL).map(|_| AtomicUsize::new(0)).collect();
        Self {
            head: head.into_boxed_slice(),
            desc,
        }
    }

    fn cmp_key(&self, a: &Key, b: &Key) -> CmpOrdering {
        a.compare(b, &self.desc)
    }

    /// The forward-pointer slot at `level` for `pred`, or the head's own
    /// slot if `pred` is null (the head is never a real node).
    fn link_at(&self, pred: *mut Node, level: usize) -> *const AtomicUsize {
        if pred.is_null() {
            &self.head[level] as *const AtomicUsize
        } else {
            unsafe { &(*pred).next[level] as *const AtomicUsize }
        }
    }

    /// Populate `preds`/`succs` (length `MAX_LEVEL + 1`) such that, at every
    /// level, `preds[lvl].key < key <= succs[lvl].key`. Always starts the
    /// walk at `MAX_LEVEL` regardless of where the target key's node turns
    /// out to live, per the Open Question resolution recorded in
    /// SPEC_FULL.md §4. Helps unlink marked nodes encountered at level 0
    /// along the way; retries the whole walk on a lost helping race.
    fn find_preds<R: Reclaim>(
        &self,
        key: &Key,
        reclaim: &R,
        preds: &mut [*const AtomicUsize],
        succs: &mut [*mut Node],
    ) -> Option<*mut Node> {
        let mut backoff = Backoff::new();
        'retry: loop {
            let mut pred: *mut Node = core::ptr::null_mut();
            let mut level = MAX_LEVEL;
            loop {
                let mut pred_link = self.link_at(pred, level);
                let mut curr = unmarked(unsafe { &*pred_link }.load(Ordering::Acquire));
                loop {
                    if curr.is_null() {
                        break;
                    }
                    let curr_next = unsafe { &(*curr).next[level] }.load(Ordering::Acquire);
                    if is_marked(curr_next) {
                        if level == 0 {
                            let succ = unmarked(curr_next);
                            let pred_ref = unsafe { &*pred_link };
                            let pred_val = pred_ref.load(Ordering::Acquire);
                            if unmarked(pred_val) != curr {
                                backoff.spin();
                                continue 'retry;
                            }
                            if pred_ref
                                .compare_exchange(
                                    pred_val,
                                    succ as usize,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                )
                                .is_ok()
                            {
                                unsafe { reclaim.retire(curr) };
                            } else {
                                backoff.spin();
                                continue 'retry;
                            }
                            curr = succ;
                            continue;
                        } else {
                            // A higher-level help failure just means we'll
                            // skip past it next time; level 0 is the source
                            // of truth.
                            curr = unmarked(curr_next);
                            continue;
                        }
                    }
                    if self.cmp_key(unsafe { &(*curr).key }, key) == CmpOrdering::Less {
                        pred = curr;
                        pred_link = self.link_at(pred, level);
                        curr = unmarked(curr_next);
                        continue;
                    }
                    break;
                }
                preds[level] = pred_link;
                succs[level] = curr;
                if level == 0 {
                    if !curr.is_null() && self.cmp_key(unsafe { &(*curr).key }, key) == CmpOrdering::Equal
                    {
                        return Some(curr);
                    }
                    return None;
                }
                level -= 1;
            }
        }
    }

    /// `cas(k, expected, new)`: dispatches `map_set`/`map_add`/`map_replace`/
    /// `map_cas` (spec §6).
    pub fn cas<R: Reclaim>(&self, key: Key, expect: Expect, new: u64, reclaim: &R) -> u64 {
        let mut preds = [core::ptr::null::<AtomicUsize>(); MAX_LEVEL + 1];
        let mut succs = [core::ptr::null_mut::<Node>(); MAX_LEVEL + 1];
        let mut backoff = Backoff::new();
        loop {
            let found = self.find_preds(&key, reclaim, &mut preds, &mut succs);
            match found {
                Some(curr) => {
                    if matches!(expect, Expect::DoesNotExist) {
                        return unsafe { &(*curr).value }.load(Ordering::Acquire);
                    }
                    let observed = unsafe { &(*curr).value }.load(Ordering::Acquire);
                    let expected_matches = match expect {
                        Expect::Whatever | Expect::Exists => true,
                        Expect::Value(v) => observed == v,
                        Expect::DoesNotExist => unreachable!(),
                    };
                    if !expected_matches {
                        return observed;
                    }
                    if unsafe { &(*curr).value }
                        .compare_exchange(observed, new, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return observed;
                    }
                    backoff.spin();
                }
                None => {
                    match expect {
                        Expect::Exists | Expect::Value(_) => return DOES_NOT_EXIST,
                        Expect::Whatever | Expect::DoesNotExist => {}
                    }
                    let top_level = random_level();
                    let succs_slice: Vec<*mut Node> = (0..=top_level).map(|l| succs[l]).collect();
                    let node = Box::into_raw(Box::new(Node::new(
                        key.clone(),
                        new,
                        top_level,
                        &succs_slice,
                    )));

                    // Linearization point: link at level 0.
                    let pred0 = unsafe { &*preds[0] };
                    if pred0
                        .compare_exchange(
                            succs[0] as usize,
                            node as usize,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                    {
                        unsafe { drop(Box::from_raw(node)) };
                        backoff.spin();
                        continue;
                    }

                    // Best-effort: link the remaining levels bottom-up,
                    // re-searching predecessors on a lost race rather than
                    // retrying the whole insert (the node is already live
                    // via level 0).
                    let mut level = 1;
                    while level <= top_level {
                        let pred = unsafe { &*preds[level] };
                        let expected = succs[level] as usize;
                        if pred
                            .compare_exchange(
                                expected,
                                node as usize,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            level += 1;
                        } else {
                            let mut fresh_preds = [core::ptr::null::<AtomicUsize>(); MAX_LEVEL + 1];
                            let mut fresh_succs = [core::ptr::null_mut::<Node>(); MAX_LEVEL + 1];
                            if self
                                .find_preds(&key, reclaim, &mut fresh_preds, &mut fresh_succs)
                                .is_none()
                            {
                                // Concurrently removed before we finished
                                // linking upper levels; level 0 already
                                // reflects that, upper levels are cosmetic.
                                break;
                            }
                            preds = fresh_preds;
                            succs = fresh_succs;
                        }
                    }
                    return DOES_NOT_EXIST;
                }
            }
        }
    }

    /// `map_get`.
    pub fn get<R: Reclaim>(&self, key: &Key, reclaim: &R) -> u64 {
        let mut preds = [core::ptr::null::<AtomicUsize>(); MAX_LEVEL + 1];
        let mut succs = [core::ptr::null_mut::<Node>(); MAX_LEVEL + 1];
        match self.find_preds(key, reclaim, &mut preds, &mut succs) {
            Some(curr) => unsafe { &(*curr).value }.load(Ordering::Acquire),
            None => DOES_NOT_EXIST,
        }
    }

    /// `map_remove`: mark level 0 (linearization point), then best-effort
    /// unlink top-down.
    pub fn remove<R: Reclaim>(&self, key: &Key, reclaim: &R) -> u64 {
        let mut preds = [core::ptr::null::<AtomicUsize>(); MAX_LEVEL + 1];
        let mut succs = [core::ptr::null_mut::<Node>(); MAX_LEVEL + 1];
        let mut backoff = Backoff::new();
        loop {
            let curr = match self.find_preds(key, reclaim, &mut preds, &mut succs) {
                Some(c) => c,
                None => return DOES_NOT_EXIST,
            };
            let top_level = unsafe { (*curr).top_level };

            // Mark from the top level down; level 0 last, as its CAS is the
            // linearization point and only it needs to be contested.
            let mut marked_any_above = true;
            while marked_any_above {
                marked_any_above = false;
                for lvl in (1..=top_level).rev() {
                    let link = unsafe { &(*curr).next[lvl] };
                    let val = link.load(Ordering::Acquire);
                    if !is_marked(val)
                        && link
                            .compare_exchange(
                                val,
                                marked(unmarked(val)),
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_err()
                    {
                        marked_any_above = true;
                    }
                }
            }

            let link0 = unsafe { &(*curr).next[0] };
            let val0 = link0.load(Ordering::Acquire);
            if is_marked(val0) {
                backoff.spin();
                continue;
            }
            if link0
                .compare_exchange(
                    val0,
                    marked(unmarked(val0)),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                backoff.spin();
                continue;
            }
            let observed = unsafe { &(*curr).value }.swap(DOES_NOT_EXIST, Ordering::AcqRel);
            // Best-effort physical unlink at every level; a lost race just
            // leaves the node for the next find_preds to help unlink.
            let _ = self.find_preds(key, reclaim, &mut preds, &mut succs);
            return observed;
        }
    }

    /// Approximate `O(n)` element count, scanning level 0.
    pub fn count<R: Reclaim>(&self, reclaim: &R) -> u64 {
        let _ = reclaim;
        let mut n = 0u64;
        let mut curr = unmarked(self.head[0].load(Ordering::Acquire));
        while !curr.is_null() {
            let next = unsafe { &(*curr).next[0] }.load(Ordering::Acquire);
            if !is_marked(next) {
                n += 1;
            }
            curr = unmarked(next);
        }
        n
    }

    /// Smallest live key, or `None` if the skiplist is empty.
    pub fn min_key(&self) -> Option<Key> {
        let mut curr = unmarked(self.head[0].load(Ordering::Acquire));
        while !curr.is_null() {
            let next = unsafe { &(*curr).next[0] }.load(Ordering::Acquire);
            if !is_marked(next) {
                return Some(unsafe { (*curr).key.clone() });
            }
            curr = unmarked(next);
        }
        None
    }

    /// A snapshot-relaxed forward iterator over level 0, starting at the
    /// first live key `>= from`.
    pub fn iter_from<'a, R: Reclaim>(&'a self, from: Option<&Key>, reclaim: &'a R) -> Iter<'a, R> {
        let cursor = match from {
            Some(k) => {
                let mut preds = [core::ptr::null::<AtomicUsize>(); MAX_LEVEL + 1];
                let mut succs = [core::ptr::null_mut::<Node>(); MAX_LEVEL + 1];
                match self.find_preds(k, reclaim, &mut preds, &mut succs) {
                    Some(curr) => curr,
                    None => succs[0],
                }
            }
            None => unmarked(self.head[0].load(Ordering::Acquire)),
        };
        Iter {
            _list: self,
            cursor,
            _reclaim: reclaim,
        }
    }
}

/// Iterator over a [`Skiplist`]'s live nodes at level 0.
pub struct Iter<'a, R: Reclaim> {
    _list: &'a Skiplist,
    cursor: *mut Node,
    _reclaim: &'a R,
}

impl<'a, R: Reclaim> Iter<'a, R> {
    /// Advance, returning the next live `(key, value)` pair.
    pub fn next(&mut self) -> Option<(Key, u64)> {
        loop {
            if self.cursor.is_null() {
                return None;
            }
            let node = unsafe { &*self.cursor };
            let next = node.next[0].load(Ordering::Acquire);
            if is_marked(next) {
                self.cursor = unmarked(next);
                continue;
            }
            let value = node.value.load(Ordering::Acquire);
            let key = node.key.clone();
            self.cursor = unmarked(next);
            if value == DOES_NOT_EXIST {
                continue;
            }
            return Some((key, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::Epoch;
    use crate::key::DEFAULT_KEY_DESCRIPTOR;

    fn k(i: u64) -> Key {
        Key::Int(i)
    }

    #[test]
    fn random_level_never_exceeds_max() {
        for _ in 0..10_000 {
            assert!(random_level() <= MAX_LEVEL);
        }
    }

    #[test]
    fn scenario_basic_skiplist() {
        let sl = Skiplist::new(DEFAULT_KEY_DESCRIPTOR);
        let epoch = Epoch::new();
        let g = epoch.register();

        for i in [5u64, 1, 3, 2, 4] {
            assert_eq!(sl.cas(k(i), Expect::DoesNotExist, i * 100, &g), DOES_NOT_EXIST);
        }
        assert_eq!(sl.count(&g), 5);
        assert_eq!(sl.get(&k(3), &g), 300);
        assert_eq!(sl.min_key().map(|k| matches!(k, Key::Int(1))), Some(true));

        assert_eq!(sl.remove(&k(3), &g), 300);
        assert_eq!(sl.get(&k(3), &g), DOES_NOT_EXIST);
        assert_eq!(sl.count(&g), 4);
    }

    #[test]
    fn iteration_sees_sorted_keys_across_levels() {
        let sl = Skiplist::new(DEFAULT_KEY_DESCRIPTOR);
        let epoch = Epoch::new();
        let g = epoch.register();
        for i in 0u64..50 {
            sl.cas(k(i), Expect::DoesNotExist, i, &g);
        }
        let mut iter = sl.iter_from(None, &g);
        let mut seen = Vec::new();
        while let Some((key, value)) = iter.next() {
            if let Key::Int(v) = key {
                seen.push((v, value));
            }
        }
        let expected: Vec<(u64, u64)> = (0u64..50).map(|i| (i, i)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn cas_whatever_overwrites_existing() {
        let sl = Skiplist::new(DEFAULT_KEY_DESCRIPTOR);
        let epoch = Epoch::new();
        let g = epoch.register();
        sl.cas(k(9), Expect::DoesNotExist, 1, &g);
        assert_eq!(sl.cas(k(9), Expect::Whatever, 2, &g), 1);
        assert_eq!(sl.get(&k(9), &g), 2);
    }
}
