//! Map façade (spec §4.6): one dispatching type over the three back-ends.
//!
//! `Map` holds a tag plus an owned back-end and forwards every operation,
//! translating the generic `get/set/add/cas/replace/remove/count/iter_*`
//! vocabulary into each back-end's native `cas`/`get`/`remove` calls. This is
//! the only type most callers need; `List`/`Skiplist`/`HashTable` stay public
//! for callers who want one back-end directly without the dispatch.

use crate::error::{Error, Result};
use crate::hashtable::{self, HashTable};
use crate::key::{Key, KeyDescriptor, DOES_NOT_EXIST};
use crate::list::{self, Expect, List};
use crate::reclaim::Reclaim;
use crate::skiplist::{self, Skiplist};

/// Which back-end a [`Map`] dispatches to.
enum Backend {
    List(List),
    Skiplist(Skiplist),
    HashTable(HashTable),
}

/// A uniform associative container over one of three lock-free back-ends.
pub struct Map {
    backend: Backend,
}

impl Map {
    /// An ordered map backed by a Harris–Michael list. `O(n)` per operation;
    /// cheapest to construct, best for small maps or as a building block.
    pub fn new_list(desc: KeyDescriptor) -> Self {
        Self {
            backend: Backend::List(List::new(desc)),
        }
    }

    /// An ordered map backed by a lock-free skiplist. `O(log n)` expected
    /// per operation; the default choice when ordered iteration matters.
    pub fn new_skiplist(desc: KeyDescriptor) -> Self {
        Self {
            backend: Backend::Skiplist(Skiplist::new(desc)),
        }
    }

    /// An unordered map backed by a resizable hash table with integer keys.
    pub fn new_hash_int() -> Self {
        Self {
            backend: Backend::HashTable(HashTable::new_int()),
        }
    }

    /// An unordered map backed by a resizable hash table with byte-string
    /// keys hashed/compared via `desc`.
    pub fn new_hash_bytes(desc: KeyDescriptor) -> Self {
        Self {
            backend: Backend::HashTable(HashTable::new_bytes(desc)),
        }
    }

    /// `map_get`.
    pub fn get<R: Reclaim>(&self, key: &Key, reclaim: &R) -> u64 {
        match &self.backend {
            Backend::List(l) => l.get(key, reclaim),
            Backend::Skiplist(s) => s.get(key, reclaim),
            Backend::HashTable(h) => h.get(key, reclaim),
        }
    }

    /// `map_set`: unconditional write, returns the prior value.
    pub fn set<R: Reclaim>(&self, key: Key, value: u64, reclaim: &R) -> u64 {
        self.cas_raw(key, Expect::Whatever, value, reclaim)
    }

    /// `map_add`: write only if absent.
    pub fn add<R: Reclaim>(&self, key: Key, value: u64, reclaim: &R) -> u64 {
        self.cas_raw(key, Expect::DoesNotExist, value, reclaim)
    }

    /// `map_replace`: write only if present.
    pub fn replace<R: Reclaim>(&self, key: Key, value: u64, reclaim: &R) -> u64 {
        self.cas_raw(key, Expect::Exists, value, reclaim)
    }

    /// `map_cas`: write only if the current value equals `expected`.
    pub fn cas<R: Reclaim>(&self, key: Key, expected: u64, value: u64, reclaim: &R) -> u64 {
        self.cas_raw(key, Expect::Value(expected), value, reclaim)
    }

    /// A `cas` variant for callers (the STM layer) that already hold a raw
    /// value word read via `get` and want to swap it for another raw word
    /// unconditionally, including installing one into a key that does not
    /// exist yet. `observed == DOES_NOT_EXIST` is treated as "absent",
    /// which is sound because `DOES_NOT_EXIST` is reserved and never a
    /// legitimate stored value (spec §3).
    pub fn cas_word<R: Reclaim>(&self, key: Key, observed: u64, new_word: u64, reclaim: &R) -> u64 {
        let expect = if observed == DOES_NOT_EXIST {
            Expect::DoesNotExist
        } else {
            Expect::Value(observed)
        };
        self.cas_raw(key, expect, new_word, reclaim)
    }

    fn cas_raw<R: Reclaim>(&self, key: Key, expect: Expect, value: u64, reclaim: &R) -> u64 {
        match &self.backend {
            Backend::List(l) => l.cas(key, expect, value, reclaim),
            Backend::Skiplist(s) => s.cas(key, expect, value, reclaim),
            Backend::HashTable(h) => h.cas(key, expect, value, reclaim),
        }
    }

    /// `map_remove`.
    pub fn remove<R: Reclaim>(&self, key: &Key, reclaim: &R) -> u64 {
        match &self.backend {
            Backend::List(l) => l.remove(key, reclaim),
            Backend::Skiplist(s) => s.remove(key, reclaim),
            Backend::HashTable(h) => h.remove(key, reclaim),
        }
    }

    /// `map_count`. List and skiplist answer via an `O(n)` scan (the Open
    /// Question resolution recorded in `SPEC_FULL.md` §4); the hash table
    /// answers in `O(1)` from its running counter. Never returns
    /// `ERROR_UNSUPPORTED_FEATURE` under this resolution.
    pub fn count<R: Reclaim>(&self, reclaim: &R) -> Result<u64> {
        Ok(match &self.backend {
            Backend::List(l) => l.count(reclaim),
            Backend::Skiplist(s) => s.count(reclaim),
            Backend::HashTable(h) => h.count(),
        })
    }

    /// Begin a weakly isolated forward iteration starting at the smallest
    /// key `>= from` (or the smallest key, if `from` is `None`). Ordered for
    /// list/skiplist backends; iteration order over a hash table is
    /// bucket order, not key order (`from` is ignored there — use `None`).
    pub fn iter_begin<'a, R: Reclaim>(&'a self, from: Option<&Key>, reclaim: &'a R) -> Result<MapIter<'a, R>> {
        Ok(match &self.backend {
            Backend::List(l) => MapIter::List(l.iter_from(from, reclaim)),
            Backend::Skiplist(s) => MapIter::Skiplist(s.iter_from(from, reclaim)),
            Backend::HashTable(h) => {
                if from.is_some() {
                    return Err(Error::UnsupportedFeature);
                }
                MapIter::HashTable(h.iter_begin())
            }
        })
    }

    /// Best-effort debug dump of live entries, bounded to avoid an unbounded
    /// walk under heavy concurrent mutation (spec.md §4.6 names `print` but
    /// leaves its exact form unspecified; see `SPEC_FULL.md` §3).
    pub fn print<R: Reclaim>(&self, reclaim: &R) {
        const MAX_PRINTED: usize = 64;
        let mut iter = match self.iter_begin(None, reclaim) {
            Ok(it) => it,
            Err(_) => return,
        };
        let mut printed = 0;
        while let Some((key, value)) = iter.next() {
            log::debug!("{:?} => {}", DebugKey(&key), value);
            printed += 1;
            if printed >= MAX_PRINTED {
                log::debug!("... truncated at {} entries", MAX_PRINTED);
                break;
            }
        }
    }
}

struct DebugKey<'a>(&'a Key);

impl core::fmt::Debug for DebugKey<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.0 {
            Key::Int(v) => write!(f, "{}", v),
            Key::Bytes(b) => write!(f, "{:?}", b),
        }
    }
}

/// Iterator over a [`Map`]'s live entries, dispatching to the active
/// back-end's own iterator type.
pub enum MapIter<'a, R: Reclaim> {
    List(list::Iter<'a, R>),
    Skiplist(skiplist::Iter<'a, R>),
    HashTable(hashtable::Iter<'a>),
}

impl<'a, R: Reclaim> MapIter<'a, R> {
    /// `iter_next`.
    pub fn next(&mut self) -> Option<(Key, u64)> {
        match self {
            MapIter::List(it) => it.next(),
            MapIter::Skiplist(it) => it.next(),
            MapIter::HashTable(it) => it.next(),
        }
    }
}

// `iter_free` is each variant's own `Drop` (list/skiplist hold no extra
// resource; `hashtable::Iter` releases a generation refcount).

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::Epoch;
    use crate::key::DEFAULT_KEY_DESCRIPTOR;

    #[test]
    fn facade_dispatches_to_skiplist() {
        let map = Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR);
        let epoch = Epoch::new();
        let g = epoch.register();
        assert_eq!(map.add(Key::Int(1), 10, &g), DOES_NOT_EXIST);
        assert_eq!(map.get(&Key::Int(1), &g), 10);
        assert_eq!(map.set(Key::Int(1), 11, &g), 10);
        assert_eq!(map.count(&g).unwrap(), 1);
        assert_eq!(map.remove(&Key::Int(1), &g), 11);
    }

    #[test]
    fn facade_dispatches_to_hash_table() {
        let map = Map::new_hash_int();
        let epoch = Epoch::new();
        let g = epoch.register();
        assert_eq!(map.add(Key::Int(5), 50, &g), DOES_NOT_EXIST);
        assert_eq!(map.replace(Key::Int(5), 51, &g), 50);
        assert_eq!(map.cas(Key::Int(5), 51, 52, &g), 51);
        assert_eq!(map.count(&g).unwrap(), 1);
    }

    #[test]
    fn hash_table_iteration_with_from_is_unsupported() {
        let map = Map::new_hash_int();
        let epoch = Epoch::new();
        let g = epoch.register();
        map.add(Key::Int(1), 1, &g);
        assert!(map.iter_begin(Some(&Key::Int(1)), &g).is_err());
        assert!(map.iter_begin(None, &g).is_ok());
    }
}
