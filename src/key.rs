//! Reserved value encodings and key representations.
//!
//! Values stored in any map are opaque 64-bit words. A handful of bit
//! patterns are reserved (spec §3, §6) and must be bit-exact across every
//! back-end so that the STM layer (which rides tagged pointers inside the
//! value slot) and the hash table (which rides a tag on its value word) can
//! interoperate with all three map implementations.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Ordering as CmpOrdering;

/// Absence of a mapping. Never an error, always a legitimate return.
pub const DOES_NOT_EXIST: u64 = 0;

/// High bit, available as a flag riding on a pointer or value.
pub const TAG1: u64 = 1 << 63;

/// Second-highest bit, available as a flag riding on a pointer or value.
pub const TAG2: u64 = 1 << 62;

/// Marker for a logically removed entry: all bits set except `TAG1`.
pub const TOMBSTONE: u64 = !TAG1;

/// Hash-table-only marker: the slot's live content has moved to the
/// successor generation. Equal to `TAG1 | TOMBSTONE`, i.e. all bits set.
pub const COPIED: u64 = !0u64;

/// STM: the version field of an update record whose transaction aborted.
pub const ABORTED_VERSION: u64 = TAG1 | 0;

/// Sentinel `write_ts` meaning "not yet assigned".
pub const UNDETERMINED: u64 = u64::MAX;

/// Mask selecting the low 48 bits an address or integer key must fit in.
pub const LOW48_MASK: u64 = (1 << 48) - 1;

#[inline(always)]
pub const fn has_tag1(word: u64) -> bool {
    word & TAG1 != 0
}

#[inline(always)]
pub const fn has_tag2(word: u64) -> bool {
    word & TAG2 != 0
}

#[inline(always)]
pub const fn with_tag1(word: u64) -> u64 {
    word | TAG1
}

#[inline(always)]
pub const fn with_tag2(word: u64) -> u64 {
    word | TAG2
}

#[inline(always)]
pub const fn without_tag1(word: u64) -> u64 {
    word & !TAG1
}

#[inline(always)]
pub const fn without_tag2(word: u64) -> u64 {
    word & !TAG2
}

#[inline(always)]
pub const fn without_tags(word: u64) -> u64 {
    word & !(TAG1 | TAG2)
}

/// Pack a pointer into the low 48 bits and a tag into bit 63/62, as used by
/// the STM update-chain encoding riding inside a map's value slot.
#[inline(always)]
pub fn pack_tagged_ptr<T>(tag: u64, ptr: *mut T) -> u64 {
    debug_assert_eq!(ptr as u64 & !LOW48_MASK, 0, "pointer must fit in 48 bits");
    tag | (ptr as u64 & LOW48_MASK)
}

/// Recover a pointer previously packed with [`pack_tagged_ptr`].
///
/// # Safety
/// The caller must ensure `word`'s low 48 bits were produced from a valid
/// `*mut T` by [`pack_tagged_ptr`] and that the pointee is still live.
#[inline(always)]
pub unsafe fn unpack_tagged_ptr<T>(word: u64) -> *mut T {
    (word & LOW48_MASK) as *mut T
}

/// Function pointers describing an opaque byte-string key type (spec §3).
#[derive(Clone, Copy)]
pub struct KeyDescriptor {
    /// 32-bit hash over the key's bytes.
    pub hash: fn(&[u8]) -> u32,
    /// Three-way comparison, same contract as `Ord::cmp` but over `&[u8]`.
    pub cmp: fn(&[u8], &[u8]) -> i32,
}

/// FNV-1a 32-bit hash, the crate's default [`KeyDescriptor::hash`].
///
/// A real deployment is expected to supply its own hash function (spec §1
/// places "the hash function" among the out-of-scope collaborators); this
/// one exists so the crate is runnable end to end without an external crate.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut h = OFFSET;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(PRIME);
    }
    h
}

/// Default descriptor: FNV-1a hash, lexicographic byte comparison.
pub const DEFAULT_KEY_DESCRIPTOR: KeyDescriptor = KeyDescriptor {
    hash: fnv1a32,
    cmp: |a, b| match a.cmp(b) {
        CmpOrdering::Less => -1,
        CmpOrdering::Equal => 0,
        CmpOrdering::Greater => 1,
    },
};

/// A map key: either an integer word, or an owned, immutable, length-prefixed
/// byte string compared/hashed through a [`KeyDescriptor`].
///
/// This is the generic key type used by the list and skiplist back-ends.
/// The hash table additionally packs whichever variant is in use into a
/// single 64-bit composite word (see [`crate::hashtable`]).
#[derive(Clone)]
pub enum Key {
    /// An integer key, ordered naturally.
    Int(u64),
    /// An owned byte-string key, ordered and hashed via a descriptor.
    Bytes(Box<[u8]>),
}

impl Key {
    /// Build a byte-string key by copying `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Key::Bytes(bytes.to_vec().into_boxed_slice())
    }

    /// The 32-bit hash of this key under `desc` (ignored for `Int` keys,
    /// which hash to their own low 32 bits so both kinds pack consistently
    /// into the hash table's composite key word).
    pub fn hash32(&self, desc: &KeyDescriptor) -> u32 {
        match self {
            Key::Int(v) => *v as u32 ^ (*v >> 32) as u32,
            Key::Bytes(b) => (desc.hash)(b),
        }
    }

    /// Three-way comparison under `desc`.
    pub fn compare(&self, other: &Key, desc: &KeyDescriptor) -> CmpOrdering {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Bytes(a), Key::Bytes(b)) => match (desc.cmp)(a, b) {
                x if x < 0 => CmpOrdering::Less,
                0 => CmpOrdering::Equal,
                _ => CmpOrdering::Greater,
            },
            // Keys of a single map are always homogeneous; mixing variants
            // is a caller bug, arbitrarily but deterministically ordered.
            (Key::Int(_), Key::Bytes(_)) => CmpOrdering::Less,
            (Key::Bytes(_), Key::Int(_)) => CmpOrdering::Greater,
        }
    }
}

/// Owning container for keys produced while walking a map, used by
/// `iter_begin`/`iter_next` callers that want a `Vec` snapshot of keys.
pub type KeyVec = Vec<Key>;
