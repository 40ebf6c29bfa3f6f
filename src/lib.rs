//! # nbds
//!
//! Lock-free ordered and unordered concurrent maps — a Harris–Michael list, a
//! skiplist, and a resizable open-addressed hash table — behind one [`Map`]
//! façade, plus a multi-version timestamp-ordered software transactional
//! memory layer ([`stm`]) on top. Reclamation is pluggable between
//! quiescent-state RCU ([`epoch`]) and hazard pointers ([`hp`]).
//!
//! ## Module Organization
//!
//! ### Foundation
//! - [`cc`] - Compiler compatibility utilities (bit operations, branch hints)
//! - [`malloc`] - Memory allocator abstraction, including a per-thread pooled allocator
//! - [`error`] - The shared error/result vocabulary used across the map layer
//!
//! ### Core Primitives
//! - [`pr`] - Atomic primitives and memory barriers
//! - [`mod@backoff`] - Exponential backoff for contention management
//! - [`registry`] - Thread registration for epoch/hazard-pointer reclamation
//!
//! ### Memory Reclamation
//! - [`reclaim`] - The [`Reclaim`](reclaim::Reclaim) trait unifying the two schemes below
//! - [`epoch`] - Quiescent-state-based reclamation (QSBR)
//! - [`hp`] - Hazard pointer memory reclamation
//!
//! ### Keys and Maps
//! - [`key`] - Key representation and tagged-word encodings shared by every map back-end
//! - [`list`] - Harris–Michael lock-free ordered list
//! - [`skiplist`] - Lock-free skiplist
//! - [`hashtable`] - Resizable lock-free hash table
//! - [`map`] - A uniform façade dispatching over the three back-ends above
//!
//! ### Transactions
//! - [`stm`] - Multi-version timestamp-ordered software transactional memory over [`map`]

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_inception)]

extern crate alloc;

// =============================================================================
// Foundation
// =============================================================================

/// Compiler compatibility utilities.
///
/// Provides bit manipulation operations (ffs, ctz, popcount) and branch prediction hints.
pub mod cc;

/// Memory allocator abstraction.
///
/// Defines the [`Allocator`](malloc::Allocator) trait for custom memory allocation.
pub mod malloc;

/// The error and result vocabulary shared by the key/map/stm layer.
pub mod error;

// =============================================================================
// Core primitives
// =============================================================================

/// Atomic primitives and memory barriers.
pub mod pr;

/// Exponential backoff for contention management.
pub mod backoff;

/// Thread registration for epoch- and hazard-pointer-based reclamation.
pub mod registry;

// =============================================================================
// Memory reclamation
// =============================================================================

/// The `Reclaim` trait unifying the epoch and hazard-pointer schemes.
pub mod reclaim;

/// Quiescent-state-based reclamation (QSBR).
pub mod epoch;

/// Hazard pointer memory reclamation.
pub mod hp;

// =============================================================================
// Keys and maps
// =============================================================================

/// Key representation and tagged-word encodings shared by every map back-end.
pub mod key;

/// Harris–Michael lock-free ordered list.
pub mod list;

/// Lock-free skiplist.
pub mod skiplist;

/// Resizable lock-free hash table.
pub mod hashtable;

/// A uniform façade dispatching over the list/skiplist/hash-table back-ends.
pub mod map;

// =============================================================================
// Transactions
// =============================================================================

/// Multi-version timestamp-ordered software transactional memory over [`map`].
pub mod stm;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use cc::{ctz, ffs, ffsl, ffsll, popcount};
pub use error::{Error, Result};
pub use key::Key;
pub use malloc::Allocator;
pub use map::Map;
pub use reclaim::{DefaultReclaim, Reclaim};
pub use stm::StmRuntime;
