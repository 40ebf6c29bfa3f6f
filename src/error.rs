//! Error sentinels returned by map and STM operations.
//!
//! The library never panics or unwinds on caller misuse; every fallible
//! operation returns one of these codes instead. Absence of a mapping is
//! `DOES_NOT_EXIST` (a valid value, not an error) and is therefore not
//! represented here — see [`crate::key`].

use core::fmt;

/// Negative-sentinel error codes, distinct from any valid map value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested operation is not supported by this map implementation.
    UnsupportedFeature,
    /// An option or flag combination was not recognized.
    InvalidOption,
    /// An argument was out of range or otherwise malformed.
    InvalidArgument,
    /// The operation requires a running transaction, but none was supplied.
    TxnNotRunning,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::UnsupportedFeature => "operation unsupported by this map implementation",
            Error::InvalidOption => "invalid option or flag combination",
            Error::InvalidArgument => "invalid argument",
            Error::TxnNotRunning => "transaction is not running",
        };
        f.write_str(msg)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
