/*!
 * `weevil_core` is the feedback-encoding core of the Weevil coverage-guided
 * fuzzer, linked both into the engine and into the instrumented target.
 *
 * It owns the numerical contract that every producer (runner-side
 * instrumentation callbacks) and every consumer (corpus evaluator, mutator,
 * reporter) must agree on bit-for-bit:
 *
 * - [`features`]: the partition of the 64-bit feature space into fixed-size
 *   domains, and the encoders that turn raw signals (PC indices, 8-bit edge
 *   counters, comparison operands) into [`Feature`] values.
 * - [`byteset`]: fixed-capacity counter arrays written concurrently by the
 *   target and drained by a single observer thread.
 * - [`torc`]: lossy ring buffers remembering the operands of recently
 *   observed integer and buffer comparisons.
 * - [`dictionary`]: miners that match those tables against a concrete input
 *   to propose mutation dictionary entries.
 *
 * Everything here sits on the hottest path of every fuzzing execution, so
 * the write-side operations are wait-free, allocation-free, and use relaxed
 * atomics where they are shared. Engine-side queries are allowed to
 * allocate.
 */
#![no_std]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]
#![cfg_attr(test, deny(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_must_use,
))]

extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

pub mod byteset;
pub mod dictionary;
pub mod features;
pub mod rands;
pub mod torc;

pub use features::{Feature, FeatureVec};

use alloc::string::String;
use core::fmt::{self, Display};

/// Main error type of the crate.
///
/// Only engine-side, fallible decodes return [`Error`]. Target-side contract
/// violations (out-of-range byte-set indices, misaligned sweep bounds, zero
/// counter values) panic instead: the write side runs inside the fuzz target
/// and must stay free of error plumbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The argument passed to this method or function is not valid.
    IllegalArgument(String),
    /// You're holding it wrong.
    IllegalState(String),
    /// Something else happened.
    Unknown(String),
}

impl Error {
    /// The argument passed to this method or function is not valid.
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into())
    }

    /// You're holding it wrong.
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into())
    }

    /// Something else happened.
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IllegalArgument(s) => write!(f, "Illegal argument: {s}"),
            Error::IllegalState(s) => write!(f, "Illegal state: {s}"),
            Error::Unknown(s) => write!(f, "Unknown error: {s}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
