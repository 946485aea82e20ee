//! Error types for the gang scheduler core.
//!
//! One flat enum covering the error kinds spec.md S7 names, hand-rolling
//! `Display` rather than reaching for a derive crate -- the same choice the
//! teacher's `KernelError` (`kernel/src/error.rs`) makes to keep the no_std
//! build independent of proc-macro-heavy error crates.

use alloc::vec::Vec;
use core::fmt;

use crate::bitset::CpuMask;
use crate::domain::DomId;

/// Errors produced by validation, admission, and reconfiguration.
///
/// `Fatal` is reserved for internal invariant violations (spec.md S7) --
/// callers that observe one should treat it as a scheduler bug, not a
/// request to reject; the core itself only constructs it from
/// `debug_assert!`-style checks that are compiled out in release builds
/// everywhere except the handful of call sites that must check even in
/// release (see `ticket::Arena::free`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GangError {
    /// Bad domid, unknown policy type, out-of-range CPU id, policy
    /// parameters violating an invariant, duplicate domid.
    Malformed { field: &'static str, reason: &'static str },
    /// Unknown domain or pool, or domain not in the requested pool.
    NotFound { resource: &'static str, id: u64 },
    /// Schedulability test failed. Lists each offending CPU with the set
    /// of domains that overloaded it.
    Capacity { offending: Vec<(u16, Vec<DomId>)> },
    /// Concurrent reconfiguration attempt; retry is safe.
    Busy,
    /// Caller is not on pool 0 / not privileged.
    Permission { operation: &'static str },
    /// At least one pool CPU failed to reach a barrier within the
    /// adjustment bound. Advisory: the reconfiguration still completed.
    Timeout { stuck: CpuMask },
    /// Internal invariant violated. Indicates a scheduler bug.
    Fatal { invariant: &'static str },
}

impl fmt::Display for GangError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { field, reason } => {
                write!(f, "malformed configuration: {field}: {reason}")
            }
            Self::NotFound { resource, id } => write!(f, "{resource} {id} not found"),
            Self::Capacity { offending } => {
                write!(f, "schedulability test failed on {} cpu(s)", offending.len())
            }
            Self::Busy => write!(f, "a reconfiguration is already in progress"),
            Self::Permission { operation } => {
                write!(f, "permission denied for {operation}")
            }
            Self::Timeout { stuck } => {
                write!(f, "reconfiguration barrier timed out, {} cpu(s) stuck", stuck.popcount())
            }
            Self::Fatal { invariant } => write!(f, "invariant violated: {invariant}"),
        }
    }
}

/// Result alias used throughout the crate.
pub type GangResult<T> = Result<T, GangError>;
