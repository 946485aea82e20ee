//! Domains and muxing policies (component A: policy model & validation).

use crate::bitset::CpuMask;
use crate::error::GangError;
use crate::time::{Ns, INFINITY};

/// Domain identifier. Always positive once validated.
pub type DomId = u32;

/// A muxing policy, tagged by arm (spec.md S3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxPolicy {
    /// No time sharing; the domain permanently owns its CPUs.
    Exclusive { from: Ns },
    /// Activates on period boundaries relative to `from`.
    TimeTriggered { from: Ns, period: Ns, active_time: Ns, space_filling: bool },
    /// Activates on external wakeup, bounded as a sporadic reservation.
    EventTriggered { from: Ns, period: Ns, active_time: Ns, space_filling: bool },
    /// Weighted round-robin over a system-wide basic period.
    BestEffort { from: Ns, weight: u16, space_filling: bool },
}

impl MuxPolicy {
    /// `from` timestamp every policy carries.
    pub fn from_time(&self) -> Ns {
        match *self {
            Self::Exclusive { from }
            | Self::TimeTriggered { from, .. }
            | Self::EventTriggered { from, .. }
            | Self::BestEffort { from, .. } => from,
        }
    }

    /// Whether a space-filling substitute may occupy this policy's idle gaps.
    pub fn space_filling(&self) -> bool {
        match *self {
            Self::Exclusive { .. } => false,
            Self::TimeTriggered { space_filling, .. }
            | Self::EventTriggered { space_filling, .. }
            | Self::BestEffort { space_filling, .. } => space_filling,
        }
    }

    /// Class used to order domains during admission (Exclusive < TT < ET < BE,
    /// spec.md S4.I step 3).
    pub fn class(&self) -> PolicyClass {
        match self {
            Self::Exclusive { .. } => PolicyClass::Exclusive,
            Self::TimeTriggered { .. } => PolicyClass::TimeTriggered,
            Self::EventTriggered { .. } => PolicyClass::EventTriggered,
            Self::BestEffort { .. } => PolicyClass::BestEffort,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive { .. })
    }

    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::BestEffort { .. })
    }
}

/// Ordering class used by admission and reconfiguration (lower sorts first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PolicyClass {
    Exclusive = 0,
    TimeTriggered = 1,
    EventTriggered = 2,
    BestEffort = 3,
}

/// A domain: a scheduling unit owning a fixed CPU subset (spec.md S3).
#[derive(Debug, Clone)]
pub struct Domain {
    pub domid: DomId,
    pub cpumask: CpuMask,
    pub policy: MuxPolicy,
}

impl Domain {
    pub fn new(domid: DomId, cpumask: CpuMask, policy: MuxPolicy) -> Self {
        Self { domid, cpumask, policy }
    }
}

/// Validate a policy's parameters against the configured minimum time grain.
///
/// Pure: never mutates anything, never consults admitted state. Rejects
/// (spec.md S4.A):
/// - any policy with `from == INFINITY`,
/// - TT/ET with `active_time >= period` or either `<= grain`,
/// - BE with `weight == 0`.
pub fn validate_policy(policy: &MuxPolicy, grain: Ns) -> Result<(), GangError> {
    if policy.from_time() == INFINITY {
        return Err(GangError::Malformed {
            field: "from",
            reason: "must not be INFINITY",
        });
    }

    match *policy {
        MuxPolicy::Exclusive { .. } => Ok(()),
        MuxPolicy::TimeTriggered { period, active_time, .. }
        | MuxPolicy::EventTriggered { period, active_time, .. } => {
            if active_time >= period {
                return Err(GangError::Malformed {
                    field: "active_time",
                    reason: "must be strictly less than period",
                });
            }
            if period <= grain {
                return Err(GangError::Malformed {
                    field: "period",
                    reason: "must exceed the minimum time grain",
                });
            }
            if active_time <= grain {
                return Err(GangError::Malformed {
                    field: "active_time",
                    reason: "must exceed the minimum time grain",
                });
            }
            Ok(())
        }
        MuxPolicy::BestEffort { weight, .. } => {
            if weight == 0 {
                return Err(GangError::Malformed {
                    field: "weight",
                    reason: "must be greater than zero",
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAIN: Ns = 1_000_000; // 1ms

    #[test]
    fn rejects_infinite_from() {
        let p = MuxPolicy::Exclusive { from: INFINITY };
        assert!(validate_policy(&p, GRAIN).is_err());
    }

    #[test]
    fn tt_boundary_active_equals_period_rejected() {
        let p = MuxPolicy::TimeTriggered {
            from: 0,
            period: 100 * GRAIN,
            active_time: 100 * GRAIN,
            space_filling: false,
        };
        assert!(validate_policy(&p, GRAIN).is_err());
    }

    #[test]
    fn tt_boundary_active_one_grain_less_than_period_accepted() {
        let p = MuxPolicy::TimeTriggered {
            from: 0,
            period: 100 * GRAIN,
            active_time: 100 * GRAIN - GRAIN,
            space_filling: false,
        };
        assert!(validate_policy(&p, GRAIN).is_ok());
    }

    #[test]
    fn be_weight_zero_rejected_one_accepted() {
        let bad = MuxPolicy::BestEffort { from: 0, weight: 0, space_filling: false };
        let good = MuxPolicy::BestEffort { from: 0, weight: 1, space_filling: false };
        assert!(validate_policy(&bad, GRAIN).is_err());
        assert!(validate_policy(&good, GRAIN).is_ok());
    }

    #[test]
    fn et_active_time_at_or_below_grain_rejected() {
        let p = MuxPolicy::EventTriggered {
            from: 0,
            period: 10 * GRAIN,
            active_time: GRAIN,
            space_filling: false,
        };
        assert!(validate_policy(&p, GRAIN).is_err());
    }
}
