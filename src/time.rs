//! Nanosecond time quantities.
//!
//! Time is kept as plain `u64` nanoseconds rather than a newtype: every
//! formula in spec.md S4.E/S4.F is stated directly in terms of integer
//! arithmetic on absolute nanosecond timestamps, and a newtype would just
//! add `.0` noise at every call site without adding safety (there is only
//! ever one unit in play).

/// Absolute or relative nanosecond quantity.
pub type Ns = u64;

/// Sentinel for "never / no deadline" (spec.md S3).
pub const INFINITY: Ns = u64::MAX;

/// Slack tolerated in `now - activated_at` before a clock regression is
/// treated as a bug (spec.md S4.E step 1).
pub const CLOCK_SLACK: Ns = 10_000; // 10 microseconds

/// Minimum time an activation may have remaining before it is considered
/// complete and re-armed (spec.md S4.E step 3).
pub const MARGIN: Ns = 10_000; // 10 microseconds

/// Largest finite quantity; anything at or above this is treated as
/// [`INFINITY`] by callers that need to distinguish "huge" from "unbounded".
#[inline]
pub fn is_infinite(t: Ns) -> bool {
    t == INFINITY
}

/// `floor(t / grain) * grain`.
#[inline]
pub fn floor_to_grain(t: Ns, grain: Ns) -> Ns {
    debug_assert!(grain > 0);
    (t / grain) * grain
}

/// `ceil(t / grain) * grain`.
#[inline]
pub fn ceil_to_grain(t: Ns, grain: Ns) -> Ns {
    debug_assert!(grain > 0);
    let rem = t % grain;
    if rem == 0 {
        t
    } else {
        t - rem + grain
    }
}

/// Saturating `a + b`, propagating [`INFINITY`].
#[inline]
pub fn add_sat(a: Ns, b: Ns) -> Ns {
    if is_infinite(a) || is_infinite(b) {
        INFINITY
    } else {
        a.saturating_add(b)
    }
}

/// `max(a, b)` treating [`INFINITY`] as largest.
#[inline]
pub fn min(a: Ns, b: Ns) -> Ns {
    core::cmp::min(a, b)
}

/// Advance `from` by whole periods until it is `>= target`
/// (`adjust_activation_time` in spec.md S4.I step 7d).
#[inline]
pub fn adjust_activation_time(target: Ns, from: Ns, period: Ns) -> Ns {
    debug_assert!(period > 0);
    if from >= target {
        return from;
    }
    let periods = (target - from).div_ceil(period);
    from + periods * period
}
