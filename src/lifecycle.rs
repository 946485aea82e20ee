//! Ticket time bookkeeping and re-arm (component E, spec.md S4.E).

use crate::config::GangConfig;
use crate::domain::MuxPolicy;
use crate::error::GangError;
use crate::ticket::Ticket;
use crate::time::{floor_to_grain, Ns, CLOCK_SLACK, INFINITY, MARGIN};

/// Update a running ticket's bookkeeping at `now` and, if its slice is
/// spent, re-arm it per its policy. Returns `true` if the ticket was
/// re-armed (i.e. it should move from running to the activation queue).
///
/// Step 1's monotonic-time sanity check is a `Fatal` error: a clock that
/// regresses by more than [`CLOCK_SLACK`] indicates a host bug, not a
/// schedulable condition.
pub fn update_ticket_time(
    ticket: &mut Ticket,
    policy: &MuxPolicy,
    now: Ns,
    cfg: &GangConfig,
    be_doms_in_cohort: u32,
) -> Result<bool, GangError> {
    if policy.is_exclusive() {
        // Step 4: exclusive tickets skip all time arithmetic.
        ticket.deadline = INFINITY;
        return Ok(false);
    }

    let spent = if now >= ticket.activated_at {
        now - ticket.activated_at
    } else {
        let regression = ticket.activated_at - now;
        if regression > CLOCK_SLACK {
            return Err(GangError::Fatal { invariant: "clock regressed past activated_at" });
        }
        0
    };

    ticket.remaining_time = ticket.remaining_time.saturating_sub(spent);

    if ticket.remaining_time >= MARGIN {
        return Ok(false);
    }

    match *policy {
        MuxPolicy::Exclusive { .. } => unreachable!("handled above"),
        MuxPolicy::TimeTriggered { period, active_time, .. } => {
            ticket.earliest_start_time = ticket.earliest_start_time.saturating_add(period);
            ticket.deadline = ticket.deadline.saturating_add(period);
            ticket.remaining_time = active_time;
        }
        MuxPolicy::EventTriggered { period, active_time, .. } => {
            ticket.earliest_start_time = floor_to_grain(now, cfg.grain());
            ticket.deadline = ticket.deadline.saturating_add(period);
            ticket.remaining_time = active_time;
        }
        MuxPolicy::BestEffort { .. } => {
            ticket.earliest_start_time = floor_to_grain(now, cfg.grain());
            ticket.deadline = ticket
                .deadline
                .saturating_add(be_doms_in_cohort as Ns * cfg.be_basic_period());
            ticket.remaining_time = cfg.be_quantum();
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{Ticket, TicketId};

    fn ticket_at(activated_at: Ns, remaining: Ns) -> Ticket {
        let mut t = Ticket::new(TicketId(0), 1);
        t.activated_at = activated_at;
        t.remaining_time = remaining;
        t.deadline = 1_000;
        t.earliest_start_time = 500;
        t
    }

    #[test]
    fn tt_rearm_advances_by_whole_period() {
        let cfg = GangConfig::default();
        let policy = MuxPolicy::TimeTriggered {
            from: 0,
            period: 100,
            active_time: 50,
            space_filling: false,
        };
        let mut t = ticket_at(0, 10); // remaining < MARGIN after 0 spent? already below MARGIN
        let rearmed = update_ticket_time(&mut t, &policy, 0, &cfg, 0).unwrap();
        assert!(rearmed);
        assert_eq!(t.earliest_start_time, 600);
        assert_eq!(t.deadline, 1_100);
        assert_eq!(t.remaining_time, 50);
    }

    #[test]
    fn not_rearmed_while_remaining_above_margin() {
        let cfg = GangConfig::default();
        let policy = MuxPolicy::TimeTriggered {
            from: 0,
            period: 100,
            active_time: 50,
            space_filling: false,
        };
        let mut t = ticket_at(0, 40);
        let rearmed = update_ticket_time(&mut t, &policy, 1, &cfg, 0).unwrap();
        assert!(!rearmed);
        assert_eq!(t.remaining_time, 39);
    }

    #[test]
    fn exclusive_skips_time_arithmetic() {
        let cfg = GangConfig::default();
        let policy = MuxPolicy::Exclusive { from: 0 };
        let mut t = ticket_at(0, 5);
        let rearmed = update_ticket_time(&mut t, &policy, 1_000_000, &cfg, 0).unwrap();
        assert!(!rearmed);
        assert_eq!(t.deadline, INFINITY);
        assert_eq!(t.remaining_time, 5, "exclusive tickets are untouched");
    }

    #[test]
    fn clock_regression_beyond_slack_is_fatal() {
        let cfg = GangConfig::default();
        let policy = MuxPolicy::TimeTriggered {
            from: 0,
            period: 100,
            active_time: 50,
            space_filling: false,
        };
        let mut t = ticket_at(1_000_000, 40);
        let err = update_ticket_time(&mut t, &policy, 0, &cfg, 0).unwrap_err();
        assert!(matches!(err, GangError::Fatal { .. }));
    }

    #[test]
    fn be_rearm_uses_cohort_count_and_quantum() {
        let cfg = GangConfig::new(10, 100, crate::config::DEFAULT_ADJ_TIME_UPPER_BOUND, 1);
        let policy = MuxPolicy::BestEffort { from: 0, weight: 1, space_filling: false };
        let mut t = ticket_at(0, 0);
        t.deadline = 0;
        let rearmed = update_ticket_time(&mut t, &policy, 5, &cfg, 3).unwrap();
        assert!(rearmed);
        assert_eq!(t.deadline, 300); // 3 * be_basic_period(100)
        assert_eq!(t.remaining_time, cfg.be_quantum());
    }
}
