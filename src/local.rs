//! Local scheduler state (component D).
//!
//! Spec.md S4.D composes the EDF queue, activation queue, and waiting set
//! with a `current_ticket` table indexed by *pool-wide* CPU id, because a
//! single decision step picks tickets for every CPU in a cohort at once.
//! We model that literally: a [`LocalScheduler`] is shared by every CPU in
//! one cohort (spec.md S3's cohort invariant -- "two CPUs in the same
//! cohort must carry identical views of all domains touching either" --
//! already requires their queue state to be identical, so one shared
//! instance per cohort is the natural reading, not N duplicated-and-
//! synchronized copies). `topology::Topology` hands out a `CohortId` per
//! CPU; callers look up the cohort's `LocalScheduler` through that id.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::bitset::CpuId;
use crate::domain::{DomId, Domain};
use crate::queue::{ActivationQueue, EdfQueue};
use crate::ticket::{Arena, TicketId};
use crate::waitset::WaitSet;

/// Per-cohort scheduler state (spec.md S4.D).
#[derive(Debug, Default)]
pub struct LocalScheduler {
    pub edf: EdfQueue,
    pub activation: ActivationQueue,
    pub waiting: WaitSet,
    /// `cpu id -> running ticket`, pool-wide indices.
    pub current_ticket: BTreeMap<CpuId, TicketId>,
    pub arena: Arena,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self {
            edf: EdfQueue::new(),
            activation: ActivationQueue::new(),
            waiting: WaitSet::new(),
            current_ticket: BTreeMap::new(),
            arena: Arena::new(),
        }
    }

    /// Install `ticket` as running on every CPU in `cpumask`
    /// (spec.md S4.F step 4b, the gang invariant).
    pub fn install_running(&mut self, cpumask: &crate::bitset::CpuMask, ticket: TicketId) {
        for cpu in cpumask.iter() {
            self.current_ticket.insert(cpu, ticket);
        }
    }

    /// Clear the running slot for every CPU in `cpumask`.
    pub fn clear_running(&mut self, cpumask: &crate::bitset::CpuMask) {
        for cpu in cpumask.iter() {
            self.current_ticket.remove(&cpu);
        }
    }

    pub fn running_on(&self, cpu: CpuId) -> Option<TicketId> {
        self.current_ticket.get(&cpu).copied()
    }

    /// Free every ticket owned by this scheduler, freeing exactly one
    /// ticket per domain even though the same [`TicketId`] may be
    /// installed under several CPUs in `current_ticket` (spec.md S4.D).
    /// `Arena::free` is idempotent, so walking all four locations and
    /// freeing each id once is sufficient without an explicit
    /// already-cleared accumulator; the domains list is accepted purely
    /// to document/assert that every freed ticket's domain is expected
    /// here.
    pub fn drain(&mut self, domains: &BTreeMap<DomId, Domain>) {
        let _ = domains; // kept for the doc contract / future assertions
        let mut ids: Vec<TicketId> = Vec::new();
        ids.extend(self.current_ticket.values().copied());
        while let Some((_, _, t)) = self.edf.pop_min() {
            ids.push(t);
        }
        while let Some((_, _, t)) = self.activation.pop_min() {
            ids.push(t);
        }
        for (_, t) in self.waiting.drain() {
            ids.push(t);
        }
        for id in ids {
            self.arena.free(id);
        }
        self.current_ticket.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::CpuMask;

    #[test]
    fn install_running_sets_every_cpu_in_mask() {
        let mut s = LocalScheduler::new();
        let tid = s.arena.alloc(1);
        let mask: CpuMask = [0u16, 1, 2].into_iter().collect();
        s.install_running(&mask, tid);
        assert_eq!(s.running_on(0), Some(tid));
        assert_eq!(s.running_on(1), Some(tid));
        assert_eq!(s.running_on(2), Some(tid));
        assert_eq!(s.running_on(3), None);
    }

    #[test]
    fn drain_frees_shared_ticket_once_and_empties_queues() {
        let mut s = LocalScheduler::new();
        let tid = s.arena.alloc(1);
        let mask: CpuMask = [0u16, 1].into_iter().collect();
        s.install_running(&mask, tid);
        s.edf.insert(100, 2, s.arena.alloc(2));
        s.activation.insert(50, 3, s.arena.alloc(3));
        s.waiting.insert(4, s.arena.alloc(4));

        s.drain(&BTreeMap::new());

        assert!(s.is_empty());
        assert!(s.current_ticket.is_empty());
        assert!(s.edf.is_empty());
        assert!(s.activation.is_empty());
        assert!(s.waiting.is_empty());
    }
}
