//! Tickets: per-gang scheduling control blocks, and the arena that owns them.
//!
//! Cyclic references (ticket <-> VCPU <-> domain) in the original source are
//! back-pointers only; we model them as ids plus lookup tables (spec.md S9)
//! instead of carrying real pointers. Storage is a single arena with stable
//! ids rather than the several different allocation strategies the original
//! mixed (per-VCPU pool, hashtable-embedded pool allocator) -- spec.md S9
//! calls the arena approach out explicitly as the cleaner replacement that
//! avoids double-free gymnastics for tickets shared across a muxgroup.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::domain::DomId;
use crate::time::Ns;

/// Stable index into a [`Arena`]. Never reused while the ticket it named is
/// still reachable from a queue or the waiting set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketId(pub u32);

bitflags! {
    /// Flag set carried on a ticket (spec.md S3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TicketFlags: u8 {
        /// Guest asked to yield this one VCPU, not the whole domain.
        const SINGLE_YIELD = 0b0000_0001;
        /// VCPU is blocked (e.g. waiting on I/O); eligible as a
        /// space-filling substitute's target.
        const SLEEPING     = 0b0000_0010;
        /// VCPU has just transitioned out of sleep; one-shot marker
        /// consumed by the next schedule decision.
        const JUST_WOKE    = 0b0000_0100;
    }
}

/// Where a ticket currently resides. Spec.md S3's invariant is that a
/// ticket is in exactly one of these at any instant; this enum exists
/// purely for assertions and debugging, the queues/waiting-set/`current`
/// table are the actual source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketLocation {
    Edf,
    Activation,
    Waiting,
    Running,
}

/// Per-gang scheduling control block (spec.md S3). One per domain gang: the
/// domain's full VCPU set is gang-scheduled together, so exactly one ticket
/// object stands in for the whole gang in the EDF/activation queues (which
/// are keyed by `domid`, not by an individual VCPU id).
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: TicketId,
    pub domid: DomId,
    pub earliest_start_time: Ns,
    pub deadline: Ns,
    pub remaining_time: Ns,
    pub activated_at: Ns,
    pub flags: TicketFlags,
    /// Space-filling substitute currently occupying this ticket's slot,
    /// if one was picked in the last decision (spec.md S4.F step 7).
    pub substitute: Option<TicketId>,
    pub location: TicketLocation,
}

impl Ticket {
    pub fn new(id: TicketId, domid: DomId) -> Self {
        Self {
            id,
            domid,
            earliest_start_time: 0,
            deadline: 0,
            remaining_time: 0,
            activated_at: 0,
            flags: TicketFlags::empty(),
            substitute: None,
            location: TicketLocation::Waiting,
        }
    }
}

/// Arena owning every live [`Ticket`], indexed by stable [`TicketId`].
#[derive(Debug, Default)]
pub struct Arena {
    slots: Vec<Option<Ticket>>,
    free_list: Vec<TicketId>,
}

impl Arena {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free_list: Vec::new() }
    }

    /// Allocate a fresh ticket for `domid`, reusing a freed slot if one is
    /// available.
    pub fn alloc(&mut self, domid: DomId) -> TicketId {
        if let Some(id) = self.free_list.pop() {
            self.slots[id.0 as usize] = Some(Ticket::new(id, domid));
            id
        } else {
            let id = TicketId(self.slots.len() as u32);
            self.slots.push(Some(Ticket::new(id, domid)));
            id
        }
    }

    pub fn get(&self, id: TicketId) -> Option<&Ticket> {
        self.slots.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: TicketId) -> Option<&mut Ticket> {
        self.slots.get_mut(id.0 as usize).and_then(|s| s.as_mut())
    }

    /// Free a ticket, returning its slot to the free list. Double-freeing a
    /// slot is a no-op (and indicates a bug upstream; callers walking a
    /// muxgroup's "already-cleared" CPU mask should never hit this, but the
    /// arena does not trust that invariant blindly).
    pub fn free(&mut self, id: TicketId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            if slot.take().is_some() {
                self.free_list.push(id);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ticket> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
