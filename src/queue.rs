//! Priority queues over tickets (component B).
//!
//! Generalizes the teacher's fixed-capacity circular `PriorityQueue`
//! (`sched/queue.rs`) into genuinely ordered containers: spec.md S4.B needs
//! `O(log n)` insert/remove/min-peek keyed by deadline or earliest-start-time
//! with a domid tie-break, which a per-level FIFO ring buffer cannot give.
//! An `alloc::collections::BTreeMap` is the natural ordered-tree container
//! already in scope for a `#![no_std] + alloc` crate (the teacher reaches
//! for the same container in `sched/queue.rs`'s `CfsRunQueue`).
//!
//! Both queues additionally keep a `domid -> key` index so a ticket can be
//! looked up and removed by domain id without a linear scan, since spec.md
//! S4.B calls for "membership lookup by domid" alongside the ordered
//! operations.

use alloc::collections::BTreeMap;

use crate::domain::DomId;
use crate::ticket::TicketId;
use crate::time::Ns;

/// A queue key: primary field first (deadline or earliest-start-time),
/// `domid` as the tie-break. `Ord`'s derive compares fields in declaration
/// order, which gives exactly the ordering spec.md S4.B specifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    primary: Ns,
    domid: DomId,
}

/// Shared implementation behind [`EdfQueue`] and [`ActivationQueue`].
#[derive(Debug, Default)]
struct OrderedTicketQueue {
    by_key: BTreeMap<Key, TicketId>,
    by_domid: BTreeMap<DomId, Key>,
}

impl OrderedTicketQueue {
    fn new() -> Self {
        Self { by_key: BTreeMap::new(), by_domid: BTreeMap::new() }
    }

    fn insert(&mut self, primary: Ns, domid: DomId, ticket: TicketId) {
        let key = Key { primary, domid };
        self.by_key.insert(key, ticket);
        self.by_domid.insert(domid, key);
    }

    fn peek_min(&self) -> Option<(Ns, DomId, TicketId)> {
        self.by_key.iter().next().map(|(k, t)| (k.primary, k.domid, *t))
    }

    fn pop_min(&mut self) -> Option<(Ns, DomId, TicketId)> {
        let (&key, &ticket) = self.by_key.iter().next()?;
        self.by_key.remove(&key);
        self.by_domid.remove(&key.domid);
        Some((key.primary, key.domid, ticket))
    }

    fn remove_by_domid(&mut self, domid: DomId) -> Option<(Ns, TicketId)> {
        let key = self.by_domid.remove(&domid)?;
        let ticket = self.by_key.remove(&key)?;
        Some((key.primary, ticket))
    }

    fn contains_domid(&self, domid: DomId) -> bool {
        self.by_domid.contains_key(&domid)
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }

    fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

macro_rules! ordered_ticket_queue_wrapper {
    ($name:ident, $primary_doc:literal) => {
        #[doc = $primary_doc]
        #[derive(Debug, Default)]
        pub struct $name(OrderedTicketQueue);

        impl $name {
            pub fn new() -> Self {
                Self(OrderedTicketQueue::new())
            }

            /// Insert `ticket` keyed by `primary` (deadline or EST) and
            /// `domid`.
            pub fn insert(&mut self, primary: Ns, domid: DomId, ticket: TicketId) {
                self.0.insert(primary, domid, ticket);
            }

            /// Peek the minimum-key entry without removing it.
            pub fn peek_min(&self) -> Option<(Ns, DomId, TicketId)> {
                self.0.peek_min()
            }

            /// Remove and return the minimum-key entry.
            pub fn pop_min(&mut self) -> Option<(Ns, DomId, TicketId)> {
                self.0.pop_min()
            }

            /// Remove a specific domain's entry, wherever it sits in key
            /// order, so it can be re-homed.
            pub fn remove_by_domid(&mut self, domid: DomId) -> Option<(Ns, TicketId)> {
                self.0.remove_by_domid(domid)
            }

            pub fn contains_domid(&self, domid: DomId) -> bool {
                self.0.contains_domid(domid)
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }
    };
}

ordered_ticket_queue_wrapper!(
    EdfQueue,
    "Runnable tickets ordered by deadline, domid tie-break."
);
ordered_ticket_queue_wrapper!(
    ActivationQueue,
    "Not-yet-runnable tickets ordered by earliest_start_time, domid tie-break."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edf_orders_by_deadline_then_domid() {
        let mut q = EdfQueue::new();
        q.insert(200, 5, TicketId(0));
        q.insert(100, 9, TicketId(1));
        q.insert(100, 3, TicketId(2));

        assert_eq!(q.pop_min(), Some((100, 3, TicketId(2))));
        assert_eq!(q.pop_min(), Some((100, 9, TicketId(1))));
        assert_eq!(q.pop_min(), Some((200, 5, TicketId(0))));
        assert!(q.is_empty());
    }

    #[test]
    fn remove_by_domid_rehoming() {
        let mut q = ActivationQueue::new();
        q.insert(50, 1, TicketId(7));
        q.insert(60, 2, TicketId(8));
        let (est, t) = q.remove_by_domid(1).unwrap();
        assert_eq!(est, 50);
        assert_eq!(t, TicketId(7));
        assert!(!q.contains_domid(1));
        assert!(q.contains_domid(2));
    }

    #[test]
    fn reinsert_moves_key_order() {
        let mut q = ActivationQueue::new();
        q.insert(10, 1, TicketId(0));
        q.remove_by_domid(1);
        q.insert(999, 1, TicketId(0));
        assert_eq!(q.peek_min(), Some((999, 1, TicketId(0))));
    }
}
