//! Waiting-for-event set (component C): `domid -> ticket` with O(1)-ish
//! insert/remove/lookup, iteration reserved for teardown.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::domain::DomId;
use crate::ticket::TicketId;

#[derive(Debug, Default)]
pub struct WaitSet {
    map: BTreeMap<DomId, TicketId>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self { map: BTreeMap::new() }
    }

    pub fn insert(&mut self, domid: DomId, ticket: TicketId) {
        self.map.insert(domid, ticket);
    }

    pub fn remove(&mut self, domid: DomId) -> Option<TicketId> {
        self.map.remove(&domid)
    }

    pub fn get(&self, domid: DomId) -> Option<TicketId> {
        self.map.get(&domid).copied()
    }

    pub fn contains(&self, domid: DomId) -> bool {
        self.map.contains_key(&domid)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drain every entry, for teardown during reconfiguration.
    pub fn drain(&mut self) -> Vec<(DomId, TicketId)> {
        core::mem::take(&mut self.map).into_iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DomId, TicketId)> + '_ {
        self.map.iter().map(|(&d, &t)| (d, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let mut w = WaitSet::new();
        w.insert(1, TicketId(10));
        assert_eq!(w.get(1), Some(TicketId(10)));
        assert!(w.contains(1));
        assert_eq!(w.remove(1), Some(TicketId(10)));
        assert!(!w.contains(1));
    }

    #[test]
    fn drain_empties_set() {
        let mut w = WaitSet::new();
        w.insert(1, TicketId(1));
        w.insert(2, TicketId(2));
        let drained = w.drain();
        assert_eq!(drained.len(), 2);
        assert!(w.is_empty());
    }
}
