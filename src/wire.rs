//! Configuration blob wire format (spec.md S6): the fixed-size record
//! layout transported between the control agent and the scheduler.
//!
//! Hand-rolled rather than built on a serialisation crate -- the teacher's
//! own ABI-facing types (`kernel/src/syscall/*`) marshal by hand into fixed
//! byte layouts too, since a hypercall payload has no room for a
//! self-describing format. Every integer is little-endian.

use alloc::vec::Vec;

use crate::bitset::{CpuId, CpuMask, MAX_CPUS};
use crate::domain::{DomId, Domain, MuxPolicy};
use crate::error::GangError;
use crate::time::Ns;

/// `GANG_SCHED_MAX_DOMAINS` (spec.md S6).
pub const GANG_SCHED_MAX_DOMAINS: u16 = 4096;

const CPUMAP_BYTES: usize = MAX_CPUS / 8;
/// `domid(4) + cpumap(32) + kind(1) + from(8) + period(8) + active_time(8) + weight(2) + space_filling(1)`.
const ENTRY_BYTES: usize = 4 + CPUMAP_BYTES + 1 + 8 + 8 + 8 + 2 + 1;
const HEADER_BYTES: usize = 2;

const KIND_NOT_SET: u8 = 0;
const KIND_EXCLUSIVE: u8 = 1;
const KIND_TT: u8 = 2;
const KIND_ET: u8 = 3;
const KIND_BE: u8 = 4;

fn cpumap_to_bytes(mask: &CpuMask) -> [u8; CPUMAP_BYTES] {
    let mut out = [0u8; CPUMAP_BYTES];
    for cpu in mask.iter() {
        let idx = cpu as usize / 8;
        let bit = cpu as usize % 8;
        out[idx] |= 1 << bit;
    }
    out
}

fn cpumap_from_bytes(bytes: &[u8]) -> CpuMask {
    let mut mask = CpuMask::empty();
    for (idx, byte) in bytes.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                let cpu = (idx * 8 + bit) as CpuId;
                mask.set(cpu);
            }
        }
    }
    mask
}

/// Encode one domain's policy + cpumap entry (spec.md S6's
/// `policy: tagged_variant`).
fn encode_entry(out: &mut Vec<u8>, domid: DomId, cpumask: &CpuMask, policy: &MuxPolicy) {
    out.extend_from_slice(&(domid as i32).to_le_bytes());
    out.extend_from_slice(&cpumap_to_bytes(cpumask));

    let (kind, from, period, active_time, weight, space_filling): (u8, Ns, Ns, Ns, u16, u8) = match *policy {
        MuxPolicy::Exclusive { from } => (KIND_EXCLUSIVE, from, 0, 0, 0, 0),
        MuxPolicy::TimeTriggered { from, period, active_time, space_filling } => {
            (KIND_TT, from, period, active_time, 0, space_filling as u8)
        }
        MuxPolicy::EventTriggered { from, period, active_time, space_filling } => {
            (KIND_ET, from, period, active_time, 0, space_filling as u8)
        }
        MuxPolicy::BestEffort { from, weight, space_filling } => {
            (KIND_BE, from, 0, 0, weight, space_filling as u8)
        }
    };

    out.push(kind);
    out.extend_from_slice(&from.to_le_bytes());
    out.extend_from_slice(&period.to_le_bytes());
    out.extend_from_slice(&active_time.to_le_bytes());
    out.extend_from_slice(&weight.to_le_bytes());
    out.push(space_filling);
}

/// Marshal a set of domains into a configuration blob.
///
/// Fails only if the caller somehow has more domains than the wire format
/// can address; every other rejection (duplicate domid, malformed policy)
/// happens downstream in reconfiguration, which is where spec.md S4.I
/// places "parse and validate the incoming entries".
pub fn encode_config(domains: &[Domain]) -> Result<Vec<u8>, GangError> {
    if domains.len() > GANG_SCHED_MAX_DOMAINS as usize {
        return Err(GangError::Malformed {
            field: "num_dom_entries",
            reason: "exceeds GANG_SCHED_MAX_DOMAINS",
        });
    }

    let mut out = Vec::with_capacity(HEADER_BYTES + domains.len() * ENTRY_BYTES);
    out.extend_from_slice(&(domains.len() as u16).to_le_bytes());
    for d in domains {
        encode_entry(&mut out, d.domid, &d.cpumask, &d.policy);
    }
    Ok(out)
}

/// Unmarshal a configuration blob into domains, in wire order.
///
/// Only rejects malformed *encoding* (short buffer, bad entry count, an
/// unrecognised `kind` byte); policy-field validity (e.g. `active_time <
/// period`) and cross-domain checks (duplicate domid, `cpumask ⊆ pool`) are
/// the caller's job, not the marshaller's.
pub fn decode_config(bytes: &[u8]) -> Result<Vec<Domain>, GangError> {
    if bytes.len() < HEADER_BYTES {
        return Err(GangError::Malformed { field: "blob", reason: "shorter than the header" });
    }

    let num_dom_entries = u16::from_le_bytes([bytes[0], bytes[1]]);
    if num_dom_entries > GANG_SCHED_MAX_DOMAINS {
        return Err(GangError::Malformed {
            field: "num_dom_entries",
            reason: "exceeds GANG_SCHED_MAX_DOMAINS",
        });
    }

    let expected_len = HEADER_BYTES + num_dom_entries as usize * ENTRY_BYTES;
    if bytes.len() < expected_len {
        return Err(GangError::Malformed { field: "blob", reason: "truncated entry array" });
    }

    let mut domains = Vec::with_capacity(num_dom_entries as usize);
    let mut cursor = HEADER_BYTES;

    for _ in 0..num_dom_entries {
        let entry = &bytes[cursor..cursor + ENTRY_BYTES];
        cursor += ENTRY_BYTES;

        let domid = i32::from_le_bytes(entry[0..4].try_into().unwrap());
        if domid <= 0 {
            return Err(GangError::Malformed { field: "domid", reason: "must be positive" });
        }
        let cpumask = cpumap_from_bytes(&entry[4..4 + CPUMAP_BYTES]);

        let mut off = 4 + CPUMAP_BYTES;
        let kind = entry[off];
        off += 1;
        let from = u64::from_le_bytes(entry[off..off + 8].try_into().unwrap());
        off += 8;
        let period = u64::from_le_bytes(entry[off..off + 8].try_into().unwrap());
        off += 8;
        let active_time = u64::from_le_bytes(entry[off..off + 8].try_into().unwrap());
        off += 8;
        let weight = u16::from_le_bytes(entry[off..off + 2].try_into().unwrap());
        off += 2;
        let space_filling = entry[off] != 0;

        let policy = match kind {
            KIND_EXCLUSIVE => MuxPolicy::Exclusive { from },
            KIND_TT => MuxPolicy::TimeTriggered { from, period, active_time, space_filling },
            KIND_ET => MuxPolicy::EventTriggered { from, period, active_time, space_filling },
            KIND_BE => MuxPolicy::BestEffort { from, weight, space_filling },
            KIND_NOT_SET => {
                return Err(GangError::Malformed { field: "policy.kind", reason: "NotSet is not a valid entry" })
            }
            _ => return Err(GangError::Malformed { field: "policy.kind", reason: "unrecognised tag" }),
        };

        domains.push(Domain::new(domid as DomId, cpumask, policy));
    }

    Ok(domains)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_policies() {
        let domains = alloc::vec![
            Domain::new(1, [0u16, 1].into_iter().collect(), MuxPolicy::Exclusive { from: 0 }),
            Domain::new(
                2,
                [2u16, 3].into_iter().collect(),
                MuxPolicy::TimeTriggered { from: 10, period: 100, active_time: 40, space_filling: true },
            ),
            Domain::new(
                3,
                [4u16].into_iter().collect(),
                MuxPolicy::BestEffort { from: 0, weight: 128, space_filling: false },
            ),
        ];

        let blob = encode_config(&domains).unwrap();
        let back = decode_config(&blob).unwrap();

        assert_eq!(back.len(), 3);
        assert_eq!(back[0].domid, 1);
        assert_eq!(back[0].cpumask, domains[0].cpumask);
        assert!(matches!(back[1].policy, MuxPolicy::TimeTriggered { period: 100, active_time: 40, .. }));
        assert!(matches!(back[2].policy, MuxPolicy::BestEffort { weight: 128, .. }));
    }

    #[test]
    fn truncated_blob_rejected() {
        let domains = alloc::vec![Domain::new(1, [0u16].into_iter().collect(), MuxPolicy::Exclusive { from: 0 })];
        let mut blob = encode_config(&domains).unwrap();
        blob.truncate(blob.len() - 1);
        assert!(matches!(decode_config(&blob), Err(GangError::Malformed { .. })));
    }

    #[test]
    fn not_set_kind_rejected() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.extend_from_slice(&[0u8; ENTRY_BYTES]);
        blob[2..6].copy_from_slice(&1i32.to_le_bytes()); // valid domid, NotSet kind byte stays 0
        assert!(matches!(decode_config(&blob), Err(GangError::Malformed { .. })));
    }

    #[test]
    fn entry_count_over_max_rejected() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&(GANG_SCHED_MAX_DOMAINS + 1).to_le_bytes());
        assert!(matches!(decode_config(&blob), Err(GangError::Malformed { .. })));
    }
}
