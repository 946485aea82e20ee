//! Cohort and muxgroup topology computation (component G, spec.md S4.G).

use alloc::vec::Vec;
use alloc::collections::BTreeMap;

use crate::bitset::{CpuId, CpuMask};
use crate::domain::{DomId, Domain};

pub type CohortId = u32;
pub type MuxgroupId = u32;

/// Derived topology for one admitted configuration (spec.md S3's "global
/// configuration" arrays).
#[derive(Debug, Default, Clone)]
pub struct Topology {
    pub cohort_masks: Vec<CpuMask>,
    pub cpu_to_cohort: BTreeMap<CpuId, CohortId>,
    /// Count of best-effort domains per cohort, indexed by [`CohortId`]
    /// (spec.md S4.E's BE deadline formula needs this).
    pub be_doms_in_cohort: Vec<u32>,
    pub muxgroup_masks: Vec<CpuMask>,
    pub cpu_to_muxgroup: BTreeMap<CpuId, MuxgroupId>,
    pub muxgroup_to_cohort: Vec<CohortId>,
}

impl Topology {
    pub fn cohort_count(&self) -> usize {
        self.cohort_masks.len()
    }

    pub fn muxgroup_count(&self) -> usize {
        self.muxgroup_masks.len()
    }
}

/// Fixed-point merge of overlapping domain CPU masks into maximal cohorts.
///
/// Inserts each domain; if its mask overlaps an existing cohort, unions
/// into it, otherwise opens a new one; after each insertion, scans for
/// cohort pairs that now overlap and merges them until none do. Lower
/// index wins a merge and `Vec::remove` naturally shifts trailing entries
/// down, matching spec.md S4.G's tie-break rule.
fn merge_cohorts(domains: &[Domain]) -> Vec<(CpuMask, Vec<DomId>)> {
    let mut cohorts: Vec<(CpuMask, Vec<DomId>)> = Vec::new();

    for d in domains {
        let mut mask = d.cpumask;
        let mut doms = alloc::vec![d.domid];

        let mut i = 0;
        while i < cohorts.len() {
            if cohorts[i].0.intersects(&mask) {
                let (m, ds) = cohorts.remove(i);
                mask.union_with(&m);
                doms.extend(ds);
            } else {
                i += 1;
            }
        }
        cohorts.push((mask, doms));

        // Scan for cohorts that now overlap each other and merge until a
        // fixed point is reached.
        loop {
            let mut merged = false;
            'outer: for i in 0..cohorts.len() {
                for j in (i + 1)..cohorts.len() {
                    if cohorts[i].0.intersects(&cohorts[j].0) {
                        let (m, ds) = cohorts.remove(j);
                        cohorts[i].0.union_with(&m);
                        cohorts[i].1.extend(ds);
                        merged = true;
                        break 'outer;
                    }
                }
            }
            if !merged {
                break;
            }
        }
    }

    cohorts
}

/// Partition one cohort's CPUs into maximal muxgroups: subsets carrying
/// *identical* domain membership (spec.md S4.G). Adding a domain either
/// attaches it to an existing group whose mask is a subset of the
/// domain's mask, splits an existing group into an overlapping part (which
/// gains the domain) and a non-overlapping part (unchanged), or opens a new
/// group from CPUs the domain touches that belong to no group yet.
fn partition_muxgroups(cohort_doms: &[&Domain]) -> Vec<(CpuMask, Vec<DomId>)> {
    let mut groups: Vec<(CpuMask, Vec<DomId>)> = Vec::new();

    for d in cohort_doms {
        let mut remaining = d.cpumask;
        let mut next_groups = Vec::with_capacity(groups.len() + 2);

        for (mask, doms) in groups.drain(..) {
            let overlap = mask.intersection(&remaining);
            if overlap.is_empty() {
                next_groups.push((mask, doms));
                continue;
            }

            let non_overlap = mask.difference(&remaining);
            if non_overlap.is_empty() {
                // mask is a subset of the domain's mask: attach in place.
                let mut doms2 = doms;
                doms2.push(d.domid);
                next_groups.push((mask, doms2));
            } else {
                let mut overlap_doms = doms.clone();
                overlap_doms.push(d.domid);
                next_groups.push((overlap, overlap_doms));
                next_groups.push((non_overlap, doms));
            }

            remaining = remaining.difference(&overlap);
        }

        if !remaining.is_empty() {
            next_groups.push((remaining, alloc::vec![d.domid]));
        }

        groups = next_groups;
    }

    groups
}

/// Compute the full topology for an admitted domain set.
pub fn compute_topology(domains: &[Domain]) -> Topology {
    let cohorts = merge_cohorts(domains);

    let mut cpu_to_cohort = BTreeMap::new();
    let mut be_doms_in_cohort = Vec::with_capacity(cohorts.len());
    let mut cohort_masks = Vec::with_capacity(cohorts.len());

    let by_id: BTreeMap<DomId, &Domain> = domains.iter().map(|d| (d.domid, d)).collect();

    let mut muxgroup_masks = Vec::new();
    let mut cpu_to_muxgroup = BTreeMap::new();
    let mut muxgroup_to_cohort = Vec::new();

    for (cohort_id, (mask, doms)) in cohorts.iter().enumerate() {
        let cohort_id = cohort_id as CohortId;
        cohort_masks.push(*mask);
        for cpu in mask.iter() {
            cpu_to_cohort.insert(cpu, cohort_id);
        }

        let be_count = doms
            .iter()
            .filter(|id| by_id.get(id).is_some_and(|d| d.policy.is_best_effort()))
            .count() as u32;
        be_doms_in_cohort.push(be_count);

        let cohort_doms: Vec<&Domain> = doms.iter().filter_map(|id| by_id.get(id).copied()).collect();
        let groups = partition_muxgroups(&cohort_doms);
        for (gmask, _gdoms) in groups {
            let mg_id = muxgroup_masks.len() as MuxgroupId;
            for cpu in gmask.iter() {
                cpu_to_muxgroup.insert(cpu, mg_id);
            }
            muxgroup_masks.push(gmask);
            muxgroup_to_cohort.push(cohort_id);
        }
    }

    Topology {
        cohort_masks,
        cpu_to_cohort,
        be_doms_in_cohort,
        muxgroup_masks,
        cpu_to_muxgroup,
        muxgroup_to_cohort,
    }
}
