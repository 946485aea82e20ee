//! Schedulability / admission test (component H, spec.md S4.H).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::bitset::CpuId;
use crate::config::GangConfig;
use crate::domain::{DomId, Domain, MuxPolicy};
use crate::error::GangError;
use crate::time::Ns;

/// Per-CPU utilisation of one domain's policy, before the BE
/// at-most-once-per-CPU discount is applied.
fn domain_utilization(policy: &MuxPolicy, cfg: &GangConfig) -> f64 {
    match *policy {
        MuxPolicy::Exclusive { .. } => 1.0,
        MuxPolicy::TimeTriggered { period, active_time, .. }
        | MuxPolicy::EventTriggered { period, active_time, .. } => active_time as f64 / period as f64,
        MuxPolicy::BestEffort { .. } => cfg.be_reserve_percent() as f64 / 100.0,
    }
}

/// Validate the static preconditions spec.md S4.H step 1 lists, ahead of
/// the utilisation computation itself.
fn check_preconditions(domains: &[Domain], cfg: &GangConfig, cpu_count: usize) -> Result<(), GangError> {
    if cpu_count == 0 {
        return Err(GangError::Malformed { field: "cpu_count", reason: "must be nonzero" });
    }
    if cfg.be_reserve_percent() > 100 {
        return Err(GangError::Malformed {
            field: "be_reserve",
            reason: "must not exceed 100 percent",
        });
    }
    if cfg.be_basic_period() == 0 {
        return Err(GangError::Malformed { field: "be_basic_period", reason: "must be nonzero" });
    }
    if cfg.be_reserve_percent() > 50 {
        log::warn!("be_reserve {}% exceeds the recommended 50% ceiling", cfg.be_reserve_percent());
    }
    for d in domains {
        if d.cpumask.iter().any(|c| c as usize >= cpu_count) {
            return Err(GangError::Malformed {
                field: "cpumask",
                reason: "references a CPU id outside the pool",
            });
        }
        crate::domain::validate_policy(&d.policy, cfg.grain())?;
    }
    Ok(())
}

/// The simple utilisation-sum schedulability test (spec.md S4.H steps 1-5,
/// always on). Returns `Ok(())` if every CPU's total utilisation is
/// `<= 1.0`, otherwise `Err(GangError::Capacity)` listing each offending
/// CPU and the domains that overloaded it.
pub fn schedulability_test(domains: &[Domain], cfg: &GangConfig, cpu_count: usize) -> Result<(), GangError> {
    check_preconditions(domains, cfg, cpu_count)?;

    if cfg.be_reserve_percent() == 100 {
        // No capacity remains for anything else; fail immediately.
        let offending: Vec<(u16, Vec<DomId>)> = (0..cpu_count as u16)
            .map(|c| (c, domains.iter().filter(|d| d.cpumask.test(c)).map(|d| d.domid).collect()))
            .filter(|(_, ds): &(u16, Vec<DomId>)| !ds.is_empty())
            .collect();
        return Err(GangError::Capacity { offending });
    }

    let mut util: BTreeMap<CpuId, f64> = BTreeMap::new();
    let mut doms_per_cpu: BTreeMap<CpuId, Vec<DomId>> = BTreeMap::new();
    let mut be_charged: BTreeMap<CpuId, bool> = BTreeMap::new();

    for d in domains {
        let u = domain_utilization(&d.policy, cfg);
        for cpu in d.cpumask.iter() {
            doms_per_cpu.entry(cpu).or_default().push(d.domid);

            if d.policy.is_best_effort() {
                let charged = be_charged.entry(cpu).or_insert(false);
                if *charged {
                    continue; // charged at most once per CPU regardless of domain count
                }
                *charged = true;
            }
            *util.entry(cpu).or_insert(0.0) += u;
        }
    }

    let offending: Vec<(u16, Vec<DomId>)> = util
        .iter()
        .filter(|(_, &u)| u > 1.0)
        .map(|(&cpu, _)| (cpu, doms_per_cpu.remove(&cpu).unwrap_or_default()))
        .collect();

    if offending.is_empty() {
        Ok(())
    } else {
        Err(GangError::Capacity { offending })
    }
}

/// Demand-Bound-Function value: `a + max(0, I - p) * a / p` when `p < I`,
/// else `0` (spec.md S4.H, documented extension).
#[cfg(feature = "dbf")]
pub fn dbf(active_time: Ns, period: Ns, interval: Ns) -> f64 {
    if period < interval {
        let a = active_time as f64;
        let p = period as f64;
        let i = interval as f64;
        a + (i - p).max(0.0) * a / p
    } else {
        0.0
    }
}

/// Stricter per-CPU DBF schedulability test, gated behind the `dbf`
/// feature (spec.md S4.H: "abandoned in favour of the simpler utilisation
/// test"; kept available for tightly-packed configurations).
#[cfg(feature = "dbf")]
pub fn dbf_schedulability_test(domains: &[Domain], cfg: &GangConfig, cpu_count: usize) -> Result<(), GangError> {
    check_preconditions(domains, cfg, cpu_count)?;

    let mut offending: Vec<(u16, Vec<DomId>)> = Vec::new();

    for cpu in 0..cpu_count as u16 {
        let on_cpu: Vec<&Domain> = domains.iter().filter(|d| d.cpumask.test(cpu)).collect();
        let be_count = on_cpu.iter().filter(|d| d.policy.is_best_effort()).count();

        for d in &on_cpu {
            let (active_time, period) = match d.policy {
                MuxPolicy::Exclusive { .. } => continue,
                MuxPolicy::TimeTriggered { active_time, period, .. }
                | MuxPolicy::EventTriggered { active_time, period, .. } => (active_time, period),
                MuxPolicy::BestEffort { .. } => continue,
            };

            let mut demand = 0.0f64;
            for other in &on_cpu {
                if other.domid == d.domid {
                    continue;
                }
                demand += match other.policy {
                    MuxPolicy::Exclusive { .. } => f64::INFINITY,
                    MuxPolicy::TimeTriggered { active_time: a, period: p, .. }
                    | MuxPolicy::EventTriggered { active_time: a, period: p, .. } => dbf(a, p, period),
                    MuxPolicy::BestEffort { .. } => 0.0, // folded in below, once per CPU
                };
            }
            if be_count > 0 {
                demand += dbf(cfg.be_quantum(), cfg.be_basic_period(), period);
            }

            if (period as f64) < active_time as f64 + demand {
                offending.push((cpu, on_cpu.iter().map(|x| x.domid).collect()));
                break;
            }
        }
    }

    if offending.is_empty() {
        Ok(())
    } else {
        Err(GangError::Capacity { offending })
    }
}
