//! Global reconfiguration protocol (component I, spec.md S4.I): the
//! two-phase barrier that atomically swaps topology, affinity, and local
//! scheduler state across every CPU in the pool.
//!
//! Uses spin-barriers rather than condition variables, same rationale as
//! the teacher's `kernel/src/sync` primitives being spin-based throughout:
//! this runs with interrupts disabled, where sleeping is forbidden.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::admission::schedulability_test;
use crate::bitset::{CpuId, CpuMask};
use crate::config::GangConfig;
use crate::domain::{DomId, Domain};
use crate::error::GangError;
use crate::hostif::{Clock, PoolHost};
use crate::local::LocalScheduler;
use crate::time::{adjust_activation_time, ceil_to_grain, Ns, INFINITY};
use crate::topology::{compute_topology, CohortId, Topology};

/// Shared admitted state, swapped atomically by [`reconfigure`] between its
/// two barriers (spec.md S3's "global configuration").
#[derive(Debug, Default)]
pub struct PoolState {
    pub domains: BTreeMap<DomId, Domain>,
    pub topology: Topology,
    pub locals: BTreeMap<CohortId, LocalScheduler>,
}

/// A shared arrival counter with a fixed target (spec.md S4.I steps 7a/7c):
/// `arrive_and_wait` blocks until `target` arrivals have been recorded, or
/// `deadline` passes, whichever comes first.
struct SpinBarrier {
    counter: Arc<AtomicU32>,
    target: u32,
}

impl SpinBarrier {
    fn arrive_and_wait(&self, clock: &dyn Clock, deadline: Ns) -> bool {
        self.counter.fetch_add(1, Ordering::SeqCst);
        while self.counter.load(Ordering::SeqCst) < self.target {
            if clock.now() >= deadline {
                return false;
            }
            core::hint::spin_loop();
        }
        true
    }
}

/// Reject the incoming entries per spec.md S4.I step 1: no duplicate
/// domids, every cpumask inside the pool, every cpumask nonempty.
fn validate_incoming(incoming: &[Domain], cpu_count: usize) -> Result<(), GangError> {
    let mut seen = alloc::collections::BTreeSet::new();
    for d in incoming {
        if !seen.insert(d.domid) {
            return Err(GangError::Malformed { field: "domid", reason: "duplicate domain id" });
        }
        if d.cpumask.is_empty() {
            return Err(GangError::Malformed { field: "cpumask", reason: "must not be empty" });
        }
        if d.cpumask.iter().any(|c| c as usize >= cpu_count) {
            return Err(GangError::Malformed { field: "cpumask", reason: "not a subset of the pool" });
        }
    }
    Ok(())
}

/// Seed one ticket per domain touching `cohort_mask`, per spec.md S4.I step
/// 7d. Called once per cohort by that cohort's lowest-numbered CPU.
fn rebuild_local_scheduler(
    local: &mut LocalScheduler,
    domains: &BTreeMap<DomId, Domain>,
    cohort_mask: &CpuMask,
    be_doms_in_cohort: u32,
    now: Ns,
    cfg: &GangConfig,
) {
    local.drain(domains);

    let will_resume_at = ceil_to_grain(now.saturating_add(cfg.adj_time_upper_bound()), cfg.grain());

    for d in domains.values() {
        if !d.cpumask.intersects(cohort_mask) {
            continue;
        }

        let tid = local.arena.alloc(d.domid);
        let t = local.arena.get_mut(tid).expect("just allocated");
        t.activated_at = now;

        match d.policy {
            crate::domain::MuxPolicy::Exclusive { .. } => {
                t.earliest_start_time = will_resume_at;
                t.deadline = INFINITY;
                t.remaining_time = INFINITY;
            }
            crate::domain::MuxPolicy::TimeTriggered { from, period, active_time, .. } => {
                let est = adjust_activation_time(will_resume_at, from, period);
                t.earliest_start_time = est;
                t.deadline = est.saturating_add(period);
                t.remaining_time = active_time;
            }
            crate::domain::MuxPolicy::EventTriggered { from, period, active_time, .. } => {
                let est = adjust_activation_time(will_resume_at, from, period);
                t.earliest_start_time = est;
                t.deadline = est.saturating_add(period);
                t.remaining_time = active_time;
            }
            crate::domain::MuxPolicy::BestEffort { from, .. } => {
                let est = adjust_activation_time(will_resume_at, from, cfg.be_basic_period());
                t.earliest_start_time = est;
                t.deadline = est.saturating_add(be_doms_in_cohort as Ns * cfg.be_basic_period());
                t.remaining_time = cfg.be_quantum();
            }
        }

        let est = t.earliest_start_time;
        local.activation.insert(est, d.domid, tid);
    }
}

/// Run the full two-phase reconfiguration protocol (spec.md S4.I).
///
/// `incoming` overlays the current admitted configuration (spec.md S4.I
/// step 2); pass the full desired domain set, not a delta. On success the
/// new configuration is installed in `state`. A barrier timeout is
/// advisory (spec.md S7): it is logged, not surfaced as an error.
pub fn reconfigure<H: PoolHost + Sync, C: Clock + Sync>(
    state: &spin::RwLock<PoolState>,
    busy: &AtomicBool,
    host: &H,
    clock: &C,
    cfg: &GangConfig,
    cpu_count: usize,
    incoming: Vec<Domain>,
) -> Result<(), GangError> {
    if busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        return Err(GangError::Busy);
    }
    let result = reconfigure_inner(state, host, clock, cfg, cpu_count, incoming);
    busy.store(false, Ordering::SeqCst);
    result
}

fn reconfigure_inner<H: PoolHost + Sync, C: Clock + Sync>(
    state: &spin::RwLock<PoolState>,
    host: &H,
    clock: &C,
    cfg: &GangConfig,
    cpu_count: usize,
    incoming: Vec<Domain>,
) -> Result<(), GangError> {
    validate_incoming(&incoming, cpu_count)?;

    let mut new_domains: BTreeMap<DomId, Domain> = incoming.into_iter().map(|d| (d.domid, d)).collect();
    {
        // Overlay: anything admitted but not touched by this request survives.
        let current = state.read();
        for (domid, d) in current.domains.iter() {
            new_domains.entry(*domid).or_insert_with(|| d.clone());
        }
    }

    let mut sorted: Vec<Domain> = new_domains.values().cloned().collect();
    sorted.sort_by_key(|d| d.policy.class());
    schedulability_test(&sorted, cfg, cpu_count)?;

    let new_topology = compute_topology(&sorted);
    let new_locals: BTreeMap<CohortId, LocalScheduler> =
        (0..new_topology.cohort_count() as CohortId).map(|id| (id, LocalScheduler::new())).collect();
    let new_locals_cell: spin::Mutex<Option<BTreeMap<CohortId, LocalScheduler>>> = spin::Mutex::new(Some(new_locals));

    let targets = host.pool_cpus();
    let n = targets.len() as u32;
    if n == 0 {
        // Nothing to barrier against; install directly.
        let mut w = state.write();
        w.domains = new_domains;
        w.topology = new_topology;
        w.locals = new_locals;
        return Ok(());
    }

    let designated = targets[0];
    let half_bound = cfg.adj_time_upper_bound() / 2;

    let counter1 = Arc::new(AtomicU32::new(0));
    let counter2 = Arc::new(AtomicU32::new(0));
    let paused: Arc<Vec<AtomicBool>> = Arc::new((0..targets.len()).map(|_| AtomicBool::new(false)).collect());
    let stuck: Arc<spin::Mutex<CpuMask>> = Arc::new(spin::Mutex::new(CpuMask::empty()));

    let barrier1 = SpinBarrier { counter: counter1.clone(), target: n };
    let barrier2 = SpinBarrier { counter: counter2.clone(), target: 2 * n };

    // Lowest-numbered CPU in each new cohort performs that cohort's rebuild
    // (spec.md S4.D: a `LocalScheduler` is one instance per cohort).
    let mut cohort_rebuilder: BTreeMap<CohortId, CpuId> = BTreeMap::new();
    for cpu in targets.iter().copied() {
        if let Some(&cohort) = new_topology.cpu_to_cohort.get(&cpu) {
            cohort_rebuilder.entry(cohort).or_insert(cpu);
        }
    }

    let new_domains_ref = &new_domains;
    let new_topology_ref = &new_topology;
    let start = clock.now();

    let closure = |cpu: CpuId| {
        let _guard = host.disable_irqs();
        let idx = targets.iter().position(|&c| c == cpu).unwrap_or(0);

        // Barrier 1: no CPU installs new state until every CPU stopped
        // consuming old state (spec.md S5's ordering guarantee).
        if !barrier1.arrive_and_wait(clock, start + half_bound) {
            stuck.lock().set(cpu);
        }

        if cpu == designated {
            let mut w = state.write();
            w.domains = new_domains_ref.clone();
            w.topology = new_topology_ref.clone();
            w.locals = new_locals_cell.lock().take().unwrap_or_default();
            drop(w);
            for d in new_domains_ref.values() {
                for c in d.cpumask.iter() {
                    host.set_affinity(c, d.domid);
                    host.migrate_timer(c, c, d.domid);
                }
            }
        }

        // Barrier 2: no CPU starts rebuilding local state until the
        // designated CPU has published the new topology.
        if !barrier2.arrive_and_wait(clock, start + half_bound) {
            stuck.lock().set(cpu);
        }

        if let Some(&cohort) = new_topology_ref.cpu_to_cohort.get(&cpu) {
            if cohort_rebuilder.get(&cohort) == Some(&cpu) {
                let be_count = new_topology_ref.be_doms_in_cohort.get(cohort as usize).copied().unwrap_or(0);
                let cohort_mask = new_topology_ref.cohort_masks[cohort as usize];
                let mut w = state.write();
                if let Some(local) = w.locals.get_mut(&cohort) {
                    rebuild_local_scheduler(local, new_domains_ref, &cohort_mask, be_count, clock.now(), cfg);
                }
            }
        }

        paused[idx].store(true, Ordering::SeqCst);

        if cpu == designated {
            for p in paused.iter() {
                p.store(false, Ordering::SeqCst);
            }
            host.raise_schedule_softirq(&targets);
        }

        let wait_deadline = start + cfg.adj_time_upper_bound();
        while paused[idx].load(Ordering::SeqCst) {
            if clock.now() >= wait_deadline {
                stuck.lock().set(cpu);
                break;
            }
            core::hint::spin_loop();
        }

    };

    host.cross_call(&targets, &closure);

    let stuck_mask = *stuck.lock();
    if !stuck_mask.is_empty() {
        log::warn!(
            "reconfiguration barrier timed out on {} cpu(s); proceeding, stuck cpus will converge",
            stuck_mask.popcount()
        );
    }

    Ok(())
}
