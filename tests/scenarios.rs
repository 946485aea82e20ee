//! End-to-end scenarios mirroring spec.md S8's concrete test seeds 5 and 6:
//! the gang invariant under partial CPU overlap, and reconfiguration
//! liveness across a CPU-set rename.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gangsched::bitset::CpuId;
use gangsched::config::GangConfig;
use gangsched::control::GangScheduler;
use gangsched::decision::VcpuChoice;
use gangsched::domain::{DomId, Domain, MuxPolicy};
use gangsched::hostif::{Clock, IrqGuard, PoolHost};
use gangsched::time::Ns;

#[derive(Clone)]
struct FakeClock(Arc<AtomicU64>);

impl Clock for FakeClock {
    fn now(&self) -> Ns {
        self.0.load(Ordering::SeqCst)
    }
    fn delay(&self, ns: Ns) {
        self.0.fetch_add(ns, Ordering::SeqCst);
    }
}

struct NoopGuard;
impl IrqGuard for NoopGuard {}

struct FakeHost {
    cpus: Vec<CpuId>,
}

impl PoolHost for FakeHost {
    fn pool_cpus(&self) -> Vec<CpuId> {
        self.cpus.clone()
    }
    fn disable_irqs(&self) -> Box<dyn IrqGuard> {
        Box::new(NoopGuard)
    }
    fn cross_call(&self, targets: &[CpuId], f: &(dyn Fn(CpuId) + Sync)) {
        // Must run concurrently: `reconfig.rs`'s spin barriers require every
        // target CPU to arrive independently, which a sequential loop can
        // never satisfy.
        std::thread::scope(|scope| {
            for &cpu in targets {
                scope.spawn(move || f(cpu));
            }
        });
    }
    fn set_affinity(&self, _cpu: CpuId, _domid: DomId) {}
    fn migrate_timer(&self, _from: CpuId, _to: CpuId, _domid: DomId) {}
    fn raise_schedule_softirq(&self, _targets: &[CpuId]) {}
}

fn scheduler(cpu_count: usize) -> (GangScheduler<FakeHost, FakeClock>, Arc<AtomicU64>) {
    let clock_cell = Arc::new(AtomicU64::new(0));
    let sched = GangScheduler::new(
        FakeHost { cpus: (0..cpu_count as CpuId).collect() },
        FakeClock(clock_cell.clone()),
        GangConfig::default(),
        cpu_count,
    );
    (sched, clock_cell)
}

const MS: Ns = 1_000_000;

/// Scenario 5: two TT domains `A({0,1}, 50/100)` and `B({1,2}, 50/100)`.
/// `A` wins the tie-break at `t=0` (lower domid); CPU 2 must not run `A`'s
/// ticket, and `current_ticket[0] == current_ticket[1]` (gang invariant).
#[test]
fn gang_invariant_under_overlap() {
    let (sched, _clock) = scheduler(3);
    let a = Domain::new(
        0,
        [0u16, 1].into_iter().collect(),
        MuxPolicy::TimeTriggered { from: 0, period: 100 * MS, active_time: 50 * MS, space_filling: false },
    );
    let b = Domain::new(
        1,
        [1u16, 2].into_iter().collect(),
        MuxPolicy::TimeTriggered { from: 0, period: 100 * MS, active_time: 50 * MS, space_filling: false },
    );
    sched.reconfigure(0, vec![a, b]).unwrap();

    let d0 = sched.schedule(0, 0, false).unwrap();
    let d1 = sched.schedule(1, 0, false).unwrap();
    let d2 = sched.schedule(2, 0, false).unwrap();

    assert_eq!(d0.vcpu, VcpuChoice::Domain(0));
    assert_eq!(d1.vcpu, VcpuChoice::Domain(0), "cpu 1 must see the same ticket as cpu 0");
    assert_ne!(d2.vcpu, VcpuChoice::Domain(0), "cpu 2 must not run A's ticket while A holds it");
}

/// Scenario 6: install X, then install Y which renames `A`'s CPU set.
/// After Y is installed, every CPU in the pool must observe Y; nothing
/// from X's queues survives the reconfiguration.
#[test]
fn reconfiguration_liveness_no_leaked_tickets() {
    let (sched, _clock) = scheduler(4);

    let a_x = Domain::new(
        0,
        [0u16, 1].into_iter().collect(),
        MuxPolicy::TimeTriggered { from: 0, period: 100 * MS, active_time: 50 * MS, space_filling: false },
    );
    sched.reconfigure(0, vec![a_x]).unwrap();
    let _ = sched.schedule(0, 0, false).unwrap(); // X's ticket now running on {0,1}

    let a_y = Domain::new(
        0,
        [2u16, 3].into_iter().collect(),
        MuxPolicy::TimeTriggered { from: 0, period: 100 * MS, active_time: 50 * MS, space_filling: false },
    );
    sched.reconfigure(0, vec![a_y]).unwrap();

    let domains = sched.domains(0).unwrap();
    assert_eq!(domains[&0].cpumask, [2u16, 3].into_iter().collect());

    // Y's decision must pick domain 0 on its new CPUs...
    let d2 = sched.schedule(2, 10 * MS, false).unwrap();
    assert_eq!(d2.vcpu, VcpuChoice::Domain(0));

    // ...and the old CPUs must no longer carry any ticket for domain 0.
    let d0 = sched.schedule(0, 10 * MS, false).unwrap();
    assert_ne!(d0.vcpu, VcpuChoice::Domain(0));
}

/// Scenario 1 end-to-end: a schedulable single-TT-domain 8-CPU pool
/// installs without error and every CPU schedules that domain.
#[test]
fn single_tt_domain_eight_cpus_installs_and_schedules() {
    let (sched, _clock) = scheduler(8);
    let dom = Domain::new(
        0,
        (0..8u16).collect(),
        MuxPolicy::TimeTriggered { from: 0, period: 100 * MS, active_time: 50 * MS, space_filling: false },
    );
    sched.reconfigure(0, vec![dom]).unwrap();

    for cpu in 0..8u16 {
        let d = sched.schedule(cpu, 0, false).unwrap();
        assert_eq!(d.vcpu, VcpuChoice::Domain(0));
    }
}

/// Scenario 2 end-to-end: an overloaded TT+BE pair is rejected by
/// `reconfigure`, and the prior configuration is left untouched.
#[test]
fn overloaded_reconfigure_rejected_state_unchanged() {
    let (sched, _clock) = scheduler(8);
    let base = Domain::new(0, (0..8u16).collect(), MuxPolicy::Exclusive { from: 0 });
    sched.reconfigure(0, vec![base]).unwrap();

    let tt = Domain::new(
        1,
        (0..8u16).collect(),
        MuxPolicy::TimeTriggered { from: 0, period: 100 * MS, active_time: 95 * MS, space_filling: false },
    );
    let be = Domain::new(2, (0..8u16).collect(), MuxPolicy::BestEffort { from: 0, weight: 128, space_filling: false });
    let err = sched.reconfigure(0, vec![tt, be]).unwrap_err();
    assert!(matches!(err, gangsched::GangError::Capacity { .. }));

    let domains = sched.domains(0).unwrap();
    assert_eq!(domains.len(), 1, "rejected reconfiguration must not mutate prior state");
    assert!(domains.contains_key(&0));
}
