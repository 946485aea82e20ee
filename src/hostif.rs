//! Host collaborator traits (spec.md S1's "out of scope" list).
//!
//! The reconfiguration protocol (component I) needs a timer, an IRQ-disable
//! guard, a cross-CPU call primitive, and a pool-of-CPUs abstraction. The
//! host hypervisor owns all four; this crate only states the interface it
//! consumes, the same split the teacher draws around its own `hal` traits
//! (`kernel/src/arch/mod.rs`) for architecture-specific primitives it does
//! not implement directly.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::bitset::CpuId;
use crate::time::Ns;

/// Monotonic time source. Reconfiguration timeouts and ticket re-arming are
/// both stated purely in terms of this.
pub trait Clock {
    fn now(&self) -> Ns;
    /// Block the calling CPU for approximately `ns`, used only by the
    /// reconfiguration initiator's busy-wait (spec.md S4.I step 6/8);
    /// schedule decisions never call this.
    fn delay(&self, ns: Ns);
}

/// RAII guard produced by [`PoolHost::disable_irqs`]; re-enables on drop.
pub trait IrqGuard {}

/// The set of physical CPUs this scheduler owns, plus the primitives needed
/// to run the two-phase barrier protocol across them.
pub trait PoolHost {
    /// CPUs currently in the pool, in a stable enumeration order.
    fn pool_cpus(&self) -> Vec<CpuId>;

    /// Disable local interrupts on the calling CPU until the returned guard
    /// drops (spec.md S4.I step 7).
    fn disable_irqs(&self) -> Box<dyn IrqGuard>;

    /// Run `f` on every CPU in `targets`, each in its own interrupt
    /// context, and block the caller until all have returned (spec.md S4.I
    /// step 6's broadcast cross-call). `f` receives the local CPU id.
    fn cross_call(&self, targets: &[CpuId], f: &(dyn Fn(CpuId) + Sync));

    /// Pin a domain's VCPUs to their new home CPUs (spec.md S4.I step 7b).
    fn set_affinity(&self, cpu: CpuId, domid: crate::domain::DomId);

    /// Move a domain's periodic timers to their new home CPU (spec.md S4.I
    /// step 7b).
    fn migrate_timer(&self, from: CpuId, to: CpuId, domid: crate::domain::DomId);

    /// Raise the schedule softirq on every CPU in the pool (spec.md S4.I
    /// step 8).
    fn raise_schedule_softirq(&self, targets: &[CpuId]);
}
