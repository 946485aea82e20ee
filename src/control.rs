//! Control interface glue (component J, spec.md S4.J).
//!
//! Translates external `putinfo`/`getinfo` requests into calls on
//! [`reconfig::reconfigure`] and the read-only configuration snapshot,
//! and exposes the per-CPU schedule decision entry point. This is the one
//! type most callers construct directly; everything else in the crate is
//! reached through it.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::AtomicBool;

use crate::bitset::CpuId;
use crate::config::GangConfig;
use crate::decision::{self, Decision, SubstituteSelector, VcpuChoice};
use crate::domain::Domain;
use crate::error::GangError;
use crate::hostif::{Clock, PoolHost};
use crate::reconfig::{self, PoolState};
use crate::time::Ns;
use crate::wire;

/// Pool id reserved for privileged control-plane callers (spec.md S4.J:
/// "both require the caller to be in pool 0").
pub const PRIVILEGED_POOL_ID: u32 = 0;

/// Top-level facade binding one CPU pool's admitted configuration, its
/// derived topology, and its per-cohort schedulers to a host.
pub struct GangScheduler<H, C> {
    host: H,
    clock: C,
    cfg: GangConfig,
    cpu_count: usize,
    busy: AtomicBool,
    state: spin::RwLock<PoolState>,
}

impl<H: PoolHost + Sync, C: Clock + Sync> GangScheduler<H, C> {
    pub fn new(host: H, clock: C, cfg: GangConfig, cpu_count: usize) -> Self {
        Self {
            host,
            clock,
            cfg,
            cpu_count,
            busy: AtomicBool::new(false),
            state: spin::RwLock::new(PoolState::default()),
        }
    }

    /// Install a new configuration (spec.md S4.J `putinfo`). `blob` is the
    /// wire-format configuration (spec.md S6); `caller_pool_id` must be
    /// [`PRIVILEGED_POOL_ID`].
    pub fn putinfo(&self, caller_pool_id: u32, blob: &[u8]) -> Result<(), GangError> {
        if caller_pool_id != PRIVILEGED_POOL_ID {
            return Err(GangError::Permission { operation: "putinfo" });
        }
        let domains = wire::decode_config(blob)?;
        reconfig::reconfigure(
            &self.state,
            &self.busy,
            &self.host,
            &self.clock,
            &self.cfg,
            self.cpu_count,
            domains,
        )
    }

    /// Install a new configuration directly from already-parsed domains,
    /// bypassing the wire format. Used by in-process callers (tests, the
    /// CLI demo) that build [`Domain`] values rather than blobs.
    pub fn reconfigure(&self, caller_pool_id: u32, domains: Vec<Domain>) -> Result<(), GangError> {
        if caller_pool_id != PRIVILEGED_POOL_ID {
            return Err(GangError::Permission { operation: "putinfo" });
        }
        reconfig::reconfigure(
            &self.state,
            &self.busy,
            &self.host,
            &self.clock,
            &self.cfg,
            self.cpu_count,
            domains,
        )
    }

    /// Snapshot the current admitted configuration (spec.md S4.J
    /// `getinfo`), wire-encoded.
    pub fn getinfo(&self, caller_pool_id: u32) -> Result<Vec<u8>, GangError> {
        if caller_pool_id != PRIVILEGED_POOL_ID {
            return Err(GangError::Permission { operation: "getinfo" });
        }
        let r = self.state.read();
        let mut domains: Vec<Domain> = r.domains.values().cloned().collect();
        domains.sort_by_key(|d| d.domid);
        wire::encode_config(&domains)
    }

    /// In-process equivalent of `getinfo` returning domains directly.
    pub fn domains(&self, caller_pool_id: u32) -> Result<BTreeMap<u32, Domain>, GangError> {
        if caller_pool_id != PRIVILEGED_POOL_ID {
            return Err(GangError::Permission { operation: "getinfo" });
        }
        Ok(self.state.read().domains.clone())
    }

    /// Run one schedule decision for `cpu` (component F), using the
    /// default substitute-selection heuristic.
    pub fn schedule(&self, cpu: CpuId, now: Ns, tasklet_pending: bool) -> Result<Decision, GangError> {
        self.schedule_with(cpu, now, tasklet_pending, &decision::DefaultSubstituteSelector)
    }

    /// As [`Self::schedule`], with a caller-supplied substitute selector
    /// (spec.md S9: the heuristic is meant to be replaceable).
    pub fn schedule_with(
        &self,
        cpu: CpuId,
        now: Ns,
        tasklet_pending: bool,
        substitute: &dyn SubstituteSelector,
    ) -> Result<Decision, GangError> {
        let cohort = {
            let r = self.state.read();
            if cpu as usize >= self.cpu_count {
                return Err(GangError::NotFound { resource: "cpu", id: cpu as u64 });
            }
            match r.topology.cpu_to_cohort.get(&cpu) {
                Some(&cohort) => cohort,
                // A pool CPU with no domain touching it belongs to no
                // cohort; spec.md S4.F has it idle rather than erroring.
                None => return Ok(Decision { vcpu: VcpuChoice::Idle, duration: -1, migrated: false }),
            }
        };

        let mut w = self.state.write();
        let PoolState { domains, topology, locals } = &mut *w;
        let cohort_mask = topology.cohort_masks[cohort as usize];
        let be_count = topology.be_doms_in_cohort[cohort as usize];
        let local = locals
            .get_mut(&cohort)
            .ok_or(GangError::Fatal { invariant: "cohort missing its local scheduler" })?;

        decision::schedule_decision(local, domains, &cohort_mask, cpu, now, tasklet_pending, &self.cfg, be_count, substitute)
    }
}
