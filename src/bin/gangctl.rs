//! `gangctl`: a thin demo front-end over [`gangsched::GangScheduler`],
//! translating the CLI surface spec.md S6 preserves into `putinfo`/`getinfo`
//! calls. Each invocation is its own process with no persisted state
//! (spec.md S6: "configuration is volatile across restarts"), so this is
//! illustrative of the wire semantics, not a real control-plane daemon --
//! the real one would keep a `GangScheduler` alive across requests via
//! whatever IPC the host hypervisor exposes.

use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};

use gangsched::bitset::CpuId;
use gangsched::config::GangConfig;
use gangsched::control::GangScheduler;
use gangsched::domain::{DomId, Domain, MuxPolicy};
use gangsched::hostif::{Clock, IrqGuard, PoolHost};
use gangsched::time::Ns;

#[derive(Parser)]
#[command(name = "gangctl", about = "Gang scheduler control-plane demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set one domain's CPU mask and muxing policy.
    Set {
        #[arg(short = 'p', long = "pool")]
        pool: u32,
        #[arg(short = 'd', long = "domid")]
        domid: DomId,
        /// Comma-separated list of pool CPU ids, e.g. "0,1,2,3".
        #[arg(short = 'c', long = "cpus")]
        cpus: String,
        /// `no` | `tt,period_ms,active_ms[,sf]` | `et,period_ms,active_ms[,sf]` | `be,weight[,sf]`.
        #[arg(short = 't', long = "policy")]
        policy: String,
    },
    /// Dump one domain, or every domain if `-d` is omitted.
    Dump {
        #[arg(short = 'p', long = "pool")]
        pool: u32,
        #[arg(short = 'd', long = "domid")]
        domid: Option<DomId>,
    },
}

fn parse_cpus(s: &str) -> Result<Vec<CpuId>, String> {
    s.split(',')
        .map(|tok| tok.trim().parse::<CpuId>().map_err(|e| format!("bad cpu id {tok:?}: {e}")))
        .collect()
}

fn ms_to_ns(ms: u64) -> Ns {
    ms * 1_000_000
}

/// Parse a `-t` policy spec (spec.md S6's CLI surface); time fields are
/// given in milliseconds on the command line and converted to nanoseconds.
fn parse_policy(spec: &str) -> Result<MuxPolicy, String> {
    let parts: Vec<&str> = spec.split(',').collect();
    match parts.as_slice() {
        ["no"] => Ok(MuxPolicy::Exclusive { from: 0 }),
        ["tt", period, active] | ["tt", period, active, _] => {
            let period = ms_to_ns(period.parse().map_err(|_| "bad period")?);
            let active_time = ms_to_ns(active.parse().map_err(|_| "bad active_time")?);
            let space_filling = parts.get(3).map(|f| *f == "sf").unwrap_or(false);
            Ok(MuxPolicy::TimeTriggered { from: 0, period, active_time, space_filling })
        }
        ["et", period, active] | ["et", period, active, _] => {
            let period = ms_to_ns(period.parse().map_err(|_| "bad period")?);
            let active_time = ms_to_ns(active.parse().map_err(|_| "bad active_time")?);
            let space_filling = parts.get(3).map(|f| *f == "sf").unwrap_or(false);
            Ok(MuxPolicy::EventTriggered { from: 0, period, active_time, space_filling })
        }
        ["be", weight] | ["be", weight, _] => {
            let weight = weight.parse().map_err(|_| "bad weight")?;
            let space_filling = parts.get(2).map(|f| *f == "sf").unwrap_or(false);
            Ok(MuxPolicy::BestEffort { from: 0, weight, space_filling })
        }
        _ => Err(format!("unrecognised policy spec: {spec:?}")),
    }
}

struct WallClock(Instant);
impl Clock for WallClock {
    fn now(&self) -> Ns {
        self.0.elapsed().as_nanos() as Ns
    }
    fn delay(&self, ns: Ns) {
        std::thread::sleep(std::time::Duration::from_nanos(ns));
    }
}

struct NoopIrqGuard;
impl IrqGuard for NoopIrqGuard {}

/// A single-process host: every "CPU" is just a sequential closure call.
/// The real hypervisor's cross-call/affinity/timer primitives are out of
/// scope (spec.md S1); this stands in for them in the demo.
struct LocalHost {
    cpu_count: usize,
}

impl PoolHost for LocalHost {
    fn pool_cpus(&self) -> Vec<CpuId> {
        (0..self.cpu_count as CpuId).collect()
    }

    fn disable_irqs(&self) -> Box<dyn IrqGuard> {
        Box::new(NoopIrqGuard)
    }

    fn cross_call(&self, targets: &[CpuId], f: &(dyn Fn(CpuId) + Sync)) {
        // Concurrent, not sequential: the reconfiguration protocol's spin
        // barriers need every target CPU's closure invocation running at
        // once to ever reach their arrival targets.
        std::thread::scope(|scope| {
            for &cpu in targets {
                scope.spawn(move || f(cpu));
            }
        });
    }

    fn set_affinity(&self, cpu: CpuId, domid: DomId) {
        log::debug!("domain {domid} affine to cpu {cpu}");
    }

    fn migrate_timer(&self, from: CpuId, to: CpuId, domid: DomId) {
        log::debug!("domain {domid} timer migrated {from} -> {to}");
    }

    fn raise_schedule_softirq(&self, targets: &[CpuId]) {
        log::debug!("schedule softirq raised on {} cpu(s)", targets.len());
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let host = LocalHost { cpu_count: 256 };
    let clock = WallClock(Instant::now());
    let scheduler = GangScheduler::new(host, clock, GangConfig::default(), 256);

    match cli.command {
        Command::Set { pool, domid, cpus, policy } => {
            let cpumask = parse_cpus(&cpus)?.into_iter().collect();
            let policy = parse_policy(&policy)?;
            let domain = Domain::new(domid, cpumask, policy);
            scheduler.reconfigure(pool, vec![domain]).map_err(|e| e.to_string())?;
            print_dump(&scheduler, pool, Some(domid))
        }
        Command::Dump { pool, domid } => print_dump(&scheduler, pool, domid),
    }
}

fn print_dump<H: PoolHost + Sync, C: Clock + Sync>(
    scheduler: &GangScheduler<H, C>,
    pool: u32,
    domid: Option<DomId>,
) -> Result<(), String> {
    let domains = scheduler.domains(pool).map_err(|e| e.to_string())?;
    let rows: Vec<&Domain> = match domid {
        Some(id) => domains.get(&id).into_iter().collect(),
        None => domains.values().collect(),
    };
    for d in rows {
        println!("domid={} cpus={:?} policy={:?}", d.domid, d.cpumask.iter().collect::<Vec<_>>(), d.policy);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gangctl: {e}");
            ExitCode::FAILURE
        }
    }
}
