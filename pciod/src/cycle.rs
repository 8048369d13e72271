//! Control loop: wait → validate → limit → execute → publish.
//!
//! One [`ControlContext`] per process owns the bus group, the executor, the
//! outgoing snapshot and the last accepted command. Each call to
//! [`ControlContext::cycle`] blocks for at most one control period on the
//! command source, then takes exactly one of these paths:
//!
//! - **command**: validate, execute, refresh state from the ack, publish.
//!   An invalid command is logged and dropped; a bus failure is logged and
//!   the previous snapshot stands.
//! - **timeout**: poll state, publish, then run the watchdog.
//! - **transport error**: log, then sleep out the period to keep cadence.
//!
//! Nothing raised inside a cycle ends the loop; only the shutdown flag does.
//!
//! ## RT Setup (`rt` feature)
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` to the configured core.
//! 4. `sched_setscheduler(SCHED_FIFO, priority)`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pciod_common::bus::{Acknowledgment, GroupBus};
use pciod_common::codes::Param;
use pciod_common::config::ConfigError;
use pciod_common::consts::MAX_MODULES;
use pciod_common::msg::{InvalidCommand, MotorMode, MotorRefFrame, ReferenceCommand, StateSnapshot};
use pciod_common::time::monotonic_ns;
use pciod_shm::Received;
use tracing::{debug, info, trace, warn};

use crate::channel::{CommandSource, StateSink};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::executor::GroupExecutor;
use crate::limiter::MotionLimiter;
use crate::publisher::StatePublisher;
use crate::watchdog::{Verdict, Watchdog};

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle counters and timing.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Commands executed successfully.
    pub commands: u64,
    /// Commands rejected by validation.
    pub rejected: u64,
    /// Bus commands that returned a failure status.
    pub bus_failures: u64,
    /// Cycles that timed out waiting for a command.
    pub timeouts: u64,
    /// Zero-velocity holds forced by the watchdog.
    pub forced_halts: u64,
    /// State refreshes where a position or velocity poll failed.
    pub poll_failures: u64,
    /// Command frames overwritten before the loop saw them.
    pub missed_frames: u64,
    /// Receive errors from the command source.
    pub transport_errors: u64,
    /// Cycles whose work (excluding the wait) exceeded one period.
    pub overruns: u64,
    /// Longest work time [ns].
    pub max_busy_ns: u64,
    /// Sum of work times for the average [ns].
    pub sum_busy_ns: u64,
}

impl CycleStats {
    /// Zeroed counters.
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            commands: 0,
            rejected: 0,
            bus_failures: 0,
            timeouts: 0,
            forced_halts: 0,
            poll_failures: 0,
            missed_frames: 0,
            transport_errors: 0,
            overruns: 0,
            max_busy_ns: 0,
            sum_busy_ns: 0,
        }
    }

    /// Record one cycle's work time.
    #[inline]
    pub fn record(&mut self, busy_ns: u64, period_ns: u64) {
        self.cycle_count += 1;
        self.sum_busy_ns = self.sum_busy_ns.saturating_add(busy_ns);
        if busy_ns > self.max_busy_ns {
            self.max_busy_ns = busy_ns;
        }
        if busy_ns > period_ns {
            self.overruns += 1;
        }
    }

    /// Average work time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_busy_ns(&self) -> u64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_busy_ns / self.cycle_count
        }
    }
}

// ─── Cycle Outcome ──────────────────────────────────────────────────

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A command was executed and state published.
    Executed(MotorMode),
    /// A command was rejected; nothing was sent or published.
    Rejected(InvalidCommand),
    /// The bus refused the command; the previous snapshot stands.
    BusFailed(MotorMode),
    /// No command arrived; state was polled and published.
    TimedOut {
        /// The watchdog forced a zero-velocity hold.
        forced_halt: bool,
    },
    /// The command source reported an error.
    TransportError,
}

// ─── Control Context ────────────────────────────────────────────────

/// Everything the control loop owns.
pub struct ControlContext<B: GroupBus> {
    bus: B,
    executor: GroupExecutor,
    publisher: StatePublisher,
    watchdog: Watchdog,
    last_command: Option<ReferenceCommand>,
    period: Duration,
    stats: CycleStats,
    stats_interval: u64,
}

impl<B: GroupBus> ControlContext<B> {
    /// Build a context from an opened group and explicit rated velocities.
    pub fn new(bus: B, config: &DaemonConfig, rated_velocity: &[f64]) -> Self {
        let n = bus.size();
        let period = config.period();
        Self {
            executor: GroupExecutor::new(
                MotionLimiter::new(rated_velocity, period),
                config.position_profile,
            ),
            publisher: StatePublisher::new(n),
            watchdog: Watchdog::new(config.command_expiry()),
            last_command: None,
            period,
            stats: CycleStats::new(),
            stats_interval: config.stats_interval.max(1),
            bus,
        }
    }

    /// Start-up sequence on an opened group: rated velocities, operating mode,
    /// then the initial state.
    ///
    /// Rated velocities come from the configuration, or from each module's
    /// max-velocity parameter. The initial positions become the reference
    /// for the first position step. Any failure is fatal.
    pub fn init(mut bus: B, config: &DaemonConfig) -> DaemonResult<Self> {
        let n = bus.size();
        let rated = match config.rated_velocity {
            Some(ref rated) if rated.len() == n => rated.clone(),
            Some(ref rated) => {
                return Err(DaemonError::Config(ConfigError::ValidationError(format!(
                    "rated_velocity has {} entries, group has {n} modules",
                    rated.len()
                ))));
            }
            None => {
                let mut buf = [0.0f64; MAX_MODULES];
                bus.get_f64(Param::MaxVel, &mut buf[..n])?;
                buf[..n].to_vec()
            }
        };
        debug!(rated_velocity = ?rated, "rated velocities");

        bus.set_full_current(config.full_current)?;
        info!(full_current = config.full_current, "operating mode set");

        let mut ctx = Self::new(bus, config, &rated);
        ctx.publisher.prime(&mut ctx.bus)?;
        debug!(positions = ?ctx.publisher.snapshot().positions(), "initial state read");
        Ok(ctx)
    }

    /// The bus group.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the bus group.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Give the bus group back, ending the context.
    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> &StateSnapshot {
        self.publisher.snapshot()
    }

    /// Last accepted command.
    pub fn last_command(&self) -> Option<&ReferenceCommand> {
        self.last_command.as_ref()
    }

    /// Loop counters.
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Control period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one cycle.
    pub fn cycle<S, K>(&mut self, source: &mut S, sink: &mut K) -> CycleOutcome
    where
        S: CommandSource + ?Sized,
        K: StateSink + ?Sized,
    {
        let deadline = Instant::now() + self.period;
        let received = source.recv_until(deadline);
        let work_start = Instant::now();

        let outcome = match received {
            Ok(Received::Fresh(frame)) => self.on_frame(&frame, sink),
            Ok(Received::Missed { frame, skipped }) => {
                self.stats.missed_frames += skipped;
                debug!(skipped, seq = frame.header.seq, "command frames overwritten, using latest");
                self.on_frame(&frame, sink)
            }
            Ok(Received::Timeout) => self.on_timeout(sink),
            Err(e) => {
                self.stats.transport_errors += 1;
                warn!("command receive failed: {e}");
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
                CycleOutcome::TransportError
            }
        };

        let busy_ns = u64::try_from(work_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let period_ns = u64::try_from(self.period.as_nanos()).unwrap_or(u64::MAX);
        self.stats.record(busy_ns, period_ns);
        outcome
    }

    fn on_frame<K: StateSink + ?Sized>(
        &mut self,
        frame: &MotorRefFrame,
        sink: &mut K,
    ) -> CycleOutcome {
        let n = self.bus.size();
        let command = match ReferenceCommand::validate(frame, n) {
            Ok(command) => command,
            Err(e) => {
                self.stats.rejected += 1;
                match e {
                    InvalidCommand::WrongCount {
                        mode,
                        expected,
                        actual,
                    } => warn!(%mode, expected, actual, seq = frame.header.seq, "rejected command: {e}"),
                    _ => warn!(tag = frame.mode, seq = frame.header.seq, "rejected command: {e}"),
                }
                return CycleOutcome::Rejected(e);
            }
        };

        let mode = command.mode();
        trace!(%mode, seq = command.header.seq, "executing command");
        let last_positions = self.publisher.snapshot().positions();
        let result = self
            .executor
            .execute(&mut self.bus, &command.command, &last_positions);
        self.last_command = Some(command);

        match result {
            Ok(ack) => {
                self.stats.commands += 1;
                self.publish(&ack, sink);
                CycleOutcome::Executed(mode)
            }
            Err(_) => {
                self.stats.bus_failures += 1;
                self.log_module_errors();
                CycleOutcome::BusFailed(mode)
            }
        }
    }

    fn on_timeout<K: StateSink + ?Sized>(&mut self, sink: &mut K) -> CycleOutcome {
        self.stats.timeouts += 1;
        self.publish(&Acknowledgment::None, sink);

        let verdict = self.watchdog.evaluate(
            self.last_command.as_ref(),
            self.publisher.snapshot(),
            monotonic_ns(),
        );
        let forced_halt = verdict == Verdict::ForceZeroVelocity;
        if forced_halt {
            self.stats.forced_halts += 1;
            let seq = self.last_command.as_ref().map(|c| c.header.seq);
            info!(?seq, "velocity command expired while moving, commanding zero velocity");
            if let Err(e) = self.executor.zero_velocity(&mut self.bus) {
                self.stats.bus_failures += 1;
                warn!(status = e.status.code(), "zero-velocity hold failed: {e}");
                self.log_module_errors();
            }
        }
        CycleOutcome::TimedOut { forced_halt }
    }

    fn publish<K: StateSink + ?Sized>(&mut self, ack: &Acknowledgment, sink: &mut K) {
        if self.publisher.refresh(&mut self.bus, ack).any_failed() {
            self.stats.poll_failures += 1;
        }
        self.publisher.publish(sink);
    }

    fn log_module_errors(&mut self) {
        match self.bus.dump_error() {
            Ok(reports) => {
                for r in reports.iter().filter(|r| r.state.has_fault()) {
                    warn!(
                        index = r.address.index,
                        net = r.address.net,
                        id = r.address.id,
                        "module fault: {:?}",
                        r.state
                    );
                }
            }
            Err(e) => warn!("module state dump failed: {e}"),
        }
    }

    fn log_stats(&self) {
        let s = &self.stats;
        debug!(
            cycles = s.cycle_count,
            commands = s.commands,
            rejected = s.rejected,
            bus_failures = s.bus_failures,
            timeouts = s.timeouts,
            forced_halts = s.forced_halts,
            poll_failures = s.poll_failures,
            missed_frames = s.missed_frames,
            overruns = s.overruns,
            avg_busy_us = s.avg_busy_ns() / 1_000,
            max_busy_us = s.max_busy_ns / 1_000,
            "cycle stats"
        );
    }

    /// Cycle until `shutdown` is set.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K, shutdown: &AtomicBool)
    where
        S: CommandSource + ?Sized,
        K: StateSink + ?Sized,
    {
        info!(
            period_ms = self.period.as_secs_f64() * 1e3,
            modules = self.bus.size(),
            "control loop running"
        );
        while !shutdown.load(Ordering::Relaxed) {
            self.cycle(source, sink);
            if self.stats.cycle_count % self.stats_interval == 0 {
                self.log_stats();
            }
        }
        self.log_stats();
        info!(cycles = self.stats.cycle_count, "control loop stopped");
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> DaemonResult<()> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| DaemonError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> DaemonResult<()> {
    Ok(())
}

/// Touch 256 KiB of stack so the loop never faults in fresh pages.
#[cfg(feature = "rt")]
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: writing to a local buffer.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(not(feature = "rt"))]
fn prefault_stack() {}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> DaemonResult<()> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| DaemonError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| DaemonError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> DaemonResult<()> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> DaemonResult<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: plain syscall on the calling thread with a valid param pointer.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(DaemonError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> DaemonResult<()> {
    Ok(())
}

/// Real-time setup for the loop thread. No-op without the `rt` feature.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> DaemonResult<()> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
