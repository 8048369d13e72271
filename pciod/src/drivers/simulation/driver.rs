//! Simulated module group implementing [`GroupBus`].
//!
//! Each bus call first advances every module by the wall-clock time elapsed
//! since the previous call, unless the group was built with
//! [`SimulatedGroup::manual`], in which case only [`SimulatedGroup::step`]
//! moves time forward.
//!
//! Faults are injected per operation with [`SimulatedGroup::fail_next`]; the
//! next call of that kind returns the given status without touching state.

use std::time::{Duration, Instant};

use pciod_common::bus::{Acknowledgment, BusResult, BusStatus, GroupBus, MotionCommand};
use pciod_common::codes::{Param, StateFlags};
use pciod_common::group::ModuleGroup;
use pciod_common::msg::Targets;
use tracing::{debug, info};

use super::module::SimModule;

/// Bus operation kinds, for fault injection and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// `get_f64`
    GetF64,
    /// `set_f64`
    SetF64,
    /// `get_u32`
    GetU32,
    /// `set_u32`
    SetU32,
    /// `command` of any kind
    Command,
    /// `halt`
    Halt,
    /// `reset`
    Reset,
    /// `home`
    Home,
    /// `set_full_current`
    FullCurrent,
}

impl SimOp {
    const COUNT: usize = 9;

    const fn index(self) -> usize {
        self as usize
    }
}

/// Per-operation call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    calls: [u64; SimOp::COUNT],
    failures: [u64; SimOp::COUNT],
}

impl SimStats {
    /// Calls made of kind `op`.
    pub fn calls(&self, op: SimOp) -> u64 {
        self.calls[op.index()]
    }

    /// Injected failures returned for `op`.
    pub fn failures(&self, op: SimOp) -> u64 {
        self.failures[op.index()]
    }
}

/// Software stand-in for a module group on one or more buses.
pub struct SimulatedGroup {
    group: ModuleGroup,
    modules: Vec<SimModule>,
    full_current: bool,
    pending_faults: Vec<(SimOp, BusStatus)>,
    last_advance: Option<Instant>,
    stats: SimStats,
}

impl SimulatedGroup {
    /// Group whose modules move in real time.
    pub fn new(group: ModuleGroup) -> Self {
        let mut sim = Self::manual(group);
        sim.last_advance = Some(Instant::now());
        sim
    }

    /// Group whose modules only move on [`step`](Self::step).
    pub fn manual(group: ModuleGroup) -> Self {
        let modules = group
            .addresses()
            .map(|a| SimModule::new(a.net << 16 | a.id))
            .collect();
        info!(
            modules = group.len(),
            buses = group.buses().len(),
            "simulated module group opened"
        );
        Self {
            group,
            modules,
            full_current: false,
            pending_faults: Vec::new(),
            last_advance: None,
            stats: SimStats::default(),
        }
    }

    /// Make the next call of kind `op` return `status`.
    pub fn fail_next(&mut self, op: SimOp, status: BusStatus) {
        self.pending_faults.push((op, status));
    }

    /// Latch state bits on one module (e.g. `StateFlags::ERROR`).
    pub fn inject_module_state(&mut self, index: usize, flags: StateFlags) {
        if let Some(module) = self.modules.get_mut(index) {
            module.state.insert(flags);
        }
    }

    /// Advance every module by `dt`.
    pub fn step(&mut self, dt: Duration) {
        let dt = dt.as_secs_f64();
        for module in &mut self.modules {
            module.advance(dt);
        }
    }

    /// Whether full-current mode is selected.
    pub fn full_current(&self) -> bool {
        self.full_current
    }

    /// Call counters.
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Module positions in group order.
    pub fn positions(&self) -> Vec<f64> {
        self.modules.iter().map(|m| m.position).collect()
    }

    /// Module velocities in group order.
    pub fn velocities(&self) -> Vec<f64> {
        self.modules.iter().map(|m| m.velocity).collect()
    }

    /// Count the call, advance real time, and consume an injected fault.
    fn enter(&mut self, op: SimOp, name: &'static str) -> BusResult<()> {
        self.stats.calls[op.index()] += 1;
        if let Some(last) = self.last_advance {
            let now = Instant::now();
            self.step(now - last);
            self.last_advance = Some(now);
        }
        if let Some(pos) = self.pending_faults.iter().position(|(o, _)| *o == op) {
            let (_, status) = self.pending_faults.remove(pos);
            self.stats.failures[op.index()] += 1;
            debug!(op = name, %status, "injected bus fault");
            return status.check(name);
        }
        Ok(())
    }

    fn check_len(&self, len: usize, name: &'static str) -> BusResult<()> {
        if len == self.modules.len() {
            Ok(())
        } else {
            BusStatus::InvalidParameter.check(name)
        }
    }

    fn check_movable(&self, name: &'static str) -> BusResult<()> {
        if self.modules.iter().any(SimModule::blocked) {
            BusStatus::ModuleError.check(name)
        } else {
            Ok(())
        }
    }
}

impl GroupBus for SimulatedGroup {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn group(&self) -> &ModuleGroup {
        &self.group
    }

    fn get_f64(&mut self, param: Param, out: &mut [f64]) -> BusResult<()> {
        const OP: &str = "get double";
        self.enter(SimOp::GetF64, OP)?;
        self.check_len(out.len(), OP)?;
        for (slot, module) in out.iter_mut().zip(&self.modules) {
            match module.get_f64(param) {
                Some(value) => *slot = value,
                None => return BusStatus::InvalidParameter.check(OP),
            }
        }
        Ok(())
    }

    fn set_f64(&mut self, param: Param, values: &[f64]) -> BusResult<()> {
        const OP: &str = "set double";
        self.enter(SimOp::SetF64, OP)?;
        self.check_len(values.len(), OP)?;
        for (module, &value) in self.modules.iter_mut().zip(values) {
            if !module.set_f64(param, value) {
                return BusStatus::InvalidParameter.check(OP);
            }
        }
        Ok(())
    }

    fn get_u32(&mut self, param: Param, out: &mut [u32]) -> BusResult<()> {
        const OP: &str = "get word";
        self.enter(SimOp::GetU32, OP)?;
        self.check_len(out.len(), OP)?;
        for (slot, module) in out.iter_mut().zip(&self.modules) {
            match module.get_u32(param) {
                Some(value) => *slot = value,
                None => return BusStatus::InvalidParameter.check(OP),
            }
        }
        Ok(())
    }

    fn set_u32(&mut self, param: Param, values: &[u32]) -> BusResult<()> {
        const OP: &str = "set word";
        self.enter(SimOp::SetU32, OP)?;
        self.check_len(values.len(), OP)?;
        for (module, &value) in self.modules.iter_mut().zip(values) {
            if !module.set_u32(param, value) {
                return BusStatus::InvalidParameter.check(OP);
            }
        }
        Ok(())
    }

    fn command(&mut self, cmd: MotionCommand<'_>) -> BusResult<Acknowledgment> {
        let op = match cmd {
            MotionCommand::Current(_) => "current command",
            MotionCommand::Velocity(_) => "velocity command",
            MotionCommand::Position { .. } => "position command",
        };
        self.enter(SimOp::Command, op)?;
        self.check_len(cmd.values().len(), op)?;
        self.check_movable(op)?;

        let ack: Targets = match cmd {
            MotionCommand::Current(values) => self
                .modules
                .iter_mut()
                .zip(values)
                .map(|(m, &i)| m.command_current(i))
                .collect(),
            MotionCommand::Velocity(values) => self
                .modules
                .iter_mut()
                .zip(values)
                .map(|(m, &v)| m.command_velocity(v))
                .collect(),
            MotionCommand::Position { targets, profile } => {
                for (m, &p) in self.modules.iter_mut().zip(targets) {
                    m.command_position(p, profile);
                }
                self.modules.iter().map(|m| m.position).collect()
            }
        };

        Ok(match cmd {
            MotionCommand::Current(_) => Acknowledgment::Current(ack),
            MotionCommand::Velocity(_) => Acknowledgment::Velocity(ack),
            MotionCommand::Position { .. } => Acknowledgment::Position(ack),
        })
    }

    fn halt(&mut self) -> BusResult<()> {
        self.enter(SimOp::Halt, "halt")?;
        self.modules.iter_mut().for_each(SimModule::halt);
        Ok(())
    }

    fn reset(&mut self) -> BusResult<()> {
        self.enter(SimOp::Reset, "reset")?;
        self.modules.iter_mut().for_each(SimModule::reset);
        Ok(())
    }

    fn home(&mut self) -> BusResult<()> {
        self.enter(SimOp::Home, "home")?;
        self.check_movable("home")?;
        self.modules.iter_mut().for_each(SimModule::home);
        Ok(())
    }

    fn set_full_current(&mut self, enable: bool) -> BusResult<()> {
        self.enter(SimOp::FullCurrent, "set full current")?;
        self.full_current = enable;
        Ok(())
    }
}
