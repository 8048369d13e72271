//! Shared fixtures: a recording bus and an in-memory channel pair.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Instant;

use pciod::channel::{CommandSource, StateSink};
use pciod::config::DaemonConfig;
use pciod_common::bus::{Acknowledgment, BusResult, BusStatus, GroupBus, MotionCommand};
use pciod_common::codes::Param;
use pciod_common::group::ModuleGroup;
use pciod_common::msg::{MotorMode, MotorRefFrame, MotorStateFrame, StateSnapshot, targets_from};
use pciod_common::time::monotonic_ns;
use pciod_shm::{Received, ShmError, ShmResult};

/// One observed bus call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetF64(Param),
    SetF64(Param, Vec<f64>),
    GetU32(Param),
    SetU32(Param, Vec<u32>),
    Current(Vec<f64>),
    Velocity(Vec<f64>),
    Position(Vec<f64>),
    Halt,
    Reset,
    Home,
    FullCurrent(bool),
}

/// Which call an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    Get(Param),
    Command,
    Halt,
}

/// Bus double that records every call and mirrors commanded motion.
pub struct RecordingBus {
    group: ModuleGroup,
    pub calls: Vec<Call>,
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub rated: Vec<f64>,
    pub state_words: Vec<u32>,
    pub config_words: Vec<u32>,
    failures: Vec<(Fail, BusStatus)>,
}

impl RecordingBus {
    /// Bus with `n` modules on net 0, ids 1..=n.
    pub fn new(n: usize) -> Self {
        let ids: Vec<String> = (1..=n).map(|i| i.to_string()).collect();
        let spec = format!("0:{}", ids.join(","));
        Self {
            group: ModuleGroup::new(&[spec.parse().unwrap()]).unwrap(),
            calls: Vec::new(),
            positions: vec![0.0; n],
            velocities: vec![0.0; n],
            rated: vec![1.0; n],
            state_words: vec![0; n],
            config_words: vec![0; n],
            failures: Vec::new(),
        }
    }

    /// Next call matching `what` returns `status`.
    pub fn fail_next(&mut self, what: Fail, status: BusStatus) {
        self.failures.push((what, status));
    }

    fn take_failure(&mut self, what: Fail, op: &'static str) -> BusResult<()> {
        match self.failures.iter().position(|(f, _)| *f == what) {
            Some(i) => {
                let (_, status) = self.failures.remove(i);
                status.check(op)
            }
            None => Ok(()),
        }
    }

    /// Velocity commands issued, in order.
    pub fn velocity_commands(&self) -> Vec<Vec<f64>> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Velocity(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    /// Motion commands, halts and resets issued.
    pub fn actuations(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::Current(_) | Call::Velocity(_) | Call::Position(_) | Call::Halt | Call::Reset
                )
            })
            .count()
    }
}

impl GroupBus for RecordingBus {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn group(&self) -> &ModuleGroup {
        &self.group
    }

    fn get_f64(&mut self, param: Param, out: &mut [f64]) -> BusResult<()> {
        self.calls.push(Call::GetF64(param));
        self.take_failure(Fail::Get(param), "get double")?;
        let source = match param {
            Param::ActPos => &self.positions,
            Param::ActVel => &self.velocities,
            Param::MaxVel => &self.rated,
            _ => return BusStatus::InvalidParameter.check("get double"),
        };
        out.copy_from_slice(source);
        Ok(())
    }

    fn set_f64(&mut self, param: Param, values: &[f64]) -> BusResult<()> {
        self.calls.push(Call::SetF64(param, values.to_vec()));
        if param == Param::MaxVel {
            self.rated = values.to_vec();
        }
        Ok(())
    }

    fn get_u32(&mut self, param: Param, out: &mut [u32]) -> BusResult<()> {
        self.calls.push(Call::GetU32(param));
        self.take_failure(Fail::Get(param), "get word")?;
        match param {
            Param::State => out.copy_from_slice(&self.state_words),
            Param::Config => out.copy_from_slice(&self.config_words),
            _ => return BusStatus::InvalidParameter.check("get word"),
        }
        Ok(())
    }

    fn set_u32(&mut self, param: Param, values: &[u32]) -> BusResult<()> {
        self.calls.push(Call::SetU32(param, values.to_vec()));
        if param == Param::Config {
            self.config_words = values.to_vec();
        }
        Ok(())
    }

    fn command(&mut self, cmd: MotionCommand<'_>) -> BusResult<Acknowledgment> {
        let values = cmd.values().to_vec();
        self.calls.push(match cmd {
            MotionCommand::Current(_) => Call::Current(values.clone()),
            MotionCommand::Velocity(_) => Call::Velocity(values.clone()),
            MotionCommand::Position { .. } => Call::Position(values.clone()),
        });
        self.take_failure(Fail::Command, "motion command")?;
        Ok(match cmd {
            MotionCommand::Current(_) => Acknowledgment::Current(targets_from(&values)),
            MotionCommand::Velocity(_) => {
                self.velocities = values.clone();
                Acknowledgment::Velocity(targets_from(&values))
            }
            MotionCommand::Position { .. } => {
                self.positions = values.clone();
                Acknowledgment::Position(targets_from(&values))
            }
        })
    }

    fn halt(&mut self) -> BusResult<()> {
        self.calls.push(Call::Halt);
        self.take_failure(Fail::Halt, "halt")?;
        self.velocities.iter_mut().for_each(|v| *v = 0.0);
        Ok(())
    }

    fn reset(&mut self) -> BusResult<()> {
        self.calls.push(Call::Reset);
        Ok(())
    }

    fn home(&mut self) -> BusResult<()> {
        self.calls.push(Call::Home);
        Ok(())
    }

    fn set_full_current(&mut self, enable: bool) -> BusResult<()> {
        self.calls.push(Call::FullCurrent(enable));
        Ok(())
    }
}

/// Scripted command source. An exhausted script times out immediately.
#[derive(Default)]
pub struct ScriptedSource {
    script: VecDeque<ShmResult<Received<MotorRefFrame>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, frame: MotorRefFrame) -> &mut Self {
        self.script.push_back(Ok(Received::Fresh(frame)));
        self
    }

    pub fn missed(&mut self, frame: MotorRefFrame, skipped: u64) -> &mut Self {
        self.script.push_back(Ok(Received::Missed { frame, skipped }));
        self
    }

    pub fn timeout(&mut self) -> &mut Self {
        self.script.push_back(Ok(Received::Timeout));
        self
    }

    pub fn transport_error(&mut self) -> &mut Self {
        self.script.push_back(Err(ShmError::VersionConflict));
        self
    }
}

impl CommandSource for ScriptedSource {
    fn recv_until(&mut self, _deadline: Instant) -> ShmResult<Received<MotorRefFrame>> {
        self.script.pop_front().unwrap_or(Ok(Received::Timeout))
    }
}

/// State sink collecting every published frame.
#[derive(Default)]
pub struct CollectingSink {
    pub frames: Vec<MotorStateFrame>,
    pub fail: bool,
}

impl CollectingSink {
    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        self.frames.iter().map(StateSnapshot::from_frame).collect()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.header.seq).collect()
    }
}

impl StateSink for CollectingSink {
    fn send(&mut self, frame: &MotorStateFrame) -> ShmResult<()> {
        if self.fail {
            return Err(ShmError::VersionConflict);
        }
        self.frames.push(*frame);
        Ok(())
    }
}

/// Config for a two-module group at 100 Hz.
pub fn config() -> DaemonConfig {
    DaemonConfig {
        frequency_hz: 100.0,
        buses: vec!["0:1,2".parse().unwrap()],
        ..DaemonConfig::default()
    }
}

/// Command frame stamped now.
pub fn frame(mode: MotorMode, values: &[f64], seq: u64) -> MotorRefFrame {
    MotorRefFrame::new(mode, values, seq, monotonic_ns())
}

/// Command frame stamped at the epoch of the monotonic clock, long expired.
pub fn stale_frame(mode: MotorMode, values: &[f64], seq: u64) -> MotorRefFrame {
    MotorRefFrame::new(mode, values, seq, 0)
}
