//! Bus-group collaborator interface and status codes.
//!
//! This module defines:
//! - `BusStatus` - transport status codes (only `Success` is success)
//! - `BusError` - a non-success status tagged with the failing operation
//! - `MotionCommand` / `Acknowledgment` - actuation requests and their typed acks
//! - `GroupBus` trait - interface for pluggable bus drivers
//!
//! Every operation addresses the whole group at once; slices passed in or out
//! are indexed by the group-wide module index and must be exactly `n` long.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::codes::{ConfigFlags, Param, StateFlags};
use crate::consts::{DEFAULT_POSITION_ACCELERATION, DEFAULT_POSITION_VELOCITY, MAX_MODULES};
use crate::group::{ModuleAddress, ModuleGroup};
use crate::msg::Targets;

/// Transport status code returned by every bus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum BusStatus {
    /// Operation completed.
    Success = 0,
    /// No reply within the receive timeout.
    RxTimeout = 1,
    /// Frame could not be sent within the transmit timeout.
    TxTimeout = 2,
    /// Transmit failed.
    TxError = 3,
    /// Bus controller went bus-off.
    ControllerOffBus = 4,
    /// Network device not present.
    NetNotFound = 5,
    /// Module did not answer at its id.
    ModuleNotFound = 6,
    /// Argument rejected (e.g. slice length differs from group size).
    InvalidParameter = 7,
    /// Module reported an error flag in its reply.
    ModuleError = 8,
}

impl BusStatus {
    /// Convert from a raw status code. Unknown codes map to `None`.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::RxTimeout),
            2 => Some(Self::TxTimeout),
            3 => Some(Self::TxError),
            4 => Some(Self::ControllerOffBus),
            5 => Some(Self::NetNotFound),
            6 => Some(Self::ModuleNotFound),
            7 => Some(Self::InvalidParameter),
            8 => Some(Self::ModuleError),
            _ => None,
        }
    }

    /// Raw status code.
    #[inline]
    pub const fn code(&self) -> i32 {
        *self as i32
    }

    /// True only for `Success`.
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Map a status into a result for operation `op`.
    #[inline]
    pub fn check(self, op: &'static str) -> BusResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(BusError { op, status: self })
        }
    }
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::RxTimeout => "rx timeout",
            Self::TxTimeout => "tx timeout",
            Self::TxError => "tx error",
            Self::ControllerOffBus => "controller off bus",
            Self::NetNotFound => "net not found",
            Self::ModuleNotFound => "module not found",
            Self::InvalidParameter => "invalid parameter",
            Self::ModuleError => "module error",
        };
        f.write_str(text)
    }
}

/// A bus operation that did not return `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{op}: {status} ({code})", code = .status.code())]
pub struct BusError {
    /// Operation that failed.
    pub op: &'static str,
    /// Returned status (never `Success`).
    pub status: BusStatus,
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Velocity/acceleration ceiling for position moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionProfile {
    /// Velocity ceiling.
    #[serde(default = "default_profile_velocity")]
    pub velocity: f64,
    /// Acceleration ceiling.
    #[serde(default = "default_profile_acceleration")]
    pub acceleration: f64,
}

fn default_profile_velocity() -> f64 {
    DEFAULT_POSITION_VELOCITY
}

fn default_profile_acceleration() -> f64 {
    DEFAULT_POSITION_ACCELERATION
}

impl Default for PositionProfile {
    fn default() -> Self {
        Self {
            velocity: DEFAULT_POSITION_VELOCITY,
            acceleration: DEFAULT_POSITION_ACCELERATION,
        }
    }
}

/// Actuation request that returns one acknowledgment value per module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand<'a> {
    /// Apply currents.
    Current(&'a [f64]),
    /// Run at velocities.
    Velocity(&'a [f64]),
    /// Ramp to positions under the given profile.
    Position {
        /// Absolute targets.
        targets: &'a [f64],
        /// Velocity/acceleration ceiling.
        profile: PositionProfile,
    },
}

impl MotionCommand<'_> {
    /// Per-module values of the request.
    pub fn values(&self) -> &[f64] {
        match self {
            Self::Current(v) | Self::Velocity(v) => v,
            Self::Position { targets, .. } => targets,
        }
    }

    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Current(_) => "current",
            Self::Velocity(_) => "velocity",
            Self::Position { .. } => "position",
        }
    }
}

/// Per-module values confirmed by a command, typed by what they measure.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Acknowledgment {
    /// The command produces no per-module acknowledgment (halt, reset).
    #[default]
    None,
    /// Applied currents.
    Current(Targets),
    /// Applied velocities.
    Velocity(Targets),
    /// Applied positions.
    Position(Targets),
}

impl Acknowledgment {
    /// Acknowledged positions, if this ack carries them.
    pub fn positions(&self) -> Option<&[f64]> {
        match self {
            Self::Position(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Acknowledged velocities, if this ack carries them.
    pub fn velocities(&self) -> Option<&[f64]> {
        match self {
            Self::Velocity(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// State word of one module, from [`GroupBus::dump_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStateReport {
    /// Module address.
    pub address: ModuleAddress,
    /// Decoded state word (unknown bits dropped).
    pub state: StateFlags,
}

/// Config word of one module, from [`GroupBus::dump_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleConfigReport {
    /// Module address.
    pub address: ModuleAddress,
    /// Decoded config word (unknown bits dropped).
    pub config: ConfigFlags,
}

/// Interface to a group of modules on one or more buses.
///
/// All calls are synchronous and block until the bus answers. Drivers own the
/// frozen [`ModuleGroup`] they were opened with.
pub trait GroupBus: Send {
    /// Driver identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    /// Layout of the opened group.
    fn group(&self) -> &ModuleGroup;

    /// Number of modules `n`.
    fn size(&self) -> usize {
        self.group().len()
    }

    /// Read a double parameter from every module into `out`.
    fn get_f64(&mut self, param: Param, out: &mut [f64]) -> BusResult<()>;

    /// Write a double parameter to every module.
    fn set_f64(&mut self, param: Param, values: &[f64]) -> BusResult<()>;

    /// Read a 32-bit parameter from every module into `out`.
    fn get_u32(&mut self, param: Param, out: &mut [u32]) -> BusResult<()>;

    /// Write a 32-bit parameter to every module.
    fn set_u32(&mut self, param: Param, values: &[u32]) -> BusResult<()>;

    /// Issue a current/velocity/position command and collect acknowledgments.
    fn command(&mut self, cmd: MotionCommand<'_>) -> BusResult<Acknowledgment>;

    /// Halt every module.
    fn halt(&mut self) -> BusResult<()>;

    /// Reset every module (clears errors and halt).
    fn reset(&mut self) -> BusResult<()>;

    /// Run the homing procedure on every module.
    fn home(&mut self) -> BusResult<()>;

    /// Select full-current or reduced-current operating mode.
    fn set_full_current(&mut self, enable: bool) -> BusResult<()>;

    /// Read and decode every module's state word.
    fn dump_error(&mut self) -> BusResult<Vec<ModuleStateReport>> {
        let n = self.size();
        let mut words = [0u32; MAX_MODULES];
        self.get_u32(Param::State, &mut words[..n])?;
        Ok(self
            .group()
            .addresses()
            .map(|address| ModuleStateReport {
                address,
                state: StateFlags::from_bits_truncate(words[address.index]),
            })
            .collect())
    }

    /// Read and decode every module's config word.
    fn dump_config(&mut self) -> BusResult<Vec<ModuleConfigReport>> {
        let n = self.size();
        let mut words = [0u32; MAX_MODULES];
        self.get_u32(Param::Config, &mut words[..n])?;
        Ok(self
            .group()
            .addresses()
            .map(|address| ModuleConfigReport {
                address,
                config: ConfigFlags::from_bits_truncate(words[address.index]),
            })
            .collect())
    }
}

impl<B: GroupBus + ?Sized> GroupBus for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn group(&self) -> &ModuleGroup {
        (**self).group()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn get_f64(&mut self, param: Param, out: &mut [f64]) -> BusResult<()> {
        (**self).get_f64(param, out)
    }

    fn set_f64(&mut self, param: Param, values: &[f64]) -> BusResult<()> {
        (**self).set_f64(param, values)
    }

    fn get_u32(&mut self, param: Param, out: &mut [u32]) -> BusResult<()> {
        (**self).get_u32(param, out)
    }

    fn set_u32(&mut self, param: Param, values: &[u32]) -> BusResult<()> {
        (**self).set_u32(param, values)
    }

    fn command(&mut self, cmd: MotionCommand<'_>) -> BusResult<Acknowledgment> {
        (**self).command(cmd)
    }

    fn halt(&mut self) -> BusResult<()> {
        (**self).halt()
    }

    fn reset(&mut self) -> BusResult<()> {
        (**self).reset()
    }

    fn home(&mut self) -> BusResult<()> {
        (**self).home()
    }

    fn set_full_current(&mut self, enable: bool) -> BusResult<()> {
        (**self).set_full_current(enable)
    }

    fn dump_error(&mut self) -> BusResult<Vec<ModuleStateReport>> {
        (**self).dump_error()
    }

    fn dump_config(&mut self) -> BusResult<Vec<ModuleConfigReport>> {
        (**self).dump_config()
    }
}
