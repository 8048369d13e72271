//! Reference command and motor state messages.
//!
//! Two representations live here:
//!
//! - **Wire frames** ([`MotorRefFrame`], [`MotorStateFrame`]): `#[repr(C)]`,
//!   `Copy`, fixed capacity of [`MAX_MODULES`] channels with the active count
//!   in the header. These are what the channels carry.
//! - **Domain values** ([`ReferenceCommand`], [`StateSnapshot`]): validated,
//!   sized to exactly `n` channels. A reference command can only be built from
//!   a frame through [`ReferenceCommand::validate`].

use heapless::Vec as FixedVec;
use serde::Serialize;
use static_assertions::const_assert_eq;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::consts::MAX_MODULES;

/// Per-module target or acknowledgment values, at most [`MAX_MODULES`] long.
pub type Targets = FixedVec<f64, MAX_MODULES>;

/// Build [`Targets`] from a slice, truncating at capacity.
pub fn targets_from(values: &[f64]) -> Targets {
    values.iter().copied().take(MAX_MODULES).collect()
}

/// Command mode tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum MotorMode {
    /// Absolute position target per module.
    Position = 1,
    /// Velocity target per module.
    Velocity = 2,
    /// Motor current per module.
    Current = 3,
    /// Halt the whole group.
    Halt = 4,
    /// Reset the whole group.
    Reset = 5,
}

impl MotorMode {
    /// Convert from the raw wire tag. Returns `None` for unknown tags.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Position),
            2 => Some(Self::Velocity),
            3 => Some(Self::Current),
            4 => Some(Self::Halt),
            5 => Some(Self::Reset),
            _ => None,
        }
    }

    /// Whether the mode carries one value per module.
    #[inline]
    pub const fn carries_targets(&self) -> bool {
        matches!(self, Self::Position | Self::Velocity | Self::Current)
    }
}

impl fmt::Display for MotorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Position => "position",
            Self::Velocity => "velocity",
            Self::Current => "current",
            Self::Halt => "halt",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

// ─── Wire frames ───────────────────────────────────────────────────

/// Common message header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MsgHeader {
    /// Sender sequence number.
    pub seq: u64,
    /// Send time on CLOCK_MONOTONIC [ns].
    pub time_ns: u64,
    /// Validity window after `time_ns` [ns]. Zero means "use the receiver default".
    pub expiry_ns: u64,
    /// Number of active channels.
    pub n: u32,
    /// Reserved.
    pub _pad: u32,
}

impl MsgHeader {
    /// Whether the message has outlived its validity window at `now_ns`.
    ///
    /// `fallback` applies when the header carries no window of its own.
    #[inline]
    pub fn is_expired(&self, now_ns: u64, fallback: Duration) -> bool {
        let window = if self.expiry_ns == 0 {
            u64::try_from(fallback.as_nanos()).unwrap_or(u64::MAX)
        } else {
            self.expiry_ns
        };
        self.time_ns.saturating_add(window) < now_ns
    }
}

/// Reference command as carried on the command channel.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MotorRefFrame {
    /// Header; `n` is the number of valid entries in `u`.
    pub header: MsgHeader,
    /// Raw [`MotorMode`] tag.
    pub mode: u8,
    /// Reserved.
    pub _pad: [u8; 7],
    /// Per-module values.
    pub u: [f64; MAX_MODULES],
}

impl MotorRefFrame {
    /// All-zero frame (mode tag 0 is invalid).
    pub const fn zeroed() -> Self {
        Self {
            header: MsgHeader {
                seq: 0,
                time_ns: 0,
                expiry_ns: 0,
                n: 0,
                _pad: 0,
            },
            mode: 0,
            _pad: [0; 7],
            u: [0.0; MAX_MODULES],
        }
    }

    /// Build a frame for `mode` with the given values (truncated at capacity).
    pub fn new(mode: MotorMode, values: &[f64], seq: u64, time_ns: u64) -> Self {
        let mut frame = Self::zeroed();
        let n = values.len().min(MAX_MODULES);
        frame.header.seq = seq;
        frame.header.time_ns = time_ns;
        frame.header.n = n as u32;
        frame.mode = mode as u8;
        frame.u[..n].copy_from_slice(&values[..n]);
        frame
    }

    /// Override the validity window.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.header.expiry_ns = u64::try_from(expiry.as_nanos()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for MotorRefFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// One module's entry in a state frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[repr(C)]
pub struct MotorStateEntry {
    /// Position.
    pub pos: f64,
    /// Velocity.
    pub vel: f64,
}

/// Motor state as carried on the state channel.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MotorStateFrame {
    /// Header; `seq` is the snapshot sequence number.
    pub header: MsgHeader,
    /// Per-module state, `header.n` entries valid.
    pub x: [MotorStateEntry; MAX_MODULES],
}

impl MotorStateFrame {
    /// All-zero frame.
    pub const fn zeroed() -> Self {
        Self {
            header: MsgHeader {
                seq: 0,
                time_ns: 0,
                expiry_ns: 0,
                n: 0,
                _pad: 0,
            },
            x: [MotorStateEntry { pos: 0.0, vel: 0.0 }; MAX_MODULES],
        }
    }

    /// Valid entries.
    pub fn entries(&self) -> &[MotorStateEntry] {
        let n = (self.header.n as usize).min(MAX_MODULES);
        &self.x[..n]
    }
}

impl Default for MotorStateFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

const_assert_eq!(core::mem::size_of::<MsgHeader>(), 32);
const_assert_eq!(core::mem::size_of::<MotorRefFrame>(), 32 + 8 + 8 * MAX_MODULES);
const_assert_eq!(core::mem::size_of::<MotorStateFrame>(), 32 + 16 * MAX_MODULES);

// ─── Domain values ─────────────────────────────────────────────────

/// Why a received frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidCommand {
    /// Mode tag outside the five known modes.
    #[error("invalid motor mode tag {0}")]
    UnknownMode(u8),

    /// Target array length does not match the group size.
    #[error("wrong motor count for {mode} command: got {actual}, wanted {expected}")]
    WrongCount {
        /// Decoded mode.
        mode: MotorMode,
        /// Group size `n`.
        expected: usize,
        /// Count carried by the frame.
        actual: usize,
    },

    /// A target is NaN or infinite.
    #[error("non-finite {mode} target at module {index}")]
    NonFinite {
        /// Decoded mode.
        mode: MotorMode,
        /// Offending module index.
        index: usize,
    },
}

/// Validated motion directive. One variant per mode.
#[derive(Debug, Clone, PartialEq)]
pub enum MotorCommand {
    /// Move to absolute positions.
    Position(Targets),
    /// Run at velocities.
    Velocity(Targets),
    /// Apply motor currents.
    Current(Targets),
    /// Halt the group.
    Halt,
    /// Reset the group.
    Reset,
}

impl MotorCommand {
    /// Mode tag of this command.
    pub const fn mode(&self) -> MotorMode {
        match self {
            Self::Position(_) => MotorMode::Position,
            Self::Velocity(_) => MotorMode::Velocity,
            Self::Current(_) => MotorMode::Current,
            Self::Halt => MotorMode::Halt,
            Self::Reset => MotorMode::Reset,
        }
    }

    /// Per-module targets, if the mode carries any.
    pub fn targets(&self) -> Option<&[f64]> {
        match self {
            Self::Position(t) | Self::Velocity(t) | Self::Current(t) => Some(t.as_slice()),
            Self::Halt | Self::Reset => None,
        }
    }
}

/// A reference command accepted by validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceCommand {
    /// Header as received (sequence, timestamp, validity window).
    pub header: MsgHeader,
    /// The directive.
    pub command: MotorCommand,
}

impl ReferenceCommand {
    /// Validate a received frame against a group of `n` modules.
    ///
    /// Halt and Reset ignore the frame's array; Position, Velocity and Current
    /// require exactly `n` finite values.
    pub fn validate(frame: &MotorRefFrame, n: usize) -> Result<Self, InvalidCommand> {
        let mode = MotorMode::from_u8(frame.mode).ok_or(InvalidCommand::UnknownMode(frame.mode))?;

        let command = if mode.carries_targets() {
            let actual = frame.header.n as usize;
            if actual != n || n > MAX_MODULES {
                return Err(InvalidCommand::WrongCount {
                    mode,
                    expected: n,
                    actual,
                });
            }
            let values = &frame.u[..n];
            if let Some(index) = values.iter().position(|v| !v.is_finite()) {
                return Err(InvalidCommand::NonFinite { mode, index });
            }
            let targets = targets_from(values);
            match mode {
                MotorMode::Position => MotorCommand::Position(targets),
                MotorMode::Velocity => MotorCommand::Velocity(targets),
                _ => MotorCommand::Current(targets),
            }
        } else if mode == MotorMode::Halt {
            MotorCommand::Halt
        } else {
            MotorCommand::Reset
        };

        Ok(Self {
            header: frame.header,
            command,
        })
    }

    /// Mode of the directive.
    #[inline]
    pub const fn mode(&self) -> MotorMode {
        self.command.mode()
    }

    /// Whether the command has outlived its validity window at `now_ns`.
    #[inline]
    pub fn is_expired(&self, now_ns: u64, fallback: Duration) -> bool {
        self.header.is_expired(now_ns, fallback)
    }

    /// Encode back into a wire frame.
    pub fn to_frame(&self) -> MotorRefFrame {
        let values = self.command.targets().unwrap_or(&[]);
        let mut frame = MotorRefFrame::new(self.mode(), values, self.header.seq, self.header.time_ns);
        frame.header.expiry_ns = self.header.expiry_ns;
        frame
    }
}

/// Position and velocity of one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ModuleState {
    /// Position.
    pub position: f64,
    /// Velocity.
    pub velocity: f64,
}

/// Published group state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Sequence number, +1 per publish.
    pub seq: u64,
    /// Exactly `n` module entries.
    pub modules: FixedVec<ModuleState, MAX_MODULES>,
}

impl StateSnapshot {
    /// Zeroed snapshot for `n` modules (capped at [`MAX_MODULES`]).
    pub fn new(n: usize) -> Self {
        let modules = core::iter::repeat_n(ModuleState::default(), n.min(MAX_MODULES)).collect();
        Self { seq: 0, modules }
    }

    /// Module count.
    #[inline]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True when the snapshot holds no modules.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Positions in group order.
    pub fn positions(&self) -> Targets {
        self.modules.iter().map(|m| m.position).collect()
    }

    /// Velocities in group order.
    pub fn velocities(&self) -> Targets {
        self.modules.iter().map(|m| m.velocity).collect()
    }

    /// Whether any module reports a non-zero velocity.
    pub fn any_moving(&self) -> bool {
        self.modules.iter().any(|m| m.velocity != 0.0)
    }

    /// Encode into a wire frame stamped with `time_ns`.
    pub fn to_frame(&self, time_ns: u64) -> MotorStateFrame {
        let mut frame = MotorStateFrame::zeroed();
        frame.header.seq = self.seq;
        frame.header.time_ns = time_ns;
        frame.header.n = self.modules.len() as u32;
        for (slot, module) in frame.x.iter_mut().zip(self.modules.iter()) {
            *slot = MotorStateEntry {
                pos: module.position,
                vel: module.velocity,
            };
        }
        frame
    }

    /// Decode a received state frame.
    pub fn from_frame(frame: &MotorStateFrame) -> Self {
        Self {
            seq: frame.header.seq,
            modules: frame
                .entries()
                .iter()
                .map(|e| ModuleState {
                    position: e.pos,
                    velocity: e.vel,
                })
                .collect(),
        }
    }
}
