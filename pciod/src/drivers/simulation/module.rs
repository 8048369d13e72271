//! Kinematic model of one servo module.
//!
//! Velocity, position and current modes are integrated with the module's
//! rated acceleration; halts stop immediately. Soft position limits clamp the
//! motion and latch `BEYOND_SOFT`.

use pciod_common::bus::PositionProfile;
use pciod_common::codes::{ConfigFlags, Param, StateFlags};
use tracing::trace;

/// Velocity below which a module counts as standing still.
const STANDSTILL: f64 = 1e-6;

/// Active drive mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveMode {
    /// No motion requested.
    Idle,
    /// Track a velocity.
    Velocity(f64),
    /// Ramp to a position.
    Position {
        /// Absolute target.
        target: f64,
        /// Ceiling for this move.
        profile: PositionProfile,
    },
    /// Apply a current.
    Current(f64),
}

/// One simulated module.
#[derive(Debug, Clone)]
pub struct SimModule {
    pub(crate) position: f64,
    pub(crate) velocity: f64,
    pub(crate) current: f64,
    pub(crate) mode: DriveMode,
    pub(crate) state: StateFlags,
    pub(crate) config: ConfigFlags,
    max_vel: f64,
    max_acc: f64,
    max_cur: f64,
    min_pos: f64,
    max_pos: f64,
    max_delta_pos: f64,
    target_pos: f64,
    target_vel: f64,
    target_acc: f64,
    home_offset: f64,
    serial: u32,
}

impl SimModule {
    /// Module with factory defaults. `serial` distinguishes modules in dumps.
    pub fn new(serial: u32) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            current: 0.0,
            mode: DriveMode::Idle,
            state: StateFlags::empty(),
            config: ConfigFlags::BRAKE_PRESENT | ConfigFlags::SOFT_HIGH | ConfigFlags::SOFT_LOW,
            max_vel: 1.0,
            max_acc: 4.0,
            max_cur: 5.0,
            min_pos: -std::f64::consts::PI,
            max_pos: std::f64::consts::PI,
            max_delta_pos: 0.5,
            target_pos: 0.0,
            target_vel: 0.5,
            target_acc: 4.0,
            home_offset: 0.0,
            serial,
        }
    }

    /// True if the module refuses motion until reset.
    pub fn blocked(&self) -> bool {
        self.state.has_fault() || self.state.contains(StateFlags::HALTED)
    }

    /// Advance the model by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        if self.blocked() {
            self.velocity = 0.0;
            self.sync_motion_flag();
            return;
        }

        let (desired, acc) = match self.mode {
            DriveMode::Idle => (0.0, self.max_acc),
            DriveMode::Velocity(v) => (v.clamp(-self.max_vel, self.max_vel), self.max_acc),
            DriveMode::Current(i) => {
                let ratio = if self.max_cur > 0.0 {
                    (i / self.max_cur).clamp(-1.0, 1.0)
                } else {
                    0.0
                };
                (ratio * self.max_vel, self.max_acc)
            }
            DriveMode::Position { target, profile } => {
                let vmax = profile.velocity.min(self.max_vel);
                let amax = profile.acceleration.min(self.max_acc);
                let error = target - self.position;
                let braking = (2.0 * amax * error.abs()).sqrt();
                let v = error.signum() * vmax.min(braking).min(error.abs() / dt);
                (v, amax)
            }
        };

        let dv = (desired - self.velocity).clamp(-acc * dt, acc * dt);
        self.velocity += dv;
        self.position += self.velocity * dt;

        if self.position > self.max_pos || self.position < self.min_pos {
            self.position = self.position.clamp(self.min_pos, self.max_pos);
            self.velocity = 0.0;
            self.state.insert(StateFlags::BEYOND_SOFT);
        }
        self.sync_motion_flag();
        trace!(
            serial = self.serial,
            pos = self.position,
            vel = self.velocity,
            "module advanced"
        );
    }

    fn sync_motion_flag(&mut self) {
        self.state
            .set(StateFlags::MOTION, self.velocity.abs() > STANDSTILL);
        if self.velocity.abs() <= STANDSTILL {
            self.velocity = 0.0;
        }
    }

    /// Start tracking a velocity; returns the applied (clamped) value.
    pub fn command_velocity(&mut self, v: f64) -> f64 {
        let applied = v.clamp(-self.max_vel, self.max_vel);
        self.mode = DriveMode::Velocity(applied);
        applied
    }

    /// Start a position move; returns the applied (soft-limited) target.
    pub fn command_position(&mut self, target: f64, profile: PositionProfile) -> f64 {
        let applied = target.clamp(self.min_pos, self.max_pos);
        self.target_pos = applied;
        self.target_vel = profile.velocity;
        self.target_acc = profile.acceleration;
        self.mode = DriveMode::Position {
            target: applied,
            profile,
        };
        applied
    }

    /// Apply a current; returns the applied (rated-limited) value.
    pub fn command_current(&mut self, i: f64) -> f64 {
        let applied = i.clamp(-self.max_cur, self.max_cur);
        self.current = applied;
        self.mode = DriveMode::Current(applied);
        applied
    }

    /// Stop immediately and latch `HALTED`.
    pub fn halt(&mut self) {
        self.mode = DriveMode::Idle;
        self.velocity = 0.0;
        self.current = 0.0;
        self.state.insert(StateFlags::HALTED);
        self.state.remove(StateFlags::MOTION);
    }

    /// Clear halt and error latches.
    pub fn reset(&mut self) {
        self.mode = DriveMode::Idle;
        self.velocity = 0.0;
        self.state.remove(StateFlags::HALTED | StateFlags::FAULT_MASK | StateFlags::BEYOND_SOFT);
    }

    /// Move to the home offset and latch `HOME_OK`.
    pub fn home(&mut self) {
        self.mode = DriveMode::Idle;
        self.velocity = 0.0;
        self.position = self.home_offset;
        self.state.insert(StateFlags::HOME_OK);
    }

    /// Read a double parameter. `None` if the parameter is not a double.
    pub fn get_f64(&self, param: Param) -> Option<f64> {
        Some(match param {
            Param::ActPos => self.position,
            Param::ActVel => self.velocity,
            Param::ActCur => self.current,
            Param::MaxDeltaPos => self.max_delta_pos,
            Param::MinPos => self.min_pos,
            Param::MaxPos => self.max_pos,
            Param::MaxVel => self.max_vel,
            Param::MaxAcc => self.max_acc,
            Param::MaxCur => self.max_cur,
            Param::TargetPos => self.target_pos,
            Param::TargetVel => self.target_vel,
            Param::TargetAcc => self.target_acc,
            Param::HomeOffset => self.home_offset,
            Param::Serial | Param::PulsesPerTurn | Param::Version | Param::State | Param::Config => {
                return None;
            }
        })
    }

    /// Write a double parameter. Returns false for read-only or non-double parameters.
    pub fn set_f64(&mut self, param: Param, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let slot = match param {
            Param::MaxDeltaPos => &mut self.max_delta_pos,
            Param::MinPos => &mut self.min_pos,
            Param::MaxPos => &mut self.max_pos,
            Param::MaxVel => &mut self.max_vel,
            Param::MaxAcc => &mut self.max_acc,
            Param::MaxCur => &mut self.max_cur,
            Param::TargetVel => &mut self.target_vel,
            Param::TargetAcc => &mut self.target_acc,
            Param::HomeOffset => &mut self.home_offset,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// Read a 32-bit parameter. `None` if the parameter is not a word.
    pub fn get_u32(&self, param: Param) -> Option<u32> {
        match param {
            Param::Serial => Some(self.serial),
            Param::PulsesPerTurn => Some(4096),
            Param::Version => Some(0x3510),
            Param::State => Some(self.state.bits()),
            Param::Config => Some(self.config.bits()),
            _ => None,
        }
    }

    /// Write a 32-bit parameter. Only the config word is writable.
    pub fn set_u32(&mut self, param: Param, value: u32) -> bool {
        match param {
            Param::Config => {
                self.config = ConfigFlags::from_bits_truncate(value);
                true
            }
            _ => false,
        }
    }
}
