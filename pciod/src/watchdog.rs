//! Stale-command watchdog.
//!
//! Runs after a command wait times out. The only automatic intervention is a
//! zero-velocity hold when the last accepted command was a Velocity command
//! that has expired while some module still moves. Stale Position, Current,
//! Halt and Reset commands are left alone.

use std::time::Duration;

use pciod_common::msg::{MotorMode, ReferenceCommand, StateSnapshot};

/// Outcome of a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to do.
    Hold,
    /// Command zero velocity on every module.
    ForceZeroVelocity,
}

/// Expiry check for the last accepted command.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    fallback_expiry: Duration,
}

impl Watchdog {
    /// `fallback_expiry` applies to commands whose header carries no window.
    pub fn new(fallback_expiry: Duration) -> Self {
        Self { fallback_expiry }
    }

    /// Decide whether to force a zero-velocity hold at `now_ns`.
    pub fn evaluate(
        &self,
        last: Option<&ReferenceCommand>,
        snapshot: &StateSnapshot,
        now_ns: u64,
    ) -> Verdict {
        let Some(last) = last else {
            return Verdict::Hold;
        };
        if last.mode() == MotorMode::Velocity
            && last.is_expired(now_ns, self.fallback_expiry)
            && snapshot.any_moving()
        {
            Verdict::ForceZeroVelocity
        } else {
            Verdict::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pciod_common::msg::{ModuleState, MotorRefFrame};

    const MS: u64 = 1_000_000;

    fn command(mode: MotorMode, time_ns: u64) -> ReferenceCommand {
        let frame = MotorRefFrame::new(mode, &[0.5, 0.0], 1, time_ns);
        ReferenceCommand::validate(&frame, 2).unwrap()
    }

    fn moving() -> StateSnapshot {
        let mut snap = StateSnapshot::new(2);
        snap.modules[0] = ModuleState {
            position: 0.0,
            velocity: 0.5,
        };
        snap
    }

    fn watchdog() -> Watchdog {
        Watchdog::new(Duration::from_millis(200))
    }

    #[test]
    fn stale_velocity_while_moving_forces_zero() {
        let cmd = command(MotorMode::Velocity, 1_000 * MS);
        assert_eq!(
            watchdog().evaluate(Some(&cmd), &moving(), 1_300 * MS),
            Verdict::ForceZeroVelocity
        );
    }

    #[test]
    fn fresh_velocity_holds() {
        let cmd = command(MotorMode::Velocity, 1_000 * MS);
        assert_eq!(watchdog().evaluate(Some(&cmd), &moving(), 1_100 * MS), Verdict::Hold);
    }

    #[test]
    fn stale_velocity_at_rest_holds() {
        let cmd = command(MotorMode::Velocity, 1_000 * MS);
        assert_eq!(
            watchdog().evaluate(Some(&cmd), &StateSnapshot::new(2), 5_000 * MS),
            Verdict::Hold
        );
    }

    #[test]
    fn other_modes_never_force() {
        for mode in [MotorMode::Position, MotorMode::Current, MotorMode::Halt, MotorMode::Reset] {
            let cmd = command(mode, 0);
            assert_eq!(watchdog().evaluate(Some(&cmd), &moving(), 10_000 * MS), Verdict::Hold);
        }
    }

    #[test]
    fn no_command_holds() {
        assert_eq!(watchdog().evaluate(None, &moving(), u64::MAX), Verdict::Hold);
    }

    #[test]
    fn header_window_overrides_fallback() {
        let frame = MotorRefFrame::new(MotorMode::Velocity, &[0.5, 0.0], 1, 1_000 * MS)
            .with_expiry(Duration::from_millis(20));
        let cmd = ReferenceCommand::validate(&frame, 2).unwrap();
        assert_eq!(
            watchdog().evaluate(Some(&cmd), &moving(), 1_050 * MS),
            Verdict::ForceZeroVelocity
        );
    }
}
