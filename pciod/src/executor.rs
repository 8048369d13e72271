//! Group command executor.
//!
//! Maps a validated [`MotorCommand`] onto the bus group:
//!
//! | command  | bus call                                  | acknowledgment |
//! |----------|-------------------------------------------|----------------|
//! | Current  | `command(Current)`                        | currents       |
//! | Velocity | limit, `command(Velocity)`                | velocities     |
//! | Position | limit, `command(Position)` with profile   | positions      |
//! | Halt     | `halt()`                                  | none           |
//! | Reset    | `reset()`                                 | none           |
//!
//! A non-success status is logged here and handed back to the caller, which
//! skips the state update for that cycle.

use pciod_common::bus::{Acknowledgment, BusResult, GroupBus, MotionCommand, PositionProfile};
use pciod_common::consts::MAX_MODULES;
use pciod_common::msg::MotorCommand;
use tracing::{trace, warn};

use crate::limiter::MotionLimiter;

/// Issues validated commands to the bus group.
#[derive(Debug, Clone)]
pub struct GroupExecutor {
    limiter: MotionLimiter,
    profile: PositionProfile,
}

impl GroupExecutor {
    /// Executor with the given limiter and position-move profile.
    pub fn new(limiter: MotionLimiter, profile: PositionProfile) -> Self {
        Self { limiter, profile }
    }

    /// The limiter applied to velocity and position targets.
    pub fn limiter(&self) -> &MotionLimiter {
        &self.limiter
    }

    /// Issue `command` and collect the acknowledgment.
    ///
    /// `last_positions` is the previous snapshot's positions, used to bound
    /// position steps.
    pub fn execute<B: GroupBus + ?Sized>(
        &self,
        bus: &mut B,
        command: &MotorCommand,
        last_positions: &[f64],
    ) -> BusResult<Acknowledgment> {
        let result = match command {
            MotorCommand::Current(targets) => bus.command(MotionCommand::Current(targets)),
            MotorCommand::Velocity(targets) => {
                let limited = self.limiter.limit_velocity(targets);
                trace!(requested = ?targets.as_slice(), limited = ?limited.as_slice(), "velocity limited");
                bus.command(MotionCommand::Velocity(&limited))
            }
            MotorCommand::Position(targets) => {
                let limited = self.limiter.limit_position(targets, last_positions);
                trace!(requested = ?targets.as_slice(), limited = ?limited.as_slice(), "position limited");
                bus.command(MotionCommand::Position {
                    targets: &limited,
                    profile: self.profile,
                })
            }
            MotorCommand::Halt => bus.halt().map(|()| Acknowledgment::None),
            MotorCommand::Reset => bus.reset().map(|()| Acknowledgment::None),
        };

        if let Err(ref e) = result {
            warn!(
                mode = %command.mode(),
                op = e.op,
                status = e.status.code(),
                "bus command failed: {}",
                e.status
            );
        }
        result
    }

    /// Command zero velocity on every module.
    pub fn zero_velocity<B: GroupBus + ?Sized>(&self, bus: &mut B) -> BusResult<Acknowledgment> {
        let zeros = [0.0f64; MAX_MODULES];
        let n = bus.size().min(MAX_MODULES);
        bus.command(MotionCommand::Velocity(&zeros[..n]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pciod_common::bus::{BusError, BusStatus};
    use pciod_common::codes::Param;
    use pciod_common::group::ModuleGroup;
    use pciod_common::msg::{Targets, targets_from};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Current(Vec<f64>),
        Velocity(Vec<f64>),
        Position(Vec<f64>, PositionProfile),
        Halt,
        Reset,
    }

    struct Recorder {
        group: ModuleGroup,
        calls: Vec<Call>,
        fail: Option<BusStatus>,
    }

    impl Recorder {
        fn new(n: usize) -> Self {
            let ids: Vec<String> = (1..=n).map(|i| i.to_string()).collect();
            let spec = format!("0:{}", ids.join(","));
            Self {
                group: ModuleGroup::new(&[spec.parse().unwrap()]).unwrap(),
                calls: Vec::new(),
                fail: None,
            }
        }

        fn status(&self, op: &'static str) -> BusResult<()> {
            self.fail.unwrap_or(BusStatus::Success).check(op)
        }
    }

    impl GroupBus for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn group(&self) -> &ModuleGroup {
            &self.group
        }
        fn get_f64(&mut self, _: Param, _: &mut [f64]) -> BusResult<()> {
            Ok(())
        }
        fn set_f64(&mut self, _: Param, _: &[f64]) -> BusResult<()> {
            Ok(())
        }
        fn get_u32(&mut self, _: Param, _: &mut [u32]) -> BusResult<()> {
            Ok(())
        }
        fn set_u32(&mut self, _: Param, _: &[u32]) -> BusResult<()> {
            Ok(())
        }
        fn command(&mut self, cmd: MotionCommand<'_>) -> BusResult<Acknowledgment> {
            let values = cmd.values().to_vec();
            self.calls.push(match cmd {
                MotionCommand::Current(_) => Call::Current(values.clone()),
                MotionCommand::Velocity(_) => Call::Velocity(values.clone()),
                MotionCommand::Position { profile, .. } => Call::Position(values.clone(), profile),
            });
            self.status("command")?;
            let ack = targets_from(&values);
            Ok(match cmd {
                MotionCommand::Current(_) => Acknowledgment::Current(ack),
                MotionCommand::Velocity(_) => Acknowledgment::Velocity(ack),
                MotionCommand::Position { .. } => Acknowledgment::Position(ack),
            })
        }
        fn halt(&mut self) -> BusResult<()> {
            self.calls.push(Call::Halt);
            self.status("halt")
        }
        fn reset(&mut self) -> BusResult<()> {
            self.calls.push(Call::Reset);
            self.status("reset")
        }
        fn home(&mut self) -> BusResult<()> {
            Ok(())
        }
        fn set_full_current(&mut self, _: bool) -> BusResult<()> {
            Ok(())
        }
    }

    fn executor() -> GroupExecutor {
        GroupExecutor::new(
            MotionLimiter::new(&[1.0, 1.0], Duration::from_millis(100)),
            PositionProfile::default(),
        )
    }

    fn t(values: &[f64]) -> Targets {
        targets_from(values)
    }

    #[test]
    fn current_is_not_limited() {
        let mut bus = Recorder::new(2);
        let ack = executor()
            .execute(&mut bus, &MotorCommand::Current(t(&[9.0, -9.0])), &[0.0, 0.0])
            .unwrap();
        assert_eq!(bus.calls, vec![Call::Current(vec![9.0, -9.0])]);
        assert!(matches!(ack, Acknowledgment::Current(_)));
    }

    #[test]
    fn velocity_is_limited_and_acked_as_velocity() {
        let mut bus = Recorder::new(2);
        let ack = executor()
            .execute(&mut bus, &MotorCommand::Velocity(t(&[3.0, 0.5])), &[0.0, 0.0])
            .unwrap();
        assert_eq!(bus.calls, vec![Call::Velocity(vec![1.0, 0.5])]);
        assert_eq!(ack.velocities(), Some(&[1.0, 0.5][..]));
        assert!(ack.positions().is_none());
    }

    #[test]
    fn position_is_limited_and_carries_profile() {
        let mut bus = Recorder::new(2);
        let ack = executor()
            .execute(&mut bus, &MotorCommand::Position(t(&[5.0, 0.05])), &[0.0, 0.0])
            .unwrap();
        match &bus.calls[0] {
            Call::Position(values, profile) => {
                assert!((values[0] - 0.1).abs() < 1e-12);
                assert_eq!(values[1], 0.05);
                assert_eq!(*profile, PositionProfile::default());
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert!(ack.positions().is_some());
    }

    #[test]
    fn halt_and_reset_have_no_ack() {
        let mut bus = Recorder::new(2);
        let exec = executor();
        assert_eq!(exec.execute(&mut bus, &MotorCommand::Halt, &[]).unwrap(), Acknowledgment::None);
        assert_eq!(exec.execute(&mut bus, &MotorCommand::Reset, &[]).unwrap(), Acknowledgment::None);
        assert_eq!(bus.calls, vec![Call::Halt, Call::Reset]);
    }

    #[test]
    fn failure_is_returned_not_panicked() {
        let mut bus = Recorder::new(2);
        bus.fail = Some(BusStatus::TxTimeout);
        let err = executor().execute(&mut bus, &MotorCommand::Halt, &[]).unwrap_err();
        assert_eq!(
            err,
            BusError {
                op: "halt",
                status: BusStatus::TxTimeout
            }
        );
    }

    #[test]
    fn zero_velocity_covers_group() {
        let mut bus = Recorder::new(3);
        executor().zero_velocity(&mut bus).unwrap();
        assert_eq!(bus.calls, vec![Call::Velocity(vec![0.0; 3])]);
    }
}
