//! State publisher.
//!
//! Keeps the last published [`StateSnapshot`] and rebuilds it each cycle,
//! either from the acknowledgment of the command just issued or by polling
//! the bus for the fields the acknowledgment does not cover.
//!
//! A failed poll leaves that field at its last known value. The sequence
//! number advances by exactly one per publish, whatever the poll outcome.

use pciod_common::bus::{Acknowledgment, BusResult, GroupBus};
use pciod_common::codes::Param;
use pciod_common::consts::MAX_MODULES;
use pciod_common::msg::{ModuleState, StateSnapshot};
use pciod_common::time::monotonic_ns;
use tracing::{trace, warn};

use crate::channel::StateSink;

/// Which fields of the last refresh came from a failed poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Position poll failed; previous positions kept.
    pub position_failed: bool,
    /// Velocity poll failed; previous velocities kept.
    pub velocity_failed: bool,
}

impl RefreshReport {
    /// True if any poll failed.
    pub fn any_failed(&self) -> bool {
        self.position_failed || self.velocity_failed
    }
}

/// Owner of the outgoing state snapshot.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    snapshot: StateSnapshot,
}

impl StatePublisher {
    /// Publisher for `n` modules, starting from a zeroed snapshot at seq 0.
    pub fn new(n: usize) -> Self {
        Self {
            snapshot: StateSnapshot::new(n),
        }
    }

    /// Last assembled snapshot.
    #[inline]
    pub fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }

    /// Update positions and velocities from `ack`, polling whatever it lacks.
    pub fn refresh<B: GroupBus + ?Sized>(&mut self, bus: &mut B, ack: &Acknowledgment) -> RefreshReport {
        let mut report = RefreshReport::default();

        match ack.positions() {
            Some(positions) => self.store(positions, |m, v| m.position = v),
            None => report.position_failed = !self.poll(bus, Param::ActPos),
        }
        match ack.velocities() {
            Some(velocities) => self.store(velocities, |m, v| m.velocity = v),
            None => report.velocity_failed = !self.poll(bus, Param::ActVel),
        }
        report
    }

    /// Load the snapshot from the bus before the first cycle.
    ///
    /// Unlike [`refresh`](Self::refresh) a failed read is returned, and the
    /// sequence number is left untouched.
    pub fn prime<B: GroupBus + ?Sized>(&mut self, bus: &mut B) -> BusResult<()> {
        let n = self.snapshot.len();
        let mut buf = [0.0f64; MAX_MODULES];
        bus.get_f64(Param::ActPos, &mut buf[..n])?;
        self.store(&buf[..n], |m, v| m.position = v);
        bus.get_f64(Param::ActVel, &mut buf[..n])?;
        self.store(&buf[..n], |m, v| m.velocity = v);
        Ok(())
    }

    fn store(&mut self, values: &[f64], mut set: impl FnMut(&mut ModuleState, f64)) {
        for (module, &value) in self.snapshot.modules.iter_mut().zip(values) {
            set(module, value);
        }
    }

    fn poll<B: GroupBus + ?Sized>(&mut self, bus: &mut B, param: Param) -> bool {
        let n = self.snapshot.len();
        let mut buf = [0.0f64; MAX_MODULES];
        match bus.get_f64(param, &mut buf[..n]) {
            Ok(()) => {
                let values = &buf[..n];
                match param {
                    Param::ActPos => self.store(values, |m, v| m.position = v),
                    _ => self.store(values, |m, v| m.velocity = v),
                }
                true
            }
            Err(e) => {
                warn!(
                    param = %param,
                    status = e.status.code(),
                    seq = self.snapshot.seq + 1,
                    "state poll failed, keeping last known {param}: {}",
                    e.status
                );
                false
            }
        }
    }

    /// Bump the sequence number and transmit the snapshot.
    ///
    /// Transmission failure is logged; it is not retried this cycle.
    pub fn publish<S: StateSink + ?Sized>(&mut self, sink: &mut S) {
        self.snapshot.seq += 1;
        let frame = self.snapshot.to_frame(monotonic_ns());
        match sink.send(&frame) {
            Ok(()) => trace!(seq = self.snapshot.seq, "state published"),
            Err(e) => warn!(seq = self.snapshot.seq, "state publish failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pciod_common::bus::{BusResult, BusStatus, MotionCommand};
    use pciod_common::group::ModuleGroup;
    use pciod_common::msg::{MotorStateFrame, targets_from};
    use pciod_shm::{ShmError, ShmResult};

    struct PollBus {
        group: ModuleGroup,
        pos: Result<Vec<f64>, BusStatus>,
        vel: Result<Vec<f64>, BusStatus>,
        polls: Vec<Param>,
    }

    impl PollBus {
        fn new(pos: Result<Vec<f64>, BusStatus>, vel: Result<Vec<f64>, BusStatus>) -> Self {
            Self {
                group: ModuleGroup::new(&["0:1,2".parse().unwrap()]).unwrap(),
                pos,
                vel,
                polls: Vec::new(),
            }
        }
    }

    impl GroupBus for PollBus {
        fn name(&self) -> &'static str {
            "poll"
        }
        fn group(&self) -> &ModuleGroup {
            &self.group
        }
        fn get_f64(&mut self, param: Param, out: &mut [f64]) -> BusResult<()> {
            self.polls.push(param);
            let source = if param == Param::ActPos { &self.pos } else { &self.vel };
            match source {
                Ok(values) => {
                    out.copy_from_slice(values);
                    Ok(())
                }
                Err(status) => status.check("get"),
            }
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
        fn command(&mut self, _: MotionCommand<'_>) -> BusResult<Acknowledgment> {
            Ok(Acknowledgment::None)
        }
        fn halt(&mut self) -> BusResult<()> {
            Ok(())
        }
        fn reset(&mut self) -> BusResult<()> {
            Ok(())
        }
        fn home(&mut self) -> BusResult<()> {
            Ok(())
        }
        fn set_full_current(&mut self, _: bool) -> BusResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sink {
        frames: Vec<MotorStateFrame>,
        fail: bool,
    }

    impl StateSink for Sink {
        fn send(&mut self, frame: &MotorStateFrame) -> ShmResult<()> {
            if self.fail {
                return Err(ShmError::VersionConflict);
            }
            self.frames.push(*frame);
            Ok(())
        }
    }

    #[test]
    fn no_ack_polls_both_fields() {
        let mut bus = PollBus::new(Ok(vec![1.0, 2.0]), Ok(vec![0.1, 0.2]));
        let mut publisher = StatePublisher::new(2);
        let report = publisher.refresh(&mut bus, &Acknowledgment::None);
        assert!(!report.any_failed());
        assert_eq!(bus.polls, vec![Param::ActPos, Param::ActVel]);
        assert_eq!(publisher.snapshot().positions().as_slice(), &[1.0, 2.0]);
        assert_eq!(publisher.snapshot().velocities().as_slice(), &[0.1, 0.2]);
    }

    #[test]
    fn position_ack_skips_position_poll() {
        let mut bus = PollBus::new(Ok(vec![9.0, 9.0]), Ok(vec![0.3, 0.4]));
        let mut publisher = StatePublisher::new(2);
        publisher.refresh(&mut bus, &Acknowledgment::Position(targets_from(&[5.0, 6.0])));
        assert_eq!(bus.polls, vec![Param::ActVel]);
        assert_eq!(publisher.snapshot().positions().as_slice(), &[5.0, 6.0]);
    }

    #[test]
    fn velocity_ack_skips_velocity_poll() {
        let mut bus = PollBus::new(Ok(vec![1.0, 1.5]), Ok(vec![9.0, 9.0]));
        let mut publisher = StatePublisher::new(2);
        publisher.refresh(&mut bus, &Acknowledgment::Velocity(targets_from(&[0.5, 0.0])));
        assert_eq!(bus.polls, vec![Param::ActPos]);
        assert_eq!(publisher.snapshot().velocities().as_slice(), &[0.5, 0.0]);
    }

    #[test]
    fn current_ack_is_not_mistaken_for_state() {
        let mut bus = PollBus::new(Ok(vec![1.0, 1.0]), Ok(vec![0.0, 0.0]));
        let mut publisher = StatePublisher::new(2);
        publisher.refresh(&mut bus, &Acknowledgment::Current(targets_from(&[7.0, 7.0])));
        assert_eq!(bus.polls, vec![Param::ActPos, Param::ActVel]);
        assert_eq!(publisher.snapshot().positions().as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn failed_velocity_poll_keeps_last_known() {
        let mut bus = PollBus::new(Ok(vec![1.0, 2.0]), Ok(vec![0.5, 0.0]));
        let mut publisher = StatePublisher::new(2);
        publisher.refresh(&mut bus, &Acknowledgment::None);

        bus.pos = Ok(vec![1.1, 2.1]);
        bus.vel = Err(BusStatus::RxTimeout);
        let report = publisher.refresh(&mut bus, &Acknowledgment::None);
        assert!(report.velocity_failed);
        assert!(!report.position_failed);
        assert_eq!(publisher.snapshot().positions().as_slice(), &[1.1, 2.1]);
        assert_eq!(publisher.snapshot().velocities().as_slice(), &[0.5, 0.0]);
    }

    #[test]
    fn seq_advances_once_per_publish_even_on_failure() {
        let mut publisher = StatePublisher::new(2);
        let mut sink = Sink::default();
        publisher.publish(&mut sink);
        sink.fail = true;
        publisher.publish(&mut sink);
        sink.fail = false;
        publisher.publish(&mut sink);

        assert_eq!(publisher.snapshot().seq, 3);
        let seqs: Vec<u64> = sink.frames.iter().map(|f| f.header.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
        assert_eq!(sink.frames[0].header.n, 2);
    }

    #[test]
    fn prime_loads_state_without_publishing() {
        let mut bus = PollBus::new(Ok(vec![3.0, -2.0]), Ok(vec![0.0, 0.1]));
        let mut publisher = StatePublisher::new(2);
        publisher.prime(&mut bus).unwrap();
        assert_eq!(publisher.snapshot().positions().as_slice(), &[3.0, -2.0]);
        assert_eq!(publisher.snapshot().velocities().as_slice(), &[0.0, 0.1]);
        assert_eq!(publisher.snapshot().seq, 0);
    }

    #[test]
    fn prime_returns_poll_failure() {
        let mut bus = PollBus::new(Err(BusStatus::RxTimeout), Ok(vec![0.0, 0.0]));
        let mut publisher = StatePublisher::new(2);
        let err = publisher.prime(&mut bus).unwrap_err();
        assert_eq!(err.status, BusStatus::RxTimeout);
        assert_eq!(bus.polls, vec![Param::ActPos]);
    }
}
