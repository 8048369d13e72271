//! Channel seams of the control loop.
//!
//! The loop talks to its inbound and outbound channels through
//! [`CommandSource`] and [`StateSink`], implemented here for the shared
//! memory endpoints and by in-memory doubles in tests.

use std::time::Instant;

use pciod_common::msg::{MotorRefFrame, MotorStateFrame};
use pciod_shm::{CommandReader, Received, ShmResult, StateWriter};

/// Where reference commands come from.
pub trait CommandSource {
    /// Wait for the next command frame until `deadline`.
    fn recv_until(&mut self, deadline: Instant) -> ShmResult<Received<MotorRefFrame>>;
}

/// Where state snapshots go.
pub trait StateSink {
    /// Transmit one state frame.
    fn send(&mut self, frame: &MotorStateFrame) -> ShmResult<()>;
}

impl CommandSource for CommandReader {
    fn recv_until(&mut self, deadline: Instant) -> ShmResult<Received<MotorRefFrame>> {
        CommandReader::recv_until(self, deadline)
    }
}

impl StateSink for StateWriter {
    fn send(&mut self, frame: &MotorStateFrame) -> ShmResult<()> {
        self.put(frame);
        Ok(())
    }
}

/// Open the daemon's channel pair.
pub fn open_channels(
    command: &str,
    state: &str,
) -> crate::error::DaemonResult<(CommandReader, StateWriter)> {
    use crate::error::DaemonError;

    let reader = CommandReader::open(command).map_err(|source| DaemonError::Channel {
        name: command.to_string(),
        source,
    })?;
    let writer = StateWriter::open(state).map_err(|source| DaemonError::Channel {
        name: state.to_string(),
        source,
    })?;
    Ok((reader, writer))
}
