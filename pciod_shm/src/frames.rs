//! Channel frame types and the standard channel aliases

use crate::channel::{ChannelReader, ChannelWriter};
use crate::segment::ShmFrame;
use pciod_common::msg::{MotorRefFrame, MotorStateFrame};

// SAFETY: both frames are #[repr(C)] aggregates of integers and floats with
// explicit padding fields; any bit pattern is a valid value.
unsafe impl ShmFrame for MotorRefFrame {}
unsafe impl ShmFrame for MotorStateFrame {}

/// Daemon side of the command channel.
pub type CommandReader = ChannelReader<MotorRefFrame>;
/// Client side of the command channel.
pub type CommandWriter = ChannelWriter<MotorRefFrame>;
/// Daemon side of the state channel.
pub type StateWriter = ChannelWriter<MotorStateFrame>;
/// Client side of the state channel.
pub type StateReader = ChannelReader<MotorStateFrame>;
