//! # pciod Shared Memory Channels
//!
//! Latest-frame, single-writer channels over POSIX shared memory. The daemon
//! reads reference commands from one channel and publishes motor state on
//! another; clients do the opposite.
//!
//! ## Layout
//!
//! ```text
//! /dev/shm/pciod_<name>
//! ┌──────────────────────────── 64 B ───────────────────────────┐
//! │ magic │ layout hash │ size │ write_seq │ frames │ writer pid │
//! ├──────────────────────────────────────────────────────────────┤
//! │ one frame (MotorRefFrame or MotorStateFrame)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `write_seq` is odd while a frame is being copied in. Readers retry until
//! they observe the same even value before and after their copy.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pciod_common::msg::{MotorMode, MotorRefFrame};
//! use pciod_shm::{CommandReader, CommandWriter, Received};
//! use std::time::{Duration, Instant};
//!
//! let mut writer = CommandWriter::open("pciod-cmd")?;
//! let mut reader = CommandReader::open("pciod-cmd")?;
//! writer.put(&MotorRefFrame::new(MotorMode::Velocity, &[0.1, 0.0], 1, 0));
//! if let Received::Fresh(frame) = reader.recv_until(Instant::now() + Duration::from_millis(10))? {
//!     assert_eq!(frame.header.n, 2);
//! }
//! # Ok::<(), pciod_shm::ShmError>(())
//! ```
//!
//! Either side may create the segment; the second opener attaches and checks
//! the payload layout.

pub mod channel;
pub mod error;
pub mod frames;
pub mod segment;

pub use channel::{ChannelReader, ChannelWriter, Received};
pub use error::{ShmError, ShmResult};
pub use frames::{CommandReader, CommandWriter, StateReader, StateWriter};
pub use segment::{ShmFrame, channel_path, remove_channel};
