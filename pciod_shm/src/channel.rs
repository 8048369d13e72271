//! Latest-frame channel endpoints
//!
//! A channel holds exactly one frame. The writer overwrites it in place under
//! the seqlock; readers copy it out and compare the committed frame count with
//! the last one they consumed. Nothing is queued: a slow reader sees only the
//! newest frame and learns how many it skipped.

use crate::error::{ShmError, ShmResult};
use crate::segment::{Segment, ShmFrame};
use nix::unistd::getpid;
use std::sync::atomic::{Ordering, fence};
use std::time::{Duration, Instant};

/// Consistent-read attempts before giving up with [`ShmError::VersionConflict`]
const MAX_READ_RETRIES: usize = 16;

/// Sleep between polls while waiting for a frame
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Outcome of a receive attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Received<T> {
    /// Exactly one new frame since the previous receive.
    Fresh(T),
    /// A new frame, but older ones were overwritten unseen.
    Missed {
        /// Newest frame.
        frame: T,
        /// Frames skipped before it.
        skipped: u64,
    },
    /// Nothing new before the deadline.
    Timeout,
}

impl<T> Received<T> {
    /// The delivered frame, if any.
    pub fn frame(self) -> Option<T> {
        match self {
            Self::Fresh(frame) | Self::Missed { frame, .. } => Some(frame),
            Self::Timeout => None,
        }
    }
}

/// Writing end of a channel.
pub struct ChannelWriter<T: ShmFrame> {
    segment: Segment<T>,
    pid: u32,
}

impl<T: ShmFrame> ChannelWriter<T> {
    /// Open (or create) the named channel for writing.
    pub fn open(name: &str) -> ShmResult<Self> {
        Ok(Self {
            segment: Segment::open_or_create(name)?,
            pid: getpid().as_raw() as u32,
        })
    }

    /// Publish a frame. Never blocks on readers.
    pub fn put(&mut self, frame: &T) {
        let header = self.segment.header() as *const crate::segment::ChannelHeader;
        let payload = self.segment.payload_ptr_mut();

        // SAFETY: header and payload live inside our mapping for the lifetime
        // of `self`; readers tolerate torn payloads via the seqlock.
        unsafe {
            let seq = (*header).write_seq.load(Ordering::Relaxed);
            // Odd while writing. A word left odd by a crashed writer is reused as is.
            let start = seq | 1;
            (*header).write_seq.store(start, Ordering::Relaxed);
            fence(Ordering::Release);

            std::ptr::write_volatile(payload, *frame);
            (*header).frames.fetch_add(1, Ordering::Relaxed);
            (*header).writer_pid.store(self.pid, Ordering::Relaxed);

            fence(Ordering::Release);
            (*header).write_seq.store(start.wrapping_add(1), Ordering::Release);
        }
    }

    /// Committed frame count.
    pub fn frames(&self) -> u64 {
        self.segment.header().frames.load(Ordering::Acquire)
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}

/// Reading end of a channel.
pub struct ChannelReader<T: ShmFrame> {
    segment: Segment<T>,
    consumed: u64,
}

impl<T: ShmFrame> ChannelReader<T> {
    /// Open (or create) the named channel for reading.
    ///
    /// Frames committed before the reader attached are treated as consumed, so
    /// a stale frame left by a previous session is never delivered.
    pub fn open(name: &str) -> ShmResult<Self> {
        let segment = Segment::open_or_create(name)?;
        let consumed = segment.header().frames.load(Ordering::Acquire);
        Ok(Self { segment, consumed })
    }

    /// Copy out the current frame and its frame count under the seqlock.
    fn read_consistent(&self) -> ShmResult<(u64, T)> {
        let header = self.segment.header();
        let payload = self.segment.payload_ptr();

        for _ in 0..MAX_READ_RETRIES {
            let before = header.write_seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            fence(Ordering::Acquire);

            let frames = header.frames.load(Ordering::Relaxed);
            // SAFETY: payload is inside the mapping; T accepts any bit pattern
            // and a torn copy is discarded below.
            let frame = unsafe { std::ptr::read_volatile(payload) };

            fence(Ordering::Acquire);
            if header.write_seq.load(Ordering::Acquire) == before {
                return Ok((frames, frame));
            }
            std::hint::spin_loop();
        }
        Err(ShmError::VersionConflict)
    }

    /// Check once for a new frame without waiting.
    pub fn try_recv(&mut self) -> ShmResult<Received<T>> {
        if self.segment.header().frames.load(Ordering::Acquire) == self.consumed {
            return Ok(Received::Timeout);
        }
        let (frames, frame) = self.read_consistent()?;
        if frames == self.consumed {
            return Ok(Received::Timeout);
        }
        let skipped = frames.wrapping_sub(self.consumed).saturating_sub(1);
        self.consumed = frames;
        Ok(if skipped == 0 {
            Received::Fresh(frame)
        } else {
            Received::Missed { frame, skipped }
        })
    }

    /// Wait until a new frame arrives or `deadline` passes.
    pub fn recv_until(&mut self, deadline: Instant) -> ShmResult<Received<T>> {
        loop {
            match self.try_recv()? {
                Received::Timeout => {}
                received => return Ok(received),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Received::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Current frame regardless of whether it was already consumed.
    ///
    /// Returns `None` if nothing was ever written. Does not mark the frame consumed.
    pub fn latest(&self) -> ShmResult<Option<T>> {
        let (frames, frame) = self.read_consistent()?;
        Ok((frames > 0).then_some(frame))
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}
