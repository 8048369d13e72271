//! CLOCK_MONOTONIC timestamps shared between processes.
//!
//! Message headers carry nanoseconds on the system-wide monotonic clock so
//! that the sender and the daemon agree on expiry without wall-clock jumps.

use nix::time::{ClockId, clock_gettime};

/// Current CLOCK_MONOTONIC time [ns].
///
/// Returns 0 if the clock cannot be read.
pub fn monotonic_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => (ts.tv_sec() as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add(ts.tv_nsec() as u64),
        Err(_) => 0,
    }
}
