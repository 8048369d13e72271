//! # pciod Library
//!
//! Real-time motor-control daemon for a group of servo modules on one or
//! more fieldbuses. Reference commands arrive on a shared-memory channel,
//! are validated and rate-limited, issued to the group, and the resulting
//! positions and velocities are published on a second channel.
//!
//! ## Cycle
//!
//! 1. Wait for a command, at most one control period.
//! 2. Validate it against the group size.
//! 3. Limit velocity and position targets by the rated velocity.
//! 4. Issue it to the bus group and collect the acknowledgment.
//! 5. Refresh and publish the state snapshot.
//!
//! On a timeout the state is polled and published, and the watchdog stops a
//! group still moving under an expired velocity command.
//!
//! ## Modules
//!
//! - [`cycle`] - Control context, cycle statistics, RT setup
//! - [`limiter`] - Rated-velocity bounds
//! - [`executor`] - Command to bus call mapping
//! - [`publisher`] - State snapshot assembly
//! - [`watchdog`] - Stale velocity command detection
//! - [`channel`] - Command source / state sink seams
//! - [`oneshot`] - Query, set, reset, list, config bit actions
//! - [`drivers`] - Bus drivers (simulation)
//! - [`daemon`] - Start-up and teardown
//! - [`config`] - Configuration
//! - [`error`] - Fatal errors

pub mod channel;
pub mod config;
pub mod cycle;
pub mod daemon;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod oneshot;
pub mod publisher;
pub mod watchdog;
