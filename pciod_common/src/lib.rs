//! pciod Common Library
//!
//! Types shared by the pciod daemon, its channel transport and its clients.
//!
//! # Module Structure
//!
//! - [`group`] - Module group layout (buses → modules)
//! - [`msg`] - Reference command / motor state frames and validated values
//! - [`bus`] - Bus-group collaborator trait, status codes, acknowledgments
//! - [`codes`] - Parameter, state and config code tables
//! - [`config`] - TOML configuration loading primitives
//! - [`consts`] - Limits and defaults
//! - [`time`] - Monotonic timestamps

pub mod bus;
pub mod codes;
pub mod config;
pub mod consts;
pub mod group;
pub mod msg;
pub mod time;
