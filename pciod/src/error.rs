//! Fatal daemon errors.
//!
//! Anything here ends the process with a non-zero exit status. Recoverable
//! conditions inside the control loop are logged and never become a
//! `DaemonError`.

use pciod_common::bus::BusError;
use pciod_common::config::ConfigError;
use pciod_common::group::GroupError;
use pciod_shm::ShmError;
use thiserror::Error;

/// Fatal initialization or one-shot action failure.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// Module group layout is invalid.
    #[error("module group: {0}")]
    Group(#[from] GroupError),

    /// No driver registered under the requested name.
    #[error("unknown bus driver '{0}'")]
    UnknownDriver(String),

    /// A bus operation failed during start-up or a one-shot action.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// A command or state channel could not be opened.
    #[error("channel '{name}': {source}")]
    Channel {
        /// Channel name.
        name: String,
        /// Underlying transport error.
        #[source]
        source: ShmError,
    },

    /// Real-time setup system call failed.
    #[error("RT setup: {0}")]
    RtSetup(String),

    /// A one-shot action was given unusable arguments.
    #[error("{0}")]
    Usage(String),

    /// Signal handler could not be installed.
    #[error("signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// Writing one-shot output failed.
    #[error("output: {0}")]
    Output(#[from] std::io::Error),
}

/// Result type for fatal paths.
pub type DaemonResult<T> = Result<T, DaemonError>;
