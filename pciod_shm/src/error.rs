//! Error types for shared memory channel operations

use thiserror::Error;

/// Errors that can occur while opening or using a channel
#[derive(Error, Debug)]
pub enum ShmError {
    /// Channel name is empty or contains characters not allowed in `/dev/shm`
    #[error("Invalid channel name: '{name}'")]
    InvalidName {
        /// Offending name
        name: String,
    },

    /// Segment exists but was not created by a pciod channel
    #[error("Segment {name} has bad magic")]
    BadMagic {
        /// Channel name
        name: String,
    },

    /// Segment payload layout differs from the requested frame type
    #[error("Segment {name} layout mismatch: expected {expected_size} bytes / hash {expected_hash:#x}, found {found_size} bytes / hash {found_hash:#x}")]
    LayoutMismatch {
        /// Channel name
        name: String,
        /// Size of the local frame type
        expected_size: u32,
        /// Layout hash of the local frame type
        expected_hash: u32,
        /// Size recorded in the segment
        found_size: u32,
        /// Layout hash recorded in the segment
        found_hash: u32,
    },

    /// Another process created the segment but never finished initializing it
    #[error("Segment {name} was not initialized in time")]
    NotInitialized {
        /// Channel name
        name: String,
    },

    /// Writer kept the segment busy for every read attempt
    #[error("Version conflict detected - retry recommended")]
    VersionConflict,

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for channel operations
pub type ShmResult<T> = Result<T, ShmError>;
