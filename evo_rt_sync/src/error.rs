//! Error types for shared memory segment operations

use evo_common::status::RtError;
use thiserror::Error;

/// Errors that can occur while creating or attaching shared memory segments
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment name rejected
    #[error("Invalid segment name '{name}': {reason}")]
    InvalidName {
        /// Segment name
        name: String,
        /// Why the name was rejected
        reason: &'static str,
    },

    /// Segment name still mapped by a reader or writer
    #[error("Segment already exists and is in use: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// No descriptor registered for the name
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Backing file smaller than header plus payload
    #[error("Invalid segment size: {actual} bytes (expected at least {expected})")]
    InvalidSize {
        /// Required size in bytes
        expected: usize,
        /// Size found
        actual: usize,
    },

    /// Header magic does not match
    #[error("Segment '{name}' has no valid header")]
    InvalidMagic {
        /// Segment name
        name: String,
    },

    /// Header layout version does not match this build
    #[error("Segment '{name}' layout version {found}, expected {expected}")]
    VersionMismatch {
        /// Segment name
        name: String,
        /// Version compiled into this process
        expected: u32,
        /// Version found in the header
        found: u32,
    },

    /// Payload type tag or size does not match the requested type
    #[error("Segment '{name}' holds '{found}', expected '{expected}'")]
    TypeMismatch {
        /// Segment name
        name: String,
        /// Requested payload type
        expected: &'static str,
        /// Type recorded in the header
        found: String,
    },

    /// Segment was removed from its manager
    #[error("Segment '{name}' has been retired")]
    Retired {
        /// Segment name
        name: String,
    },

    /// Memory alignment error
    #[error("Memory alignment error: address {address:#x} not aligned to {alignment}")]
    AlignmentError {
        /// Memory address
        address: usize,
        /// Required alignment
        alignment: usize,
    },

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

/// Result type for shared memory segment operations
pub type ShmResult<T> = Result<T, ShmError>;

impl From<ShmError> for RtError {
    fn from(err: ShmError) -> Self {
        match err {
            ShmError::InvalidName { .. }
            | ShmError::NotFound { .. }
            | ShmError::InvalidSize { .. }
            | ShmError::InvalidMagic { .. }
            | ShmError::VersionMismatch { .. }
            | ShmError::TypeMismatch { .. } => RtError::invalid_argument(err.to_string()),
            ShmError::AlreadyExists { .. } => RtError::already_exists(err.to_string()),
            ShmError::Retired { .. } => RtError::failed_precondition(err.to_string()),
            ShmError::AlignmentError { .. } => RtError::internal(err.to_string()),
            ShmError::Io { .. } | ShmError::Nix { .. } => {
                RtError::resource_exhausted(err.to_string())
            }
        }
    }
}
