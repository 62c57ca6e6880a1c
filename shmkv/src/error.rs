//! Error types for shared memory store operations

use common::config::ConfigError;
use nix::errno::Errno;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during shared memory store operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment could not be created, opened or attached
    #[error("Shared memory segment {identifier:#010x} unavailable: {source}")]
    SegmentUnavailable {
        /// Derived segment identifier
        identifier: u32,
        /// Underlying system error
        source: Errno,
    },

    /// No segment exists for the purpose key
    #[error("No segment stored for purpose key: {purpose_key}")]
    NotFound {
        /// Purpose key that was looked up
        purpose_key: String,
    },

    /// Write does not fit the segment created by an earlier write
    #[error(
        "Segment {identifier:#010x} holds {capacity} bytes, write needs {requested} bytes"
    )]
    SizeMismatch {
        /// Derived segment identifier
        identifier: u32,
        /// Total size of the existing segment
        capacity: usize,
        /// Total size the write requires
        requested: usize,
    },

    /// Gate could not be acquired within the configured bound
    #[error("Timed out after {timeout:?} waiting for gate of segment {identifier:#010x}")]
    GateTimeout {
        /// Derived segment identifier
        identifier: u32,
        /// Configured bound
        timeout: Duration,
    },

    /// Gate semaphore could not be opened, waited on or posted
    #[error("Gate of segment {identifier:#010x} failed: {source}")]
    Gate {
        /// Derived segment identifier
        identifier: u32,
        /// Underlying system error
        source: Errno,
    },

    /// Segment header was written by an incompatible layout
    #[error("Segment {identifier:#010x} has unknown format (magic {magic:?}, version {version})")]
    FormatMismatch {
        /// Derived segment identifier
        identifier: u32,
        /// Magic bytes found in the header
        magic: [u8; 8],
        /// Format version found in the header
        version: u32,
    },

    /// Segment identifier is already owned by another purpose key
    #[error("Segment {identifier:#010x} belongs to a different key than {purpose_key}")]
    KeyCollision {
        /// Derived segment identifier
        identifier: u32,
        /// Purpose key that collided
        purpose_key: String,
    },

    /// Purpose key or namespace scope rejected
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey {
        /// Offending key
        key: String,
        /// Why the key was rejected
        reason: &'static str,
    },

    /// Some segments could not be released during a sweep
    #[error("{} segment(s) could not be freed", failures.len())]
    PartialFree {
        /// One entry per segment that failed
        failures: Vec<FreeFailure>,
    },

    /// Store configuration rejected
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: ConfigError,
    },
}

impl ShmError {
    /// True when the error only signals an absent segment.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A single segment that `free_all` could not release.
#[derive(Debug)]
pub struct FreeFailure {
    /// Purpose key the segment was recorded under
    pub purpose_key: String,
    /// Derived segment identifier
    pub identifier: u32,
    /// Error hit while releasing it
    pub error: ShmError,
}

/// Result type for shared memory store operations
pub type ShmResult<T> = Result<T, ShmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = ShmError::NotFound {
            purpose_key: "greeting".to_string(),
        };
        assert!(err.is_not_found());

        let err = ShmError::SegmentUnavailable {
            identifier: 7,
            source: Errno::EACCES,
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_partial_free_message_counts_failures() {
        let err = ShmError::PartialFree {
            failures: vec![
                FreeFailure {
                    purpose_key: "a".to_string(),
                    identifier: 1,
                    error: ShmError::Gate {
                        identifier: 1,
                        source: Errno::EINVAL,
                    },
                },
                FreeFailure {
                    purpose_key: "b".to_string(),
                    identifier: 2,
                    error: ShmError::SegmentUnavailable {
                        identifier: 2,
                        source: Errno::EPERM,
                    },
                },
            ],
        };
        assert_eq!(err.to_string(), "2 segment(s) could not be freed");
    }

    #[test]
    fn test_identifier_rendered_in_hex() {
        let err = ShmError::SizeMismatch {
            identifier: 0xABCD,
            capacity: 45,
            requested: 90,
        };
        assert!(err.to_string().contains("0x0000abcd"));
    }
}
