//! Error types for flzma2 operations.
//!
//! One enum covers the whole engine: parameter validation, allocation,
//! cooperative cancellation and timeouts, internal consistency failures and
//! the decode-side checks of the verification decoder.
//!
//! [`Flzma2Error::Canceled`] and [`Flzma2Error::TimedOut`] are resumable
//! signals rather than failures of the overall operation. Callers should test
//! [`Flzma2Error::is_resumable`] before treating a result as an error.

use std::io;
use thiserror::Error;

/// The main error type for flzma2 operations.
#[derive(Debug, Error)]
pub enum Flzma2Error {
    /// I/O error from an underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A buffer or table could not be allocated.
    #[error("Out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
    },

    /// The destination buffer cannot hold the output.
    #[error("Destination too small: need {needed} bytes, have {available}")]
    DestinationTooSmall {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },

    /// A parameter value is outside its documented bounds.
    #[error("Invalid parameter {name}: {value} is outside {min}..={max}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: i64,
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },

    /// The parameter cannot change while a stream frame is open.
    #[error("Parameter {name} is locked while a frame is in progress")]
    ParameterLocked {
        /// Parameter name.
        name: &'static str,
    },

    /// The operation was canceled by the caller.
    #[error("Operation canceled")]
    Canceled,

    /// A wait timed out; the operation can be retried.
    #[error("Operation timed out")]
    TimedOut,

    /// An internal invariant was violated.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// The stream checksum does not match the decoded data.
    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the stream.
        expected: u32,
        /// Checksum of the decoded data.
        computed: u32,
    },

    /// Malformed compressed data.
    #[error("Corrupted data at offset {offset}: {message}")]
    CorruptedData {
        /// Byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },
}

/// Result type alias for flzma2 operations.
pub type Result<T> = std::result::Result<T, Flzma2Error>;

impl Flzma2Error {
    /// Create an out-of-memory error.
    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory { requested }
    }

    /// Create a destination-too-small error.
    pub fn destination_too_small(needed: usize, available: usize) -> Self {
        Self::DestinationTooSmall { needed, available }
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(name: &'static str, value: i64, min: i64, max: i64) -> Self {
        Self::InvalidParameter {
            name,
            value,
            min,
            max,
        }
    }

    /// Create a parameter-locked error.
    pub fn parameter_locked(name: &'static str) -> Self {
        Self::ParameterLocked { name }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a checksum mismatch error.
    pub fn checksum_mismatch(expected: u32, computed: u32) -> Self {
        Self::ChecksumMismatch { expected, computed }
    }

    /// Create a corrupted data error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptedData {
            offset,
            message: message.into(),
        }
    }

    /// Whether this is a cooperative signal (cancel or timeout) rather than a
    /// failure. The operation may be resumed or restarted.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Canceled | Self::TimedOut)
    }
}

impl From<Flzma2Error> for io::Error {
    fn from(err: Flzma2Error) -> Self {
        match err {
            Flzma2Error::Io(inner) => inner,
            Flzma2Error::OutOfMemory { .. } => io::Error::new(io::ErrorKind::OutOfMemory, err),
            Flzma2Error::InvalidParameter { .. } | Flzma2Error::ParameterLocked { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            Flzma2Error::Canceled => io::Error::new(io::ErrorKind::Interrupted, err),
            Flzma2Error::TimedOut => io::Error::new(io::ErrorKind::TimedOut, err),
            Flzma2Error::ChecksumMismatch { .. } | Flzma2Error::CorruptedData { .. } => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
            Flzma2Error::DestinationTooSmall { .. } => {
                io::Error::new(io::ErrorKind::WriteZero, err)
            }
            Flzma2Error::Internal { .. } => io::Error::other(err),
        }
    }
}
