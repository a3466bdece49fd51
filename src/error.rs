//! Error types for the nvdrv library

use std::io;
use thiserror::Error;

use crate::types::FileDescriptor;

/// Failures of the argument decoder
///
/// These are guest-visible: the service reports them as `NvResult::InvalidSize`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The schema does not add up to the size encoded in the descriptor
    #[error("Schema consumes {consumed} bytes but the descriptor declares {declared}")]
    SizeMismatch {
        /// Size field of the descriptor
        declared: usize,
        /// Sum of all schema slots
        consumed: usize,
    },

    /// The buffer is shorter than the schema
    #[error("Buffer holds {available} bytes, {needed} required")]
    BufferTooSmall {
        /// Bytes required by the schema
        needed: usize,
        /// Bytes actually supplied
        available: usize,
    },

    /// A handler asked for a different argument kind than the schema declares
    #[error("Argument {index} is {found}, handler expected {expected}")]
    SlotKind {
        /// Position among the non-padding slots
        index: usize,
        /// Kind requested by the handler
        expected: &'static str,
        /// Kind declared by the schema
        found: &'static str,
    },

    /// A handler asked for a type whose size differs from the schema slot
    #[error("Argument {index} is {found} bytes, handler expected {expected}")]
    SlotSize {
        /// Position among the non-padding slots
        index: usize,
        /// Size of the requested type
        expected: usize,
        /// Size declared by the schema
        found: usize,
    },

    /// A handler asked for more arguments than the schema declares
    #[error("Argument {index} requested but the schema has no more slots")]
    Exhausted {
        /// Position of the missing argument
        index: usize,
    },
}

/// Main error type for nvdrv operations
///
/// Apart from [`NvDrvError::Decode`] these are emulator-side protocol
/// violations and must abort the session rather than reach the guest.
#[derive(Error, Debug)]
pub enum NvDrvError {
    /// Lookup of an fd that was never opened
    #[error("GetDevice was called with invalid file descriptor: 0x{0:X}")]
    InvalidFd(FileDescriptor),

    /// Lookup of an fd that has been closed
    #[error("GetDevice was called with a closed file descriptor: 0x{0:X}")]
    ClosedFd(FileDescriptor),

    /// Every syncpoint event slot is waiting, signalling or cancelling
    #[error("Failed to find a free nvhost event")]
    SyncpointEventsExhausted,

    /// The request carried no buffer for a command that needs one
    #[error("No ioctl buffers supplied for a {size} byte command")]
    MissingBuffers {
        /// Size field of the descriptor
        size: usize,
    },

    /// Argument decoding failed
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Config(#[from] serde_json::Error),

    /// Reading a configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NvDrvError {
    /// Whether the guest may observe this error as a result code
    pub fn is_guest_visible(&self) -> bool {
        matches!(self, NvDrvError::Decode(_))
    }
}

/// Result type for nvdrv operations
pub type DriverResult<T> = std::result::Result<T, NvDrvError>;
