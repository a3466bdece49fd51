//! Shared nvdrv types: session context, result codes and fences

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::ioctl::IoctlData;

/// Guest-visible handle for an opened device
pub type FileDescriptor = i32;

/// Returned to the guest in place of an fd when an open fails
pub const INVALID_FILE_DESCRIPTOR: FileDescriptor = -1;

bitflags! {
    /// Per-session permission bits granted by the nvdrv service variant
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SessionPermissions: u32 {
        /// Channel, address space and GPU control devices
        const ACCESS_GPU = 1 << 0;
        /// GPU debugger devices
        const ACCESS_GPU_DEBUG = 1 << 1;
        /// GPU scheduling control
        const ACCESS_GPU_SCHEDULE = 1 << 2;
        /// Video image compositor
        const ACCESS_VIC = 1 << 3;
        /// Video encoder
        const ACCESS_VIDEO_ENCODER = 1 << 4;
        /// Video decoder
        const ACCESS_VIDEO_DECODER = 1 << 5;
        /// Security engine
        const ACCESS_TSEC = 1 << 6;
        /// JPEG engine
        const ACCESS_JPEG = 1 << 7;
        /// Display controller
        const ACCESS_DISPLAY = 1 << 8;
        /// Importing foreign memory into nvmap
        const ACCESS_IMPORT_MEMORY = 1 << 9;
        /// Skip the applet resource user id check
        const NO_CHECKED_ARUID = 1 << 10;
        /// Adjust the graphics firmware memory margin
        const MODIFY_GRAPHICS_MARGIN = 1 << 11;
        /// Duplicate nvmap handles across sessions
        const DUPLICATE_NVMAP_HANDLES = 1 << 12;
        /// Export nvmap handles to other processes
        const EXPORT_NVMAP_HANDLES = 1 << 13;
    }
}

impl Default for SessionPermissions {
    fn default() -> Self {
        Self::empty()
    }
}

/// Immutable per-session state supplied when a device is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Capability bits gating which devices may be opened
    pub perms: SessionPermissions,
    /// Whether the session belongs to a system module rather than the application
    pub internal_session: bool,
}

impl SessionContext {
    /// Context for an application session with the given permissions
    pub fn new(perms: SessionPermissions) -> Self {
        Self {
            perms,
            internal_session: false,
        }
    }

    /// Context of the `nvdrv` application service (GPU, VIC, decoders, JPEG)
    pub fn application() -> Self {
        Self::new(
            SessionPermissions::ACCESS_GPU
                | SessionPermissions::ACCESS_VIC
                | SessionPermissions::ACCESS_VIDEO_DECODER
                | SessionPermissions::ACCESS_JPEG
                | SessionPermissions::ACCESS_DISPLAY,
        )
    }
}

/// Result codes reported through the nvdrv service
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NvResult {
    /// Command completed
    Success = 0x0,
    /// Command exists but is not implemented
    NotImplemented = 0x1,
    /// Command is not understood by the device
    NotSupported = 0x2,
    /// Device has not been set up yet
    NotInitialized = 0x3,
    /// An argument is out of range
    BadParameter = 0x4,
    /// Wait did not complete, the guest should wait on the event
    Timeout = 0x5,
    /// Allocation failed
    InsufficientMemory = 0x6,
    /// Attribute cannot be written
    ReadOnlyAttribute = 0x7,
    /// Device is in the wrong state for the command
    InvalidState = 0x8,
    /// Address is unmapped or misaligned
    InvalidAddress = 0x9,
    /// Buffers do not match the command size
    InvalidSize = 0xA,
    /// Value is not recognised
    BadValue = 0xB,
    /// Resource is already allocated
    AlreadyAllocated = 0xD,
    /// Resource is in use
    Busy = 0xE,
    /// Generic resource failure
    ResourceError = 0xF,
    /// Element count disagrees with the buffer
    CountMismatch = 0x10,
    /// Arithmetic overflow in an argument
    OverFlow = 0x11,
    /// Open failed
    FileOperationFailed = 0x30003,
}

impl NvResult {
    /// Raw value as written into the response
    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Whether this is [`NvResult::Success`]
    pub fn is_success(self) -> bool {
        self == NvResult::Success
    }
}

impl std::fmt::Display for NvResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (0x{:X})", self, self.raw())
    }
}

/// POSIX-style codes returned by device ioctl handlers
///
/// Values are the Linux errno numbers the guest driver expects.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PosixResult {
    /// No error
    Success = 0,
    /// `EPERM`
    NotPermitted = 1,
    /// `EAGAIN`
    TryAgain = 11,
    /// `ENOMEM`
    OutOfMemory = 12,
    /// `EBUSY`
    Busy = 16,
    /// `EINVAL`
    InvalidArgument = 22,
    /// `ENOTTY`
    InappropriateIoctlForDevice = 25,
    /// `EOPNOTSUPP`
    NotSupported = 95,
    /// `ETIMEDOUT`
    TimedOut = 110,
}

impl PosixResult {
    /// Raw errno value
    pub fn raw(self) -> i32 {
        self as i32
    }
}

impl From<PosixResult> for NvResult {
    fn from(result: PosixResult) -> Self {
        match result {
            PosixResult::Success => NvResult::Success,
            PosixResult::NotPermitted => NvResult::InvalidState,
            PosixResult::TryAgain | PosixResult::TimedOut => NvResult::Timeout,
            PosixResult::OutOfMemory => NvResult::InsufficientMemory,
            PosixResult::Busy => NvResult::Busy,
            PosixResult::InvalidArgument => NvResult::BadParameter,
            PosixResult::InappropriateIoctlForDevice | PosixResult::NotSupported => {
                NvResult::NotSupported
            }
        }
    }
}

/// Target value on a syncpoint counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fence {
    /// Syncpoint id
    pub id: u32,
    /// Threshold the syncpoint has to reach
    pub value: u32,
}

impl Fence {
    /// Fence on syncpoint `id` at `value`
    pub fn new(id: u32, value: u32) -> Self {
        Self { id, value }
    }
}

impl IoctlData for Fence {
    const SIZE: usize = 8;

    fn decode(mut buf: &[u8]) -> Self {
        Self {
            id: buf.get_u32_le(),
            value: buf.get_u32_le(),
        }
    }

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.id);
        buf.put_u32_le(self.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PosixResult::Success, NvResult::Success)]
    #[case(PosixResult::TryAgain, NvResult::Timeout)]
    #[case(PosixResult::InvalidArgument, NvResult::BadParameter)]
    #[case(PosixResult::Busy, NvResult::Busy)]
    #[case(PosixResult::InappropriateIoctlForDevice, NvResult::NotSupported)]
    fn test_posix_to_nv(#[case] posix: PosixResult, #[case] expected: NvResult) {
        assert_eq!(NvResult::from(posix), expected);
    }

    #[test]
    fn test_fence_layout() {
        let mut buf = [0u8; 8];
        Fence::new(3, 10).encode(&mut buf);
        assert_eq!(buf, [3, 0, 0, 0, 10, 0, 0, 0]);
        assert_eq!(Fence::decode(&buf), Fence::new(3, 10));
    }

    #[test]
    fn test_application_context() {
        let ctx = SessionContext::application();
        assert!(ctx.perms.contains(SessionPermissions::ACCESS_GPU));
        assert!(!ctx.perms.contains(SessionPermissions::ACCESS_GPU_DEBUG));
        assert!(!ctx.internal_session);
    }

    #[test]
    fn test_result_display() {
        assert_eq!(
            NvResult::FileOperationFailed.to_string(),
            "FileOperationFailed (0x30003)"
        );
    }
}
