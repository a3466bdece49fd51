//! # NVDRV - High-level emulation of the nvdrv ioctl interface
//!
//! A Rust library that services guest ioctls against emulated `/dev/nv*`
//! devices without any real NVIDIA hardware behind them.
//!
//! ## Features
//!
//! - **Descriptor-driven dispatch**: packed ioctl numbers are matched against
//!   static per-device tables and their arguments decoded from a schema
//! - **Device registry** with per-session capability gates
//! - **Syncpoint events** on `/dev/nvhost-ctrl`, signalled by a pluggable
//!   [`Host1x`] collaborator
//! - **Software host1x** for tests and tools
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use nvdrv::prelude::*;
//!
//! let host1x = Arc::new(SoftHost1x::default());
//! let service = NvDrvService::new(
//!     DriverConfig::default(),
//!     host1x,
//!     SessionContext::application(),
//! );
//! let (fd, result) = service.open("/dev/nvmap");
//! assert_eq!(result, NvResult::Success);
//! assert_eq!(fd, 0);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Driver configuration
pub mod config;
/// Emulated devices
pub mod devices;
/// Device registry
pub mod driver;
/// Error types
pub mod error;
/// Signalable events handed to the guest
pub mod event;
/// GPU progress collaborator
pub mod host1x;
/// Descriptors, argument decoding and dispatch tables
pub mod ioctl;
/// Session front end
pub mod service;
/// State shared across devices
pub mod shared;
/// Common types and result codes
pub mod types;

// Re-export main API for easy access
pub use config::DriverConfig;
pub use devices::{Device, DeviceClass, NvDevice};
pub use driver::Driver;
pub use error::{DecodeError, DriverResult, NvDrvError};
pub use event::KEvent;
pub use host1x::{Host1x, SoftHost1x, WaiterHandle};
pub use ioctl::{IoctlData, IoctlDescriptor};
pub use service::NvDrvService;
pub use types::{
    Fence, FileDescriptor, NvResult, PosixResult, SessionContext, SessionPermissions,
    INVALID_FILE_DESCRIPTOR,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
///
/// # Example
///
/// ```
/// println!("Using nvdrv v{}", nvdrv::version());
/// ```
pub fn version() -> &'static str {
    VERSION
}

/// Device paths a session with `ctx` may open under `config`
///
/// # Example
///
/// ```
/// use nvdrv::{DriverConfig, SessionContext};
///
/// let paths = nvdrv::openable_devices(&DriverConfig::default(), &SessionContext::default());
/// assert_eq!(paths, vec!["/dev/nvmap", "/dev/nvhost-ctrl"]);
/// ```
pub fn openable_devices(config: &DriverConfig, ctx: &SessionContext) -> Vec<&'static str> {
    DeviceClass::ALL
        .into_iter()
        .filter(|class| class.is_permitted(config, ctx))
        .map(DeviceClass::path)
        .collect()
}


/// Prelude module for convenient imports
///
/// # Example
///
/// ```
/// use nvdrv::prelude::*;
///
/// let cmd = IoctlDescriptor::from_raw(0xC010_001D);
/// assert_eq!(cmd.size, 0x10);
/// ```
pub mod prelude {
    pub use crate::config::DriverConfig;
    pub use crate::devices::{DeviceClass, NvDevice, SyncpointEventValue};
    pub use crate::error::{DriverResult, NvDrvError};
    pub use crate::host1x::{Host1x, SoftHost1x};
    pub use crate::ioctl::{IoctlData, IoctlDescriptor};
    pub use crate::service::NvDrvService;
    pub use crate::types::{Fence, NvResult, PosixResult, SessionContext, SessionPermissions};
    pub use crate::{openable_devices, version};
}
