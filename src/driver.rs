//! Device registry: path table and per-session fd table

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, warn};

use crate::config::DriverConfig;
use crate::devices::{Device, DeviceClass};
use crate::error::{DriverResult, NvDrvError};
use crate::host1x::Host1x;
use crate::shared::Core;
use crate::types::{FileDescriptor, NvResult, SessionContext, INVALID_FILE_DESCRIPTOR};

/// Closed fds keep their entry so later lookups can tell closed from unknown
type DeviceMap = HashMap<FileDescriptor, Option<Arc<Device>>>;

#[derive(Default)]
struct FdTable {
    devices: DeviceMap,
    next_fd: FileDescriptor,
}

/// Owns the shared core and every device opened through it
///
/// The fd counter lives here, so sessions sharing a driver draw distinct fds.
pub struct Driver {
    core: Arc<Core>,
    table: RwLock<FdTable>,
}

impl Driver {
    /// Driver over `host1x`, clamping the syncpoint count to what it provides
    pub fn new(mut config: DriverConfig, host1x: Arc<dyn Host1x>) -> Self {
        let available = host1x.syncpoint_count();
        if config.syncpoint_count > available {
            warn!(
                "Configured {} syncpoints but host1x provides {}, clamping",
                config.syncpoint_count, available
            );
            config.syncpoint_count = available;
        }

        Self {
            core: Arc::new(Core::new(config, host1x)),
            table: RwLock::new(FdTable::default()),
        }
    }

    /// State shared by every device
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    fn read(&self) -> RwLockReadGuard<'_, FdTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FdTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `path` on the next free fd
    ///
    /// The counter only advances on success and never hands out an fd twice.
    pub fn open(&self, path: &str, ctx: &SessionContext) -> (FileDescriptor, NvResult) {
        let mut table = self.write();
        if path.is_empty() || table.next_fd >= self.core.config.fd_limit {
            return (INVALID_FILE_DESCRIPTOR, NvResult::FileOperationFailed);
        }

        let fd = table.next_fd;
        match self.open_locked(&mut table.devices, path, fd, ctx) {
            NvResult::Success => {
                table.next_fd += 1;
                (fd, NvResult::Success)
            }
            result => (INVALID_FILE_DESCRIPTOR, result),
        }
    }

    /// Construct the device at `path` and bind it to `fd`
    ///
    /// Unknown paths, missing capabilities and fds that are still open all
    /// fail with `FileOperationFailed`.
    pub fn open_device(&self, path: &str, fd: FileDescriptor, ctx: &SessionContext) -> NvResult {
        self.open_locked(&mut self.write().devices, path, fd, ctx)
    }

    fn open_locked(
        &self,
        devices: &mut DeviceMap,
        path: &str,
        fd: FileDescriptor,
        ctx: &SessionContext,
    ) -> NvResult {
        debug!("Opening NvDrv device ({}): {}", fd, path);

        let Some(class) = DeviceClass::from_path(path) else {
            return NvResult::FileOperationFailed;
        };
        if !class.is_permitted(&self.core.config, ctx) {
            debug!("Session lacks permission for {}", class);
            return NvResult::FileOperationFailed;
        }

        if matches!(devices.get(&fd), Some(Some(_))) {
            warn!("Opening {} over live fd {}", class, fd);
            return NvResult::FileOperationFailed;
        }

        let device = class.construct(Arc::clone(&self.core), *ctx);
        devices.insert(fd, Some(Arc::new(device)));
        NvResult::Success
    }

    /// Device bound to `fd`
    ///
    /// Both failure cases are protocol violations by the caller.
    pub fn get_device(&self, fd: FileDescriptor) -> DriverResult<Arc<Device>> {
        let err = match self.read().devices.get(&fd) {
            Some(Some(device)) => return Ok(Arc::clone(device)),
            Some(None) => NvDrvError::ClosedFd(fd),
            None => NvDrvError::InvalidFd(fd),
        };
        error!("{}", err);
        Err(err)
    }

    /// Release the device bound to `fd`, in-flight users keep their reference
    pub fn close_device(&self, fd: FileDescriptor) {
        match self.write().devices.get_mut(&fd) {
            Some(slot) => {
                debug!("Closing NvDrv device ({})", fd);
                *slot = None;
            }
            None => warn!("Trying to close non-existent fd {}", fd),
        }
    }

    /// Fds that currently have a device bound, in ascending order
    pub fn open_fds(&self) -> Vec<FileDescriptor> {
        let mut fds: Vec<_> = self
            .read()
            .devices
            .iter()
            .filter(|(_, device)| device.is_some())
            .map(|(fd, _)| *fd)
            .collect();
        fds.sort_unstable();
        fds
    }
}
