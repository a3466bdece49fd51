//! Engine devices whose command sets are not emulated

use std::sync::Arc;

use log::warn;

use crate::devices::{DeviceClass, NvDevice};
use crate::error::DriverResult;
use crate::ioctl::IoctlDescriptor;
use crate::shared::Core;
use crate::types::{PosixResult, SessionContext};

/// Placeholder for a gated host engine; opening works, every command is refused
pub struct HostDevice {
    class: DeviceClass,
    core: Arc<Core>,
    ctx: SessionContext,
}

impl HostDevice {
    /// Stub for `class`
    pub fn new(class: DeviceClass, core: Arc<Core>, ctx: SessionContext) -> Self {
        Self { class, core, ctx }
    }

    /// Path the device was opened as
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Session the device was opened by
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Driver state the device shares
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    fn unsupported(&self, cmd: IoctlDescriptor) -> DriverResult<PosixResult> {
        warn!("Unsupported {} ioctl: {}", self.class, cmd);
        Ok(PosixResult::InappropriateIoctlForDevice)
    }
}

impl NvDevice for HostDevice {
    fn name(&self) -> &'static str {
        self.class.path()
    }

    fn ioctl(&self, cmd: IoctlDescriptor, _buffer: &mut [u8]) -> DriverResult<PosixResult> {
        self.unsupported(cmd)
    }

    fn ioctl2(
        &self,
        cmd: IoctlDescriptor,
        _buffer: &mut [u8],
        _inline_input: &[u8],
    ) -> DriverResult<PosixResult> {
        self.unsupported(cmd)
    }

    fn ioctl3(
        &self,
        cmd: IoctlDescriptor,
        _buffer: &mut [u8],
        _inline_output: &mut [u8],
    ) -> DriverResult<PosixResult> {
        self.unsupported(cmd)
    }
}
