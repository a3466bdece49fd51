//! Transport-facing entry points of an nvdrv session
//!
//! Every entry point returns `Err` only for emulator-side protocol
//! violations; the transport is expected to abort the session on those.
//! Anything the guest is allowed to observe comes back as an [`NvResult`].

use std::sync::Arc;

use log::{debug, warn};

use crate::config::DriverConfig;
use crate::devices::NvDevice;
use crate::driver::Driver;
use crate::error::{DriverResult, NvDrvError};
use crate::event::KEvent;
use crate::host1x::Host1x;
use crate::ioctl::IoctlDescriptor;
use crate::types::{FileDescriptor, NvResult, PosixResult, SessionContext};

/// Map a device result to what the guest sees
fn guest_result(result: DriverResult<PosixResult>) -> DriverResult<NvResult> {
    match result {
        Ok(result) => Ok(result.into()),
        Err(NvDrvError::Decode(err)) => {
            debug!("Ioctl arguments rejected: {}", err);
            Ok(NvResult::InvalidSize)
        }
        Err(err) => Err(err),
    }
}

/// Size preconditions of the single shared buffer of Ioctl2 and Ioctl3
fn check_shared_buffer(cmd: IoctlDescriptor, buffer: &[u8]) -> Option<NvResult> {
    if (cmd.input || cmd.output) && buffer.len() < cmd.size as usize {
        warn!("Buffer of 0x{:X} bytes is too small for {}", buffer.len(), cmd);
        return Some(NvResult::InvalidSize);
    }
    None
}

/// One client session of the nvdrv service
///
/// Sessions sharing a [`Driver`] share its fd space.
pub struct NvDrvService {
    driver: Arc<Driver>,
    ctx: SessionContext,
    aruid: Option<u64>,
}

impl NvDrvService {
    /// Session with its own driver instance
    pub fn new(config: DriverConfig, host1x: Arc<dyn Host1x>, ctx: SessionContext) -> Self {
        Self::with_driver(Arc::new(Driver::new(config, host1x)), ctx)
    }

    /// Session sharing an existing driver
    pub fn with_driver(driver: Arc<Driver>, ctx: SessionContext) -> Self {
        Self {
            driver,
            ctx,
            aruid: None,
        }
    }

    /// Driver backing this session
    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    /// Permissions of this session
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Applet resource user id recorded by `set_aruid`
    pub fn aruid(&self) -> Option<u64> {
        self.aruid
    }

    /// Open `path`, returning the new fd or `INVALID_FILE_DESCRIPTOR`
    ///
    /// The fd counter only advances on success.
    pub fn open(&self, path: &str) -> (FileDescriptor, NvResult) {
        self.driver.open(path, &self.ctx)
    }

    /// Run `cmd` on `fd` with the transport's input and output buffers
    ///
    /// For commands that both read and write, the input is copied into the
    /// output buffer and the device works on that single buffer.
    pub fn ioctl(
        &self,
        fd: FileDescriptor,
        cmd: IoctlDescriptor,
        input: Option<&[u8]>,
        output: Option<&mut [u8]>,
    ) -> DriverResult<NvResult> {
        let size = cmd.size as usize;
        let input_len = input.map_or(0, <[u8]>::len);
        let output_len = output.as_deref().map_or(0, <[u8]>::len);

        if cmd.input && input_len < size {
            return Ok(NvResult::InvalidSize);
        }
        if cmd.output && output_len < size {
            return Ok(NvResult::InvalidSize);
        }
        if cmd.input && cmd.output && output_len < input_len {
            return Ok(NvResult::InvalidSize);
        }

        let device = self.driver.get_device(fd)?;

        let result = match (input, output) {
            (Some(input), Some(output)) if cmd.input && cmd.output => {
                output[..size].copy_from_slice(&input[..size]);
                device.ioctl(cmd, output)
            }
            (Some(input), _) if !cmd.output => device.ioctl(cmd, &mut input.to_vec()),
            (_, Some(output)) => device.ioctl(cmd, output),
            (Some(input), None) => device.ioctl(cmd, &mut input.to_vec()),
            (None, None) => return Err(NvDrvError::MissingBuffers { size }),
        };
        guest_result(result)
    }

    /// Ioctl with an extra inline input buffer
    pub fn ioctl2(
        &self,
        fd: FileDescriptor,
        cmd: IoctlDescriptor,
        buffer: &mut [u8],
        inline_input: &[u8],
    ) -> DriverResult<NvResult> {
        if let Some(result) = check_shared_buffer(cmd, buffer) {
            return Ok(result);
        }
        let device = self.driver.get_device(fd)?;
        guest_result(device.ioctl2(cmd.command_id(), buffer, inline_input))
    }

    /// Ioctl with an extra inline output buffer
    pub fn ioctl3(
        &self,
        fd: FileDescriptor,
        cmd: IoctlDescriptor,
        buffer: &mut [u8],
        inline_output: &mut [u8],
    ) -> DriverResult<NvResult> {
        if let Some(result) = check_shared_buffer(cmd, buffer) {
            return Ok(result);
        }
        let device = self.driver.get_device(fd)?;
        guest_result(device.ioctl3(cmd.command_id(), buffer, inline_output))
    }

    /// Release `fd`; unknown fds only log
    pub fn close(&self, fd: FileDescriptor) -> NvResult {
        self.driver.close_device(fd);
        NvResult::Success
    }

    /// Event `event_id` of the device on `fd`
    ///
    /// The event is shared with the device, repeated queries return the same
    /// object.
    pub fn query_event(
        &self,
        fd: FileDescriptor,
        event_id: u32,
    ) -> DriverResult<(NvResult, Option<Arc<KEvent>>)> {
        let device = self.driver.get_device(fd)?;
        match device.query_event(event_id) {
            Some(event) => {
                debug!("FD: {}, Event ID: 0x{:X}", fd, event_id);
                Ok((NvResult::Success, Some(event)))
            }
            None => {
                warn!("FD: {} has no event 0x{:X}", fd, event_id);
                Ok((NvResult::BadValue, None))
            }
        }
    }

    /// Accepted without effect
    pub fn initialize(&self) -> NvResult {
        NvResult::Success
    }

    /// Record the applet resource user id
    pub fn set_aruid(&mut self, aruid: u64) -> NvResult {
        self.aruid = Some(aruid);
        NvResult::Success
    }
}
