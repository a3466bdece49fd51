//! Emulated `/dev/nv*` devices

/// `/dev/nvhost-ctrl` and its syncpoint events
pub mod ctrl;
/// Black-box host devices
pub mod host;
/// `/dev/nvmap` memory handles
pub mod nvmap;

pub use ctrl::{
    Ctrl, EventState, SlotSelector, SyncpointEventValue, SyncpointEvents, SYNCPOINT_EVENT_COUNT,
};
pub use host::HostDevice;
pub use nvmap::{HandleParameterType, NvMap};

use std::sync::Arc;

use serde::Serialize;

use crate::config::DriverConfig;
use crate::error::DriverResult;
use crate::event::KEvent;
use crate::ioctl::IoctlDescriptor;
use crate::shared::Core;
use crate::types::{PosixResult, SessionContext, SessionPermissions};

/// Operations every device exposes to the service
///
/// Only `ioctl` is mandatory; the other entry points default to unsupported.
pub trait NvDevice {
    /// Class name used in logs
    fn name(&self) -> &'static str;

    /// Run `cmd` on its argument buffer
    fn ioctl(&self, cmd: IoctlDescriptor, buffer: &mut [u8]) -> DriverResult<PosixResult>;

    /// Ioctl carrying an extra inline input buffer
    fn ioctl2(
        &self,
        _cmd: IoctlDescriptor,
        _buffer: &mut [u8],
        _inline_input: &[u8],
    ) -> DriverResult<PosixResult> {
        Ok(PosixResult::InappropriateIoctlForDevice)
    }

    /// Ioctl carrying an extra inline output buffer
    fn ioctl3(
        &self,
        _cmd: IoctlDescriptor,
        _buffer: &mut [u8],
        _inline_output: &mut [u8],
    ) -> DriverResult<PosixResult> {
        Ok(PosixResult::InappropriateIoctlForDevice)
    }

    /// Event the guest may wait on, identified by a device specific id
    fn query_event(&self, _event_id: u32) -> Option<Arc<KEvent>> {
        None
    }
}

/// Every device path the driver knows about
///
/// `/dev/nvhost-ctrl-gpu` is deliberately a black-box host device here rather
/// than another `/dev/nvhost-ctrl` instance: none of its GPU characteristics
/// commands are emulated, so it only carries the GPU gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceClass {
    /// `/dev/nvmap`
    NvMap,
    /// `/dev/nvhost-ctrl`
    Ctrl,
    /// `/dev/nvhost-as-gpu`
    AsGpu,
    /// `/dev/nvhost-ctrl-gpu`
    CtrlGpu,
    /// `/dev/nvhost-gpu`
    Gpu,
    /// `/dev/nvhost-vic`
    Vic,
    /// `/dev/nvhost-nvdec`
    NvDec,
    /// `/dev/nvhost-nvjpg`
    NvJpg,
}

impl DeviceClass {
    /// Path table in resolution order
    pub const ALL: [DeviceClass; 8] = [
        DeviceClass::NvMap,
        DeviceClass::Ctrl,
        DeviceClass::AsGpu,
        DeviceClass::CtrlGpu,
        DeviceClass::Gpu,
        DeviceClass::Vic,
        DeviceClass::NvDec,
        DeviceClass::NvJpg,
    ];

    /// Device node path
    pub fn path(self) -> &'static str {
        match self {
            DeviceClass::NvMap => "/dev/nvmap",
            DeviceClass::Ctrl => "/dev/nvhost-ctrl",
            DeviceClass::AsGpu => "/dev/nvhost-as-gpu",
            DeviceClass::CtrlGpu => "/dev/nvhost-ctrl-gpu",
            DeviceClass::Gpu => "/dev/nvhost-gpu",
            DeviceClass::Vic => "/dev/nvhost-vic",
            DeviceClass::NvDec => "/dev/nvhost-nvdec",
            DeviceClass::NvJpg => "/dev/nvhost-nvjpg",
        }
    }

    /// Case-sensitive lookup of a device path
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.path() == path)
    }

    /// Capability a session needs to open this class, `None` if always available
    pub fn required_permission(self, config: &DriverConfig) -> Option<SessionPermissions> {
        match self {
            DeviceClass::NvMap => None,
            DeviceClass::Ctrl if config.ctrl_requires_gpu => Some(SessionPermissions::ACCESS_GPU),
            DeviceClass::Ctrl => None,
            DeviceClass::AsGpu | DeviceClass::CtrlGpu | DeviceClass::Gpu => {
                Some(SessionPermissions::ACCESS_GPU)
            }
            DeviceClass::Vic => Some(SessionPermissions::ACCESS_VIC),
            DeviceClass::NvDec => Some(SessionPermissions::ACCESS_VIDEO_DECODER),
            DeviceClass::NvJpg => Some(SessionPermissions::ACCESS_JPEG),
        }
    }

    /// Whether `ctx` may open this class
    pub fn is_permitted(self, config: &DriverConfig, ctx: &SessionContext) -> bool {
        self.required_permission(config)
            .map_or(true, |permission| ctx.perms.contains(permission))
    }

    /// Build a device instance of this class
    pub fn construct(self, core: Arc<Core>, ctx: SessionContext) -> Device {
        match self {
            DeviceClass::NvMap => Device::NvMap(NvMap::new(core, ctx)),
            DeviceClass::Ctrl => Device::Ctrl(Ctrl::new(core, ctx)),
            class => Device::Host(HostDevice::new(class, core, ctx)),
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Closed set of device implementations, selected by path at open time
pub enum Device {
    /// Memory handle device
    NvMap(NvMap),
    /// Syncpoint control device
    Ctrl(Ctrl),
    /// Any of the black-box host devices
    Host(HostDevice),
}

impl Device {
    fn inner(&self) -> &dyn NvDevice {
        match self {
            Device::NvMap(device) => device,
            Device::Ctrl(device) => device,
            Device::Host(device) => device,
        }
    }
}

impl NvDevice for Device {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn ioctl(&self, cmd: IoctlDescriptor, buffer: &mut [u8]) -> DriverResult<PosixResult> {
        self.inner().ioctl(cmd, buffer)
    }

    fn ioctl2(
        &self,
        cmd: IoctlDescriptor,
        buffer: &mut [u8],
        inline_input: &[u8],
    ) -> DriverResult<PosixResult> {
        self.inner().ioctl2(cmd, buffer, inline_input)
    }

    fn ioctl3(
        &self,
        cmd: IoctlDescriptor,
        buffer: &mut [u8],
        inline_output: &mut [u8],
    ) -> DriverResult<PosixResult> {
        self.inner().ioctl3(cmd, buffer, inline_output)
    }

    fn query_event(&self, event_id: u32) -> Option<Arc<KEvent>> {
        self.inner().query_event(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/dev/nvmap", Some(DeviceClass::NvMap))]
    #[case("/dev/nvhost-ctrl", Some(DeviceClass::Ctrl))]
    #[case("/dev/nvhost-ctrl-gpu", Some(DeviceClass::CtrlGpu))]
    #[case("/dev/nvhost-nvjpg", Some(DeviceClass::NvJpg))]
    #[case("/dev/NVMAP", None)]
    #[case("/dev/nvhost-dbg-gpu", None)]
    #[case("", None)]
    fn test_path_lookup(#[case] path: &str, #[case] expected: Option<DeviceClass>) {
        assert_eq!(DeviceClass::from_path(path), expected);
    }

    #[rstest]
    #[case(DeviceClass::NvMap, SessionPermissions::empty(), true)]
    #[case(DeviceClass::Ctrl, SessionPermissions::empty(), true)]
    #[case(DeviceClass::Gpu, SessionPermissions::empty(), false)]
    #[case(DeviceClass::Gpu, SessionPermissions::ACCESS_GPU, true)]
    #[case(DeviceClass::Vic, SessionPermissions::ACCESS_GPU, false)]
    #[case(DeviceClass::Vic, SessionPermissions::ACCESS_VIC, true)]
    #[case(DeviceClass::NvDec, SessionPermissions::ACCESS_VIDEO_DECODER, true)]
    #[case(DeviceClass::NvJpg, SessionPermissions::ACCESS_VIDEO_DECODER, false)]
    fn test_capability_gates(
        #[case] class: DeviceClass,
        #[case] perms: SessionPermissions,
        #[case] permitted: bool,
    ) {
        let config = DriverConfig::default();
        assert_eq!(
            class.is_permitted(&config, &SessionContext::new(perms)),
            permitted
        );
    }

    #[test]
    fn test_gated_ctrl_config() {
        let config = DriverConfig::gated_ctrl();
        let ctx = SessionContext::default();
        assert!(!DeviceClass::Ctrl.is_permitted(&config, &ctx));
        assert!(DeviceClass::Ctrl
            .is_permitted(&config, &SessionContext::new(SessionPermissions::ACCESS_GPU)));
    }

    #[test]
    fn test_ctrl_gpu_is_a_gated_host_device() {
        use crate::host1x::SoftHost1x;

        let config = DriverConfig::default();
        assert_eq!(
            DeviceClass::CtrlGpu.required_permission(&config),
            Some(SessionPermissions::ACCESS_GPU)
        );
        let core = Arc::new(Core::new(config, Arc::new(SoftHost1x::default())));
        let device = DeviceClass::CtrlGpu.construct(core, SessionContext::application());
        assert!(matches!(device, Device::Host(ref host) if host.class() == DeviceClass::CtrlGpu));
        assert_eq!(device.name(), "/dev/nvhost-ctrl-gpu");
    }

    #[test]
    fn test_paths_are_unique() {
        for (i, a) in DeviceClass::ALL.iter().enumerate() {
            for b in &DeviceClass::ALL[i + 1..] {
                assert_ne!(a.path(), b.path());
            }
        }
    }
}
