#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use nvdrv::devices::ctrl::{
        SYNCPOINT_ALLOCATE_EVENT, SYNCPOINT_CLEAR_EVENT_WAIT, SYNCPOINT_FREE_EVENT,
        SYNCPOINT_WAIT_EVENT, SYNCPOINT_WAIT_EVENT_SINGLE,
    };
    use nvdrv::devices::nvmap::{ALLOC, CREATE, FREE, GET_ID};
    use nvdrv::devices::{Device, EventState};
    use nvdrv::prelude::*;
    use nvdrv::INVALID_FILE_DESCRIPTOR;
    use pretty_assertions::assert_eq;

    fn session(perms: SessionPermissions) -> (Arc<SoftHost1x>, NvDrvService) {
        let host1x = Arc::new(SoftHost1x::default());
        let service = NvDrvService::new(
            DriverConfig::default(),
            host1x.clone(),
            SessionContext::new(perms),
        );
        (host1x, service)
    }

    fn inout(service: &NvDrvService, fd: i32, cmd: IoctlDescriptor, buffer: &mut [u8]) -> NvResult {
        let input = buffer.to_vec();
        service
            .ioctl(fd, cmd, Some(&input[..]), Some(buffer))
            .expect("ioctl must not be fatal")
    }

    fn wait_args(fence: Fence, timeout: i32, value: u32) -> [u8; 0x10] {
        let mut buffer = [0u8; 0x10];
        fence.encode(&mut buffer[0..8]);
        timeout.encode(&mut buffer[8..12]);
        value.encode(&mut buffer[12..16]);
        buffer
    }

    fn event_value(buffer: &[u8]) -> u32 {
        u32::decode(&buffer[12..16])
    }

    #[test]
    fn test_library_version() {
        assert!(!nvdrv::version().is_empty());
    }

    #[test]
    fn test_nvmap_opens_without_gpu_capability() {
        let (_host1x, service) = session(SessionPermissions::empty());
        assert_eq!(service.open("/dev/nvmap"), (0, NvResult::Success));
        assert_eq!(
            service.open("/dev/nvhost-gpu"),
            (INVALID_FILE_DESCRIPTOR, NvResult::FileOperationFailed)
        );
        assert_eq!(
            service.open("/dev/nvhost-vic"),
            (INVALID_FILE_DESCRIPTOR, NvResult::FileOperationFailed)
        );
        assert_eq!(service.open("/dev/nvhost-ctrl"), (1, NvResult::Success));
    }

    #[test]
    fn test_wait_event_scenario() {
        let (host1x, service) = session(SessionPermissions::ACCESS_GPU);
        host1x.increment_by(3, 5);
        let (fd, _) = service.open("/dev/nvhost-ctrl");

        let mut buffer = wait_args(Fence::new(3, 10), 100, 0);
        assert_eq!(inout(&service, fd, SYNCPOINT_WAIT_EVENT, &mut buffer), NvResult::Timeout);

        let value = SyncpointEventValue(event_value(&buffer));
        assert!(value.event_allocated());
        assert_eq!(value.syncpoint_id_for_allocation(), 3);

        let device = service.driver().get_device(fd).unwrap();
        let Device::Ctrl(ctrl) = device.as_ref() else {
            panic!("nvhost-ctrl opened as {}", device.name());
        };
        let slot = value.partial_slot() as usize;
        assert_eq!(ctrl.events().bound_fence(slot), Some(Fence::new(3, 10)));
        assert_eq!(ctrl.events().state(slot), Some(EventState::Waiting));

        let (result, first) = service.query_event(fd, value.raw()).unwrap();
        assert_eq!(result, NvResult::Success);
        let (_, second) = service.query_event(fd, value.raw()).unwrap();
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(Arc::ptr_eq(&first, &second));

        host1x.increment_by(3, 5);
        assert!(first.is_signalled());
        assert_eq!(ctrl.events().state(slot), Some(EventState::Signalled));
    }

    #[test]
    fn test_poll_does_not_touch_slots() {
        let (host1x, service) = session(SessionPermissions::ACCESS_GPU);
        host1x.increment_by(2, 1);
        let (fd, _) = service.open("/dev/nvhost-ctrl");

        let mut buffer = wait_args(Fence::new(2, 3), 0, 0x7);
        assert_eq!(inout(&service, fd, SYNCPOINT_WAIT_EVENT, &mut buffer), NvResult::Timeout);
        assert_eq!(event_value(&buffer), 0x7);
        assert_eq!(host1x.pending_waiters(2), 0);
    }

    #[test]
    fn test_signal_wakes_blocked_waiter() {
        let (host1x, service) = session(SessionPermissions::ACCESS_GPU);
        let (fd, _) = service.open("/dev/nvhost-ctrl");

        let mut buffer = wait_args(Fence::new(9, 3), -1, 0);
        assert_eq!(inout(&service, fd, SYNCPOINT_WAIT_EVENT, &mut buffer), NvResult::Timeout);
        let (_, event) = service.query_event(fd, event_value(&buffer)).unwrap();
        let event = event.unwrap();

        let gpu = thread::spawn(move || {
            for _ in 0..3 {
                host1x.increment(9);
            }
        });
        assert!(event.wait_timeout(Duration::from_secs(5)));
        gpu.join().unwrap();
    }

    #[test]
    fn test_allocated_slot_lifecycle() {
        let (host1x, service) = session(SessionPermissions::ACCESS_GPU);
        let (fd, _) = service.open("/dev/nvhost-ctrl");

        let mut slot = 2u32.to_le_bytes();
        assert_eq!(inout(&service, fd, SYNCPOINT_ALLOCATE_EVENT, &mut slot), NvResult::Success);

        let mut buffer = wait_args(Fence::new(4, 2), 50, 2);
        assert_eq!(
            inout(&service, fd, SYNCPOINT_WAIT_EVENT_SINGLE, &mut buffer),
            NvResult::Timeout
        );
        assert_eq!(event_value(&buffer), SyncpointEventValue::single(2, 4).raw());

        let mut slot = 2u32.to_le_bytes();
        assert_eq!(inout(&service, fd, SYNCPOINT_FREE_EVENT, &mut slot), NvResult::Busy);

        let mut slot = 2u32.to_le_bytes();
        assert_eq!(
            inout(&service, fd, SYNCPOINT_CLEAR_EVENT_WAIT, &mut slot),
            NvResult::Success
        );
        host1x.increment_by(4, 2);

        let device = service.driver().get_device(fd).unwrap();
        let Device::Ctrl(ctrl) = device.as_ref() else {
            panic!("nvhost-ctrl opened as {}", device.name());
        };
        assert_eq!(ctrl.events().state(2), Some(EventState::Cancelled));
        assert_eq!(host1x.pending_waiters(4), 0);

        let mut slot = 2u32.to_le_bytes();
        assert_eq!(inout(&service, fd, SYNCPOINT_FREE_EVENT, &mut slot), NvResult::Success);
    }

    #[test]
    fn test_nvmap_handle_roundtrip() {
        let (_host1x, service) = session(SessionPermissions::empty());
        let (fd, _) = service.open("/dev/nvmap");

        let mut create = [0u8; 8];
        0x3000u32.encode(&mut create[0..4]);
        assert_eq!(inout(&service, fd, CREATE, &mut create), NvResult::Success);
        let handle = u32::decode(&create[4..8]);

        let mut alloc = [0u8; 0x20];
        handle.encode(&mut alloc[0..4]);
        0x2_0000u32.encode(&mut alloc[12..16]);
        0x4000_0000u64.encode(&mut alloc[24..32]);
        assert_eq!(inout(&service, fd, ALLOC, &mut alloc), NvResult::Success);
        assert_eq!(u32::decode(&alloc[12..16]), 0x2_0000);

        let mut get_id = [0u8; 8];
        handle.encode(&mut get_id[4..8]);
        assert_eq!(inout(&service, fd, GET_ID, &mut get_id), NvResult::Success);
        assert_eq!(u32::decode(&get_id[0..4]), handle);

        let mut free = [0u8; 0x18];
        handle.encode(&mut free[0..4]);
        assert_eq!(inout(&service, fd, FREE, &mut free), NvResult::Success);
        assert_eq!(u64::decode(&free[8..16]), 0x4000_0000);
        assert_eq!(u32::decode(&free[16..20]), 0x3000);
    }

    #[test]
    fn test_host_devices_refuse_commands() {
        let (_host1x, service) = session(SessionPermissions::ACCESS_GPU);
        let (fd, _) = service.open("/dev/nvhost-as-gpu");
        let mut buffer = [0u8; 0x18];
        let cmd = IoctlDescriptor::inout(0x18, 0x41, 0x01);
        assert_eq!(inout(&service, fd, cmd, &mut buffer), NvResult::NotSupported);

        let mut inline = [0u8; 8];
        assert_eq!(
            service.ioctl3(fd, cmd, &mut buffer, &mut inline).unwrap(),
            NvResult::NotSupported
        );
    }

    #[test]
    fn test_closed_fd_is_fatal() {
        let (_host1x, service) = session(SessionPermissions::empty());
        let (fd, _) = service.open("/dev/nvmap");
        service.close(fd);

        let mut buffer = [0u8; 8];
        let err = service
            .ioctl(fd, CREATE, Some(&[0u8; 8][..]), Some(&mut buffer[..]))
            .unwrap_err();
        assert!(matches!(err, NvDrvError::ClosedFd(0)));
        assert!(!err.is_guest_visible());
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvdrv.json");
        std::fs::write(&path, r#"{ "fd_limit": 1, "ctrl_requires_gpu": true }"#).unwrap();

        let config = DriverConfig::from_json_file(&path).unwrap();
        let service = NvDrvService::new(
            config,
            Arc::new(SoftHost1x::default()),
            SessionContext::default(),
        );
        assert_eq!(
            service.open("/dev/nvhost-ctrl").1,
            NvResult::FileOperationFailed
        );
        assert_eq!(service.open("/dev/nvmap"), (0, NvResult::Success));
        assert_eq!(
            service.open("/dev/nvmap").1,
            NvResult::FileOperationFailed
        );
    }
}
