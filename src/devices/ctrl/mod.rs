//! `/dev/nvhost-ctrl`: syncpoint waits and their events

mod events;

pub use events::{
    EventState, SlotSelector, SyncpointEventValue, SyncpointEvents, SYNCPOINT_EVENT_COUNT,
};

use std::sync::Arc;

use log::debug;

use crate::devices::NvDevice;
use crate::error::DriverResult;
use crate::event::KEvent;
use crate::ioctl::{ArgSlot, Args, IoctlDescriptor, IoctlEntry, IoctlTable};
use crate::shared::Core;
use crate::types::{Fence, PosixResult, SessionContext};

const CTRL_MAGIC: i8 = 0x00;

/// Read a driver configuration string, always refused
pub const GET_CONFIG: IoctlDescriptor = IoctlDescriptor::inout(0x183, CTRL_MAGIC, 0x1B);
/// Cancel the wait registered on a slot
pub const SYNCPOINT_CLEAR_EVENT_WAIT: IoctlDescriptor = IoctlDescriptor::inout(0x4, CTRL_MAGIC, 0x1C);
/// Wait on a fence, allocating a slot
pub const SYNCPOINT_WAIT_EVENT: IoctlDescriptor = IoctlDescriptor::inout(0x10, CTRL_MAGIC, 0x1D);
/// Wait on a fence using a caller-allocated slot
pub const SYNCPOINT_WAIT_EVENT_SINGLE: IoctlDescriptor =
    IoctlDescriptor::inout(0x10, CTRL_MAGIC, 0x1E);
/// Create the event object of a slot
pub const SYNCPOINT_ALLOCATE_EVENT: IoctlDescriptor = IoctlDescriptor::inout(0x4, CTRL_MAGIC, 0x1F);
/// Destroy the event object of a slot
pub const SYNCPOINT_FREE_EVENT: IoctlDescriptor = IoctlDescriptor::inout(0x4, CTRL_MAGIC, 0x20);
/// Destroy every slot in a bitmask
pub const SYNCPOINT_FREE_EVENT_BATCH: IoctlDescriptor =
    IoctlDescriptor::inout(0x8, CTRL_MAGIC, 0x21);

const WAIT_EVENT_ARGS: &[ArgSlot] = &[
    ArgSlot::input::<Fence>(),
    ArgSlot::input::<i32>(),
    ArgSlot::inout::<SyncpointEventValue>(),
];
const CLEAR_EVENT_WAIT_ARGS: &[ArgSlot] = &[ArgSlot::input::<SyncpointEventValue>()];
const SLOT_ARGS: &[ArgSlot] = &[ArgSlot::input::<u32>()];
const BITMASK_ARGS: &[ArgSlot] = &[ArgSlot::input::<u64>()];

static CTRL_ENTRIES: [IoctlEntry<Ctrl>; 7] = [
    IoctlEntry::fixed(GET_CONFIG, "GetConfig", PosixResult::InvalidArgument),
    IoctlEntry::handler(
        SYNCPOINT_CLEAR_EVENT_WAIT,
        "SyncpointClearEventWait",
        CLEAR_EVENT_WAIT_ARGS,
        Ctrl::syncpoint_clear_event_wait,
    ),
    IoctlEntry::handler(
        SYNCPOINT_WAIT_EVENT,
        "SyncpointWaitEvent",
        WAIT_EVENT_ARGS,
        Ctrl::syncpoint_wait_event,
    ),
    IoctlEntry::handler(
        SYNCPOINT_WAIT_EVENT_SINGLE,
        "SyncpointWaitEventSingle",
        WAIT_EVENT_ARGS,
        Ctrl::syncpoint_wait_event_single,
    ),
    IoctlEntry::handler(
        SYNCPOINT_ALLOCATE_EVENT,
        "SyncpointAllocateEvent",
        SLOT_ARGS,
        Ctrl::syncpoint_allocate_event,
    ),
    IoctlEntry::handler(
        SYNCPOINT_FREE_EVENT,
        "SyncpointFreeEvent",
        SLOT_ARGS,
        Ctrl::syncpoint_free_event,
    ),
    IoctlEntry::handler(
        SYNCPOINT_FREE_EVENT_BATCH,
        "SyncpointFreeEventBatch",
        BITMASK_ARGS,
        Ctrl::syncpoint_free_event_batch,
    ),
];

/// Command table of `/dev/nvhost-ctrl`
pub static CTRL_IOCTLS: IoctlTable<Ctrl> = IoctlTable::new(&CTRL_ENTRIES);

/// Control device of a session, owns its syncpoint event slots
pub struct Ctrl {
    core: Arc<Core>,
    ctx: SessionContext,
    events: SyncpointEvents,
}

impl Ctrl {
    /// Control device with an empty event table
    pub fn new(core: Arc<Core>, ctx: SessionContext) -> Self {
        Self {
            core,
            ctx,
            events: SyncpointEvents::default(),
        }
    }

    /// Session the device was opened by
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Syncpoint event slots of this fd
    pub fn events(&self) -> &SyncpointEvents {
        &self.events
    }

    fn wait_event(&self, args: &mut Args<'_>, allocate: bool) -> DriverResult<PosixResult> {
        let fence = args.input::<Fence>()?;
        let timeout = args.input::<i32>()?;
        let mut slot = args.inout::<SyncpointEventValue>()?;

        let mut value = slot.get();
        let selector = if allocate {
            SlotSelector::Allocate
        } else {
            SlotSelector::Slot(value.raw())
        };

        let result = self.events.wait(
            &self.core.syncpoint_manager,
            fence,
            timeout,
            &mut value,
            selector,
        )?;
        slot.set(value);
        Ok(result)
    }

    fn syncpoint_wait_event(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        self.wait_event(args, true)
    }

    fn syncpoint_wait_event_single(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        self.wait_event(args, false)
    }

    fn syncpoint_clear_event_wait(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let value = args.input::<SyncpointEventValue>()?;
        debug!("Clearing syncpoint event wait: 0x{:X}", value.raw());
        Ok(self.events.clear_wait(&self.core.syncpoint_manager, value))
    }

    fn syncpoint_allocate_event(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let slot = args.input::<u32>()?;
        Ok(self.events.allocate(slot))
    }

    fn syncpoint_free_event(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let slot = args.input::<u32>()?;
        debug!("Freeing syncpoint event: {}", slot);
        Ok(self.events.free(slot))
    }

    fn syncpoint_free_event_batch(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let bitmask = args.input::<u64>()?;
        debug!("Freeing syncpoint event batch: 0x{:X}", bitmask);
        Ok(self.events.free_batch(bitmask))
    }
}

impl NvDevice for Ctrl {
    fn name(&self) -> &'static str {
        "nvhost-ctrl"
    }

    fn ioctl(&self, cmd: IoctlDescriptor, buffer: &mut [u8]) -> DriverResult<PosixResult> {
        CTRL_IOCTLS.dispatch(self, cmd, buffer, self.core.config.strict_decode)
    }

    fn query_event(&self, event_id: u32) -> Option<Arc<KEvent>> {
        self.events.query(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::error::NvDrvError;
    use crate::host1x::SoftHost1x;
    use crate::ioctl::IoctlData;

    fn ctrl() -> (Arc<SoftHost1x>, Ctrl) {
        let host1x = Arc::new(SoftHost1x::default());
        let core = Arc::new(Core::new(DriverConfig::default(), host1x.clone()));
        (host1x, Ctrl::new(core, SessionContext::application()))
    }

    fn wait_buffer(fence: Fence, timeout: i32, value: u32) -> [u8; 0x10] {
        let mut buffer = [0u8; 0x10];
        fence.encode(&mut buffer[0..8]);
        timeout.encode(&mut buffer[8..12]);
        value.encode(&mut buffer[12..16]);
        buffer
    }

    fn returned_value(buffer: &[u8]) -> u32 {
        u32::decode(&buffer[12..16])
    }

    #[test]
    fn test_table_schemas_match_descriptors() {
        assert!(CTRL_IOCTLS.mismatched_entries().is_empty());
        assert_eq!(CTRL_IOCTLS.entries().len(), 7);
    }

    #[test]
    fn test_get_config_is_rejected() {
        let (_host1x, ctrl) = ctrl();
        let mut buffer = vec![0u8; 0x183];
        let result = ctrl.ioctl(GET_CONFIG, &mut buffer).unwrap();
        assert_eq!(result, PosixResult::InvalidArgument);
    }

    #[test]
    fn test_wait_then_query_event() {
        let (host1x, ctrl) = ctrl();
        host1x.increment_by(3, 5);

        let mut buffer = wait_buffer(Fence::new(3, 10), 100, 0);
        let result = ctrl.ioctl(SYNCPOINT_WAIT_EVENT, &mut buffer).unwrap();
        assert_eq!(result, PosixResult::TryAgain);

        let value = SyncpointEventValue(returned_value(&buffer));
        assert_eq!(value, SyncpointEventValue::allocated(0, 3));

        let first = ctrl.query_event(value.raw()).unwrap();
        let second = ctrl.query_event(value.raw()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        host1x.increment_by(3, 5);
        assert!(first.is_signalled());
    }

    #[test]
    fn test_wait_on_expired_fence_returns_value() {
        let (host1x, ctrl) = ctrl();
        host1x.increment_by(1, 20);
        let mut buffer = wait_buffer(Fence::new(1, 10), 100, 0);
        let result = ctrl.ioctl(SYNCPOINT_WAIT_EVENT_SINGLE, &mut buffer).unwrap();
        assert_eq!(result, PosixResult::Success);
        assert_eq!(returned_value(&buffer), 20);
    }

    #[test]
    fn test_single_wait_and_clear() {
        let (_host1x, ctrl) = ctrl();
        let mut buffer = 4u32.to_le_bytes();
        assert_eq!(
            ctrl.ioctl(SYNCPOINT_ALLOCATE_EVENT, &mut buffer).unwrap(),
            PosixResult::Success
        );

        let mut buffer = wait_buffer(Fence::new(2, 1), -1, 4);
        let result = ctrl.ioctl(SYNCPOINT_WAIT_EVENT_SINGLE, &mut buffer).unwrap();
        assert_eq!(result, PosixResult::TryAgain);
        assert_eq!(returned_value(&buffer), SyncpointEventValue::single(4, 2).raw());

        let mut buffer = 4u32.to_le_bytes();
        assert_eq!(
            ctrl.ioctl(SYNCPOINT_FREE_EVENT, &mut buffer).unwrap(),
            PosixResult::Busy
        );

        // Cancellation takes the bare slot index
        let mut buffer = 4u32.to_le_bytes();
        assert_eq!(
            ctrl.ioctl(SYNCPOINT_CLEAR_EVENT_WAIT, &mut buffer).unwrap(),
            PosixResult::Success
        );
        assert_eq!(ctrl.events().state(4), Some(EventState::Cancelled));

        let mut buffer = (1u64 << 4).to_le_bytes();
        assert_eq!(
            ctrl.ioctl(SYNCPOINT_FREE_EVENT_BATCH, &mut buffer).unwrap(),
            PosixResult::Success
        );
        assert_eq!(ctrl.events().state(4), None);
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let (_host1x, ctrl) = ctrl();
        for id in 0..SYNCPOINT_EVENT_COUNT as u32 {
            let mut buffer = wait_buffer(Fence::new(id, 1), 1, 0);
            ctrl.ioctl(SYNCPOINT_WAIT_EVENT, &mut buffer).unwrap();
        }
        let mut buffer = wait_buffer(Fence::new(50, 1), 1, 0);
        let err = ctrl.ioctl(SYNCPOINT_WAIT_EVENT, &mut buffer).unwrap_err();
        assert!(matches!(err, NvDrvError::SyncpointEventsExhausted));
        assert!(!err.is_guest_visible());
    }

    #[test]
    fn test_short_buffer_is_a_decode_error() {
        let (_host1x, ctrl) = ctrl();
        let mut buffer = [0u8; 8];
        let err = ctrl.ioctl(SYNCPOINT_WAIT_EVENT, &mut buffer).unwrap_err();
        assert!(err.is_guest_visible());
    }

    #[test]
    fn test_unknown_command() {
        let (_host1x, ctrl) = ctrl();
        let mut buffer = [0u8; 4];
        let unknown = IoctlDescriptor::inout(0x4, CTRL_MAGIC, 0x14);
        assert_eq!(
            ctrl.ioctl(unknown, &mut buffer).unwrap(),
            PosixResult::InappropriateIoctlForDevice
        );
    }
}
