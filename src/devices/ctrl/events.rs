//! Syncpoint event slots of `/dev/nvhost-ctrl`
//!
//! Each slot walks `Available/Signalled/Cancelled -> Waiting -> Signalling ->
//! Signalled` or `Waiting -> Cancelling -> Cancelled`. The slot table lock is
//! held by every guest-side operation; the host1x callback only touches the
//! slot's atomic state and its event.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BufMut};
use log::debug;
use serde::Serialize;

use crate::error::{DriverResult, NvDrvError};
use crate::event::KEvent;
use crate::host1x::{Host1x, WaiterHandle};
use crate::ioctl::IoctlData;
use crate::shared::SyncpointManager;
use crate::types::{Fence, PosixResult};

/// Number of syncpoint event slots per control fd
pub const SYNCPOINT_EVENT_COUNT: usize = 16;

/// Lifecycle of an allocated slot
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventState {
    /// Allocated but never waited on
    Available = 0,
    /// Armed on a fence, host1x waiter registered
    Waiting = 1,
    /// Cancel in progress
    Cancelling = 2,
    /// Wait was cancelled before the fence was reached
    Cancelled = 3,
    /// Host1x callback in progress
    Signalling = 4,
    /// Fence reached and event signalled
    Signalled = 5,
}

impl EventState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => EventState::Waiting,
            2 => EventState::Cancelling,
            3 => EventState::Cancelled,
            4 => EventState::Signalling,
            5 => EventState::Signalled,
            _ => EventState::Available,
        }
    }

    /// States that forbid reallocating or freeing the slot
    pub fn is_in_use(self) -> bool {
        matches!(
            self,
            EventState::Waiting | EventState::Cancelling | EventState::Signalling
        )
    }
}

/// Slot index and syncpoint id packed for the guest
///
/// Two layouts coexist:
/// * single: slot in bits 0..16 (low nibble), syncpoint id in bits 4..32
/// * allocated: slot in bits 0..4, syncpoint id in bits 16..28, flag in bit 28
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncpointEventValue(pub u32);

impl SyncpointEventValue {
    const EVENT_ALLOCATED: u32 = 1 << 28;

    /// Value returned by a wait that allocated its slot
    pub fn allocated(slot: u32, syncpoint_id: u32) -> Self {
        Self(((syncpoint_id & 0xFFF) << 16) | Self::EVENT_ALLOCATED | slot)
    }

    /// Value returned by a wait on a caller-chosen slot
    pub fn single(slot: u32, syncpoint_id: u32) -> Self {
        Self(((syncpoint_id & 0x0FFF_FFFF) << 4) | slot)
    }

    /// Value as written to the guest
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Slot in the single layout, low 16 bits
    pub fn slot(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// Slot in the allocated layout, low 4 bits
    pub fn partial_slot(self) -> u32 {
        self.0 & 0xF
    }

    /// Syncpoint id in the single layout
    pub fn syncpoint_id(self) -> u32 {
        self.0 >> 4
    }

    /// Syncpoint id in the allocated layout
    pub fn syncpoint_id_for_allocation(self) -> u32 {
        (self.0 >> 16) & 0xFFF
    }

    /// Whether the value uses the allocated layout
    pub fn event_allocated(self) -> bool {
        self.0 & Self::EVENT_ALLOCATED != 0
    }
}

impl IoctlData for SyncpointEventValue {
    const SIZE: usize = 4;

    fn decode(mut buf: &[u8]) -> Self {
        Self(buf.get_u32_le())
    }

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.0);
    }
}

/// How a wait picks its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSelector {
    /// Find or recycle a slot for the fence's syncpoint
    Allocate,
    /// Use a slot previously set up with `SyncpointAllocateEvent`
    Slot(u32),
}

/// State of one arm cycle of a slot, held by that cycle's host1x callback
struct SlotShared {
    state: AtomicU8,
    event: Arc<KEvent>,
}

impl SlotShared {
    fn state(&self) -> EventState {
        EventState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn store(&self, state: EventState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: EventState, to: EventState) -> Result<(), EventState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(EventState::from_raw)
    }

    /// Runs on the host1x thread once the fence is reached
    fn signal(&self) {
        // A cancel that got in first owns the slot, the event must stay unsignalled
        if self.transition(EventState::Waiting, EventState::Signalling).is_ok() {
            self.event.signal();
            self.store(EventState::Signalled);
        }
    }
}

struct SyncpointEvent {
    fence: Option<Fence>,
    waiter: Option<WaiterHandle>,
    shared: Arc<SlotShared>,
}

impl SyncpointEvent {
    fn new() -> Self {
        Self {
            fence: None,
            waiter: None,
            shared: Arc::new(SlotShared {
                state: AtomicU8::new(EventState::Available as u8),
                event: Arc::new(KEvent::new(false)),
            }),
        }
    }

    fn is_in_use(&self) -> bool {
        self.shared.state().is_in_use()
    }

    fn is_bound_to(&self, syncpoint_id: u32) -> bool {
        self.fence.is_some_and(|fence| fence.id == syncpoint_id)
    }

    fn register_waiter(&mut self, host1x: &dyn Host1x, fence: Fence) {
        self.fence = Some(fence);
        self.shared.event.reset_signal();
        // Fresh state per arm, a callback left over from an earlier cycle only
        // sees its own finished state
        self.shared = Arc::new(SlotShared {
            state: AtomicU8::new(EventState::Waiting as u8),
            event: Arc::clone(&self.shared.event),
        });

        let shared = Arc::clone(&self.shared);
        self.waiter = Some(host1x.register_waiter(
            fence.id,
            fence.value,
            Box::new(move || shared.signal()),
        ));
    }
}

type Slots = [Option<SyncpointEvent>; SYNCPOINT_EVENT_COUNT];

/// Fixed table of syncpoint event slots
pub struct SyncpointEvents {
    slots: Mutex<Slots>,
}

impl Default for SyncpointEvents {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Default::default()),
        }
    }
}

impl SyncpointEvents {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick a slot for a wait on `syncpoint_id`
    ///
    /// Prefers an idle slot already bound to the syncpoint, then an empty
    /// slot, then any idle slot.
    fn find_free_slot(slots: &mut Slots, syncpoint_id: u32) -> DriverResult<usize> {
        let mut empty = None;
        let mut idle = None;

        for (index, slot) in slots.iter().enumerate() {
            match slot {
                Some(event) if !event.is_in_use() => {
                    if event.is_bound_to(syncpoint_id) {
                        return Ok(index);
                    }
                    idle.get_or_insert(index);
                }
                Some(_) => {}
                None => {
                    empty.get_or_insert(index);
                }
            }
        }

        if let Some(index) = empty {
            slots[index] = Some(SyncpointEvent::new());
            return Ok(index);
        }
        idle.ok_or(NvDrvError::SyncpointEventsExhausted)
    }

    /// Wait for `fence`, registering a host1x waiter when it has not passed yet
    ///
    /// On `Success` `value` holds the current syncpoint value, on a registered
    /// wait it holds the packed slot for `QueryEvent`.
    pub fn wait(
        &self,
        syncpoints: &SyncpointManager,
        fence: Fence,
        timeout: i32,
        value: &mut SyncpointEventValue,
        selector: SlotSelector,
    ) -> DriverResult<PosixResult> {
        if !syncpoints.is_valid(fence.id) {
            return Ok(PosixResult::InvalidArgument);
        }

        if syncpoints.has_syncpoint_expired(fence.id, fence.value) {
            *value = SyncpointEventValue(syncpoints.read_syncpoint_min_value(fence.id));
            return Ok(PosixResult::Success);
        }

        let min = syncpoints.update_min(fence.id);
        if syncpoints.has_syncpoint_expired(fence.id, fence.value) {
            *value = SyncpointEventValue(min);
            return Ok(PosixResult::Success);
        }

        if timeout == 0 {
            return Ok(PosixResult::TryAgain);
        }

        let mut slots = self.lock();
        let slot = match selector {
            SlotSelector::Allocate => {
                *value = SyncpointEventValue(0);
                Self::find_free_slot(&mut slots, fence.id)?
            }
            SlotSelector::Slot(slot) => slot as usize,
        };

        let Some(event) = slots.get_mut(slot).and_then(Option::as_mut) else {
            return Ok(PosixResult::InvalidArgument);
        };
        if event.is_in_use() {
            return Ok(PosixResult::InvalidArgument);
        }

        debug!(
            "Waiting on syncpoint event: {} with fence: ({}, {})",
            slot, fence.id, fence.value
        );
        event.register_waiter(syncpoints.host1x().as_ref(), fence);

        *value = match selector {
            SlotSelector::Allocate => SyncpointEventValue::allocated(slot as u32, fence.id),
            SlotSelector::Slot(_) => SyncpointEventValue::single(slot as u32, fence.id),
        };
        Ok(PosixResult::TryAgain)
    }

    /// Cancel a pending wait and leave the slot `Cancelled` and unsignalled
    pub fn clear_wait(
        &self,
        syncpoints: &SyncpointManager,
        value: SyncpointEventValue,
    ) -> PosixResult {
        let slot = value.slot() as usize;
        if slot >= SYNCPOINT_EVENT_COUNT {
            return PosixResult::InvalidArgument;
        }

        let mut slots = self.lock();
        let Some(event) = slots[slot].as_mut() else {
            return PosixResult::InvalidArgument;
        };

        match event
            .shared
            .transition(EventState::Waiting, EventState::Cancelling)
        {
            Ok(()) => {
                debug!("Cancelling waiting syncpoint event: {}", slot);
                if let (Some(fence), Some(waiter)) = (event.fence, event.waiter.take()) {
                    syncpoints.host1x().deregister_waiter(fence.id, waiter);
                    syncpoints.update_min(fence.id);
                }
            }
            Err(EventState::Signalling) => {
                // The callback is mid-signal, let it finish before resetting
                while event.shared.state() == EventState::Signalling {
                    std::hint::spin_loop();
                }
            }
            Err(_) => {}
        }

        event.shared.store(EventState::Cancelled);
        event.shared.event.reset_signal();
        PosixResult::Success
    }

    fn free_locked(slots: &mut Slots, slot: usize) -> PosixResult {
        let Some(entry) = slots.get_mut(slot) else {
            return PosixResult::InvalidArgument;
        };
        match entry {
            None => PosixResult::Success,
            Some(event) if event.is_in_use() => PosixResult::Busy,
            Some(_) => {
                *entry = None;
                PosixResult::Success
            }
        }
    }

    /// (Re)create the event object of `slot`
    pub fn allocate(&self, slot: u32) -> PosixResult {
        debug!("Registering syncpoint event: {}", slot);
        let slot = slot as usize;
        if slot >= SYNCPOINT_EVENT_COUNT {
            return PosixResult::InvalidArgument;
        }

        let mut slots = self.lock();
        if slots[slot].is_some() {
            let result = Self::free_locked(&mut slots, slot);
            if result != PosixResult::Success {
                return result;
            }
        }
        slots[slot] = Some(SyncpointEvent::new());
        PosixResult::Success
    }

    /// Destroy the event object of `slot` unless it is in use
    pub fn free(&self, slot: u32) -> PosixResult {
        Self::free_locked(&mut self.lock(), slot as usize)
    }

    /// Free every slot set in `bitmask`, reporting the last failure
    pub fn free_batch(&self, bitmask: u64) -> PosixResult {
        let mut slots = self.lock();
        let mut result = PosixResult::Success;
        for slot in 0..u64::BITS as usize {
            if bitmask & (1u64 << slot) != 0 {
                let freed = Self::free_locked(&mut slots, slot);
                if freed != PosixResult::Success {
                    result = freed;
                }
            }
        }
        result
    }

    /// Event for a packed value returned by a wait
    pub fn query(&self, raw: u32) -> Option<Arc<KEvent>> {
        let value = SyncpointEventValue(raw);
        let (slot, syncpoint_id) = if value.event_allocated() {
            (value.partial_slot(), value.syncpoint_id_for_allocation())
        } else {
            (value.slot(), value.syncpoint_id())
        };

        let slots = self.lock();
        let event = slots.get(slot as usize)?.as_ref()?;
        if event.is_bound_to(syncpoint_id) {
            Some(Arc::clone(&event.shared.event))
        } else {
            None
        }
    }

    /// Current state of `slot`, `None` when it holds no event object
    pub fn state(&self, slot: usize) -> Option<EventState> {
        self.lock()
            .get(slot)?
            .as_ref()
            .map(|event| event.shared.state())
    }

    /// Fence the slot was last armed with
    pub fn bound_fence(&self, slot: usize) -> Option<Fence> {
        self.lock().get(slot)?.as_ref()?.fence
    }
}
