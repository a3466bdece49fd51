//! GPU progress collaborator: syncpoint counters and their waiters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::warn;

/// Number of syncpoints exposed by the host1x block
pub const SYNCPOINT_COUNT: u32 = 192;

/// Cancellation token for a registered waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterHandle(pub u64);

/// Callback fired once a syncpoint reaches its threshold
pub type WaiterCallback = Box<dyn FnOnce() + Send + 'static>;

/// Whether a counter at `value` has passed `threshold`, tolerating wraparound
pub fn has_reached(value: u32, threshold: u32) -> bool {
    value.wrapping_sub(threshold) as i32 >= 0
}

/// Ground truth for syncpoint progress
///
/// Waiter callbacks may run on any thread, including the caller of
/// [`Host1x::register_waiter`] when the threshold has already passed.
#[cfg_attr(test, mockall::automock)]
pub trait Host1x: Send + Sync {
    /// Number of syncpoints the block provides
    fn syncpoint_count(&self) -> u32;

    /// Current counter value
    fn load(&self, id: u32) -> u32;

    /// Arrange for `callback` to run once syncpoint `id` reaches `threshold`
    fn register_waiter(&self, id: u32, threshold: u32, callback: WaiterCallback) -> WaiterHandle;

    /// Drop a waiter that has not fired yet; unknown handles are ignored
    fn deregister_waiter(&self, id: u32, handle: WaiterHandle);
}

struct Waiter {
    handle: WaiterHandle,
    threshold: u32,
    callback: WaiterCallback,
}

#[derive(Default)]
struct SoftSyncpoint {
    value: u32,
    waiters: Vec<Waiter>,
}

/// In-process syncpoint block, advanced explicitly by whoever plays the GPU
pub struct SoftHost1x {
    syncpoints: Vec<Mutex<SoftSyncpoint>>,
    next_handle: AtomicU64,
}

impl SoftHost1x {
    /// Block with `count` syncpoints, all at zero
    pub fn new(count: u32) -> Self {
        Self {
            syncpoints: (0..count).map(|_| Mutex::default()).collect(),
            next_handle: AtomicU64::new(1),
        }
    }

    fn syncpoint(&self, id: u32) -> Option<MutexGuard<'_, SoftSyncpoint>> {
        self.syncpoints
            .get(id as usize)
            .map(|syncpoint| syncpoint.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Advance syncpoint `id` by one, returns the new value
    pub fn increment(&self, id: u32) -> u32 {
        self.increment_by(id, 1)
    }

    /// Advance syncpoint `id` by `amount` and fire every waiter it satisfies
    ///
    /// Callbacks run on the calling thread after the syncpoint lock is released.
    pub fn increment_by(&self, id: u32, amount: u32) -> u32 {
        let Some(mut syncpoint) = self.syncpoint(id) else {
            warn!("Incrementing nonexistent syncpoint {}", id);
            return 0;
        };

        syncpoint.value = syncpoint.value.wrapping_add(amount);
        let value = syncpoint.value;

        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut syncpoint.waiters)
            .into_iter()
            .partition(|waiter| has_reached(value, waiter.threshold));
        syncpoint.waiters = pending;
        drop(syncpoint);

        for waiter in ready {
            (waiter.callback)();
        }
        value
    }

    /// Waiters on `id` that have not fired yet
    pub fn pending_waiters(&self, id: u32) -> usize {
        self.syncpoint(id).map_or(0, |syncpoint| syncpoint.waiters.len())
    }
}

impl Default for SoftHost1x {
    fn default() -> Self {
        Self::new(SYNCPOINT_COUNT)
    }
}

impl Host1x for SoftHost1x {
    fn syncpoint_count(&self) -> u32 {
        self.syncpoints.len() as u32
    }

    fn load(&self, id: u32) -> u32 {
        self.syncpoint(id).map_or(0, |syncpoint| syncpoint.value)
    }

    fn register_waiter(&self, id: u32, threshold: u32, callback: WaiterCallback) -> WaiterHandle {
        let handle = WaiterHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        let Some(mut syncpoint) = self.syncpoint(id) else {
            warn!("Waiter registered on nonexistent syncpoint {}", id);
            return handle;
        };

        if has_reached(syncpoint.value, threshold) {
            drop(syncpoint);
            callback();
        } else {
            syncpoint.waiters.push(Waiter {
                handle,
                threshold,
                callback,
            });
        }
        handle
    }

    fn deregister_waiter(&self, id: u32, handle: WaiterHandle) {
        if let Some(mut syncpoint) = self.syncpoint(id) {
            syncpoint.waiters.retain(|waiter| waiter.handle != handle);
        }
    }
}
