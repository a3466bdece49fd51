//! Cached view of syncpoint progress

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::host1x::{has_reached, Host1x};

/// Last known minimum value of every syncpoint
///
/// Reads are lock-free and may lag the hardware; they never run ahead of it.
pub struct SyncpointManager {
    host1x: Arc<dyn Host1x>,
    counter_min: Vec<AtomicU32>,
}

impl SyncpointManager {
    /// Cache for `count` syncpoints, all starting at zero
    pub fn new(host1x: Arc<dyn Host1x>, count: u32) -> Self {
        Self {
            host1x,
            counter_min: (0..count).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Number of tracked syncpoints
    pub fn count(&self) -> u32 {
        self.counter_min.len() as u32
    }

    /// Whether `id` names a tracked syncpoint
    pub fn is_valid(&self, id: u32) -> bool {
        id < self.count()
    }

    /// Collaborator the cache reads from
    pub fn host1x(&self) -> &Arc<dyn Host1x> {
        &self.host1x
    }

    /// Checks the cached value only, call [`Self::update_min`] for a fresh answer
    pub fn has_syncpoint_expired(&self, id: u32, threshold: u32) -> bool {
        self.counter_min
            .get(id as usize)
            .is_some_and(|min| has_reached(min.load(Ordering::Acquire), threshold))
    }

    /// Cached value, zero for unknown ids
    pub fn read_syncpoint_min_value(&self, id: u32) -> u32 {
        self.counter_min
            .get(id as usize)
            .map_or(0, |min| min.load(Ordering::Acquire))
    }

    /// Resynchronise the cached value from host1x and return it
    pub fn update_min(&self, id: u32) -> u32 {
        let value = self.host1x.load(id);
        if let Some(min) = self.counter_min.get(id as usize) {
            min.store(value, Ordering::Release);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host1x::SoftHost1x;

    #[test]
    fn test_cache_lags_until_updated() {
        let host1x = Arc::new(SoftHost1x::default());
        let manager = SyncpointManager::new(host1x.clone(), 192);

        host1x.increment_by(7, 5);
        assert!(!manager.has_syncpoint_expired(7, 5));
        assert_eq!(manager.read_syncpoint_min_value(7), 0);

        assert_eq!(manager.update_min(7), 5);
        assert!(manager.has_syncpoint_expired(7, 5));
        assert!(!manager.has_syncpoint_expired(7, 6));
    }

    #[test]
    fn test_invalid_ids() {
        let manager = SyncpointManager::new(Arc::new(SoftHost1x::default()), 4);
        assert!(!manager.is_valid(4));
        assert!(!manager.has_syncpoint_expired(100, 0));
        assert_eq!(manager.read_syncpoint_min_value(100), 0);
    }
}
