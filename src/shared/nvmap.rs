//! Opaque id-keyed table of nvmap buffer handles

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::types::PosixResult;

/// Guest-visible handle id
pub type HandleId = u32;

/// Page granularity all allocations are aligned to
pub const PAGE_SIZE: u32 = 0x1000;

/// Bookkeeping kept for one buffer handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NvMapHandle {
    /// Global handle id
    pub id: HandleId,
    /// Size requested at creation
    pub orig_size: u32,
    /// Size rounded up to the page size
    pub size: u32,
    /// Alignment requested at allocation
    pub align: u32,
    /// Heaps the allocation may come from
    pub heap_mask: u32,
    /// Allocation flags
    pub flags: u32,
    /// Memory kind
    pub kind: u8,
    /// Guest address backing the handle
    pub address: u64,
    /// Whether `Alloc` has run
    pub allocated: bool,
}

/// What a freed handle used to describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeInfo {
    /// Backing address
    pub address: u64,
    /// Handle size
    pub size: u32,
    /// Allocation flags
    pub flags: u32,
}

struct Handles {
    handles: BTreeMap<HandleId, NvMapHandle>,
    next_id: HandleId,
}

/// Handle table shared by every nvmap fd of a session
pub struct NvMapCore {
    inner: Mutex<Handles>,
}

/// Ids are handed out in steps of four, zero is never valid
const HANDLE_ID_INCREMENT: HandleId = 4;

impl Default for NvMapCore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Handles {
                handles: BTreeMap::new(),
                next_id: HANDLE_ID_INCREMENT,
            }),
        }
    }
}

impl NvMapCore {
    fn lock(&self) -> MutexGuard<'_, Handles> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an unallocated handle of `size` bytes
    pub fn create(&self, size: u32) -> Result<HandleId, PosixResult> {
        if size == 0 {
            return Err(PosixResult::InvalidArgument);
        }
        let aligned = size
            .checked_add(PAGE_SIZE - 1)
            .ok_or(PosixResult::InvalidArgument)?
            & !(PAGE_SIZE - 1);

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id = id.wrapping_add(HANDLE_ID_INCREMENT);
        inner.handles.insert(
            id,
            NvMapHandle {
                id,
                orig_size: size,
                size: aligned,
                align: PAGE_SIZE,
                heap_mask: 0,
                flags: 0,
                kind: 0,
                address: 0,
                allocated: false,
            },
        );
        Ok(id)
    }

    /// Snapshot of handle `id`
    pub fn get(&self, id: HandleId) -> Option<NvMapHandle> {
        self.lock().handles.get(&id).cloned()
    }

    /// Back a handle with memory at `address`, returns the effective alignment
    pub fn alloc(
        &self,
        id: HandleId,
        heap_mask: u32,
        flags: u32,
        align: u32,
        kind: u8,
        address: u64,
    ) -> Result<u32, PosixResult> {
        if !align.is_power_of_two() {
            return Err(PosixResult::InvalidArgument);
        }
        let align = align.max(PAGE_SIZE);

        let mut inner = self.lock();
        let handle = inner
            .handles
            .get_mut(&id)
            .ok_or(PosixResult::InvalidArgument)?;
        if handle.allocated {
            return Err(PosixResult::NotPermitted);
        }

        handle.heap_mask = heap_mask;
        handle.flags = flags;
        handle.align = align;
        handle.kind = kind;
        handle.address = address;
        handle.allocated = true;
        Ok(align)
    }

    /// Remove a handle from the table
    pub fn free(&self, id: HandleId) -> Option<FreeInfo> {
        self.lock().handles.remove(&id).map(|handle| FreeInfo {
            address: handle.address,
            size: handle.orig_size,
            flags: handle.flags,
        })
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    /// Whether no handle is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rounds_to_pages() {
        let nvmap = NvMapCore::default();
        let id = nvmap.create(0x1801).unwrap();
        assert_eq!(id, 4);
        let handle = nvmap.get(id).unwrap();
        assert_eq!(handle.orig_size, 0x1801);
        assert_eq!(handle.size, 0x2000);
        assert!(!handle.allocated);
        assert_eq!(nvmap.create(1).unwrap(), 8);
    }

    #[test]
    fn test_create_rejects_zero_and_overflow() {
        let nvmap = NvMapCore::default();
        assert_eq!(nvmap.create(0), Err(PosixResult::InvalidArgument));
        assert_eq!(nvmap.create(u32::MAX), Err(PosixResult::InvalidArgument));
        assert!(nvmap.is_empty());
    }

    #[test]
    fn test_alloc_once() {
        let nvmap = NvMapCore::default();
        let id = nvmap.create(0x100).unwrap();
        assert_eq!(nvmap.alloc(id, 1, 0, 3, 0, 0x8000), Err(PosixResult::InvalidArgument));
        assert_eq!(nvmap.alloc(id, 1, 0, 0x20, 0, 0x8000), Ok(PAGE_SIZE));
        assert_eq!(nvmap.alloc(id, 1, 0, 0x20, 0, 0x8000), Err(PosixResult::NotPermitted));
        assert_eq!(nvmap.alloc(0x40, 1, 0, 0x20, 0, 0), Err(PosixResult::InvalidArgument));
    }

    #[test]
    fn test_free_returns_description() {
        let nvmap = NvMapCore::default();
        let id = nvmap.create(0x100).unwrap();
        nvmap.alloc(id, 1, 0x1, 0x10000, 0, 0xABC000).unwrap();
        assert_eq!(
            nvmap.free(id),
            Some(FreeInfo {
                address: 0xABC000,
                size: 0x100,
                flags: 0x1
            })
        );
        assert_eq!(nvmap.free(id), None);
    }
}
