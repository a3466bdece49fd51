//! Session-wide state shared by every open device

mod nvmap;
mod syncpoint;

pub use nvmap::{FreeInfo, HandleId, NvMapCore, NvMapHandle, PAGE_SIZE};
pub use syncpoint::SyncpointManager;

use std::sync::Arc;

use crate::config::DriverConfig;
use crate::host1x::Host1x;

/// State owned by the driver and borrowed by each device
pub struct Core {
    /// Configuration the driver was built with
    pub config: DriverConfig,
    /// Handle table behind `/dev/nvmap`
    pub nvmap: NvMapCore,
    /// Cached syncpoint progress
    pub syncpoint_manager: SyncpointManager,
}

impl Core {
    /// Core tracking `config.syncpoint_count` syncpoints
    pub fn new(config: DriverConfig, host1x: Arc<dyn Host1x>) -> Self {
        let syncpoint_manager = SyncpointManager::new(host1x, config.syncpoint_count);
        Self {
            config,
            nvmap: NvMapCore::default(),
            syncpoint_manager,
        }
    }
}
