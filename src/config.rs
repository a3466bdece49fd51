//! Driver configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DriverResult;
use crate::types::FileDescriptor;

/// Tunables shared by every device of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of fds a session may ever allocate; nvdrv tracks them in two 64-bit bitsets
    pub fd_limit: FileDescriptor,
    /// Number of hardware syncpoints, fence ids at or above are rejected
    pub syncpoint_count: u32,
    /// Reject commands whose argument schema does not add up to the descriptor size
    pub strict_decode: bool,
    /// Gate `/dev/nvhost-ctrl` behind the GPU capability
    pub ctrl_requires_gpu: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            fd_limit: 128,
            syncpoint_count: 192,
            strict_decode: true,
            ctrl_requires_gpu: false,
        }
    }
}

impl DriverConfig {
    /// Decoder trusts the buffer-length precondition alone
    pub fn permissive() -> Self {
        Self {
            strict_decode: false,
            ..Self::default()
        }
    }

    /// Control device only reachable with GPU access
    pub fn gated_ctrl() -> Self {
        Self {
            ctrl_requires_gpu: true,
            ..Self::default()
        }
    }

    /// Parse a configuration, missing fields take their defaults
    pub fn from_json_str(json: &str) -> DriverResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> DriverResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
