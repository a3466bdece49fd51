//! `/dev/nvmap`: buffer handle management

use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::devices::NvDevice;
use crate::error::DriverResult;
use crate::ioctl::{ArgSlot, Args, IoctlDescriptor, IoctlEntry, IoctlTable};
use crate::shared::{Core, HandleId};
use crate::types::{PosixResult, SessionContext};

const NVMAP_MAGIC: i8 = 0x01;

/// Create a handle of a given size
pub const CREATE: IoctlDescriptor = IoctlDescriptor::inout(0x8, NVMAP_MAGIC, 0x01);
/// Look up a handle by its global id
pub const FROM_ID: IoctlDescriptor = IoctlDescriptor::inout(0x8, NVMAP_MAGIC, 0x03);
/// Back a handle with memory
pub const ALLOC: IoctlDescriptor = IoctlDescriptor::inout(0x20, NVMAP_MAGIC, 0x04);
/// Drop a handle, reporting its backing
pub const FREE: IoctlDescriptor = IoctlDescriptor::inout(0x18, NVMAP_MAGIC, 0x05);
/// Read one attribute of a handle
pub const PARAM: IoctlDescriptor = IoctlDescriptor::inout(0xC, NVMAP_MAGIC, 0x09);
/// Global id of a handle
pub const GET_ID: IoctlDescriptor = IoctlDescriptor::inout(0x8, NVMAP_MAGIC, 0x0E);

const CREATE_ARGS: &[ArgSlot] = &[ArgSlot::input::<u32>(), ArgSlot::output::<u32>()];
const ALLOC_ARGS: &[ArgSlot] = &[
    ArgSlot::input::<u32>(),
    ArgSlot::input::<u32>(),
    ArgSlot::input::<u32>(),
    ArgSlot::inout::<u32>(),
    ArgSlot::input::<u8>(),
    ArgSlot::pad::<u8>(7),
    ArgSlot::input::<u64>(),
];
const FREE_ARGS: &[ArgSlot] = &[
    ArgSlot::input::<u32>(),
    ArgSlot::pad::<u32>(1),
    ArgSlot::output::<u64>(),
    ArgSlot::output::<u32>(),
    ArgSlot::output::<u32>(),
];
const PARAM_ARGS: &[ArgSlot] = &[
    ArgSlot::input::<u32>(),
    ArgSlot::input::<u32>(),
    ArgSlot::output::<u32>(),
];
const GET_ID_ARGS: &[ArgSlot] = &[ArgSlot::output::<u32>(), ArgSlot::input::<u32>()];

static NVMAP_ENTRIES: [IoctlEntry<NvMap>; 6] = [
    IoctlEntry::handler(CREATE, "Create", CREATE_ARGS, NvMap::create),
    IoctlEntry::handler(FROM_ID, "FromId", CREATE_ARGS, NvMap::from_id),
    IoctlEntry::handler(ALLOC, "Alloc", ALLOC_ARGS, NvMap::alloc),
    IoctlEntry::handler(FREE, "Free", FREE_ARGS, NvMap::free),
    IoctlEntry::handler(PARAM, "Param", PARAM_ARGS, NvMap::param),
    IoctlEntry::handler(GET_ID, "GetId", GET_ID_ARGS, NvMap::get_id),
];

/// Command table of `/dev/nvmap`
pub static NVMAP_IOCTLS: IoctlTable<NvMap> = IoctlTable::new(&NVMAP_ENTRIES);

/// Attribute selector of the `Param` command
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandleParameterType {
    /// Requested size
    Size = 1,
    /// Allocation alignment
    Alignment = 2,
    /// Backing address
    Base = 3,
    /// Heap the handle was allocated from
    Heap = 4,
    /// Memory kind
    Kind = 5,
    /// Always reported as not mapped
    IsSharedMemMapped = 6,
}

impl TryFrom<u32> for HandleParameterType {
    type Error = PosixResult;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            1 => HandleParameterType::Size,
            2 => HandleParameterType::Alignment,
            3 => HandleParameterType::Base,
            4 => HandleParameterType::Heap,
            5 => HandleParameterType::Kind,
            6 => HandleParameterType::IsSharedMemMapped,
            _ => return Err(PosixResult::InvalidArgument),
        })
    }
}

/// Heap bit reported for allocated handles
const HEAP_IOVMM: u32 = 0x4000_0000;

fn result_of(result: Result<(), PosixResult>) -> PosixResult {
    result.err().unwrap_or(PosixResult::Success)
}

/// Per-fd view of the session's handle table
pub struct NvMap {
    core: Arc<Core>,
    ctx: SessionContext,
}

impl NvMap {
    /// Device over the driver's handle table
    pub fn new(core: Arc<Core>, ctx: SessionContext) -> Self {
        Self { core, ctx }
    }

    /// Session the device was opened by
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn create(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let size = args.input::<u32>()?;
        let mut handle = args.output::<u32>()?;

        Ok(result_of(self.core.nvmap.create(size).map(|id| {
            debug!("Created nvmap handle 0x{:X} of size 0x{:X}", id, size);
            handle.set(id);
        })))
    }

    fn from_id(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let id = args.input::<u32>()?;
        let mut handle = args.output::<u32>()?;

        match self.core.nvmap.get(id) {
            Some(existing) => {
                handle.set(existing.id);
                Ok(PosixResult::Success)
            }
            None => Ok(PosixResult::InvalidArgument),
        }
    }

    fn alloc(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let handle: HandleId = args.input()?;
        let heap_mask = args.input::<u32>()?;
        let flags = args.input::<u32>()?;
        let mut align = args.inout::<u32>()?;
        let kind = args.input::<u8>()?;
        let address = args.input::<u64>()?;

        if handle == 0 {
            return Ok(PosixResult::InvalidArgument);
        }

        Ok(result_of(
            self.core
                .nvmap
                .alloc(handle, heap_mask, flags, align.get(), kind, address)
                .map(|effective| {
                    debug!(
                        "Allocated nvmap handle 0x{:X} at 0x{:X}, align 0x{:X}",
                        handle, address, effective
                    );
                    align.set(effective);
                }),
        ))
    }

    fn free(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let handle = args.input::<u32>()?;
        let mut address = args.output::<u64>()?;
        let mut size = args.output::<u32>()?;
        let mut flags = args.output::<u32>()?;

        if handle == 0 {
            return Ok(PosixResult::Success);
        }

        match self.core.nvmap.free(handle) {
            Some(info) => {
                address.set(info.address);
                size.set(info.size);
                flags.set(info.flags);
            }
            None => debug!("Tried to free nonexistent nvmap handle 0x{:X}", handle),
        }
        Ok(PosixResult::Success)
    }

    fn param(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let handle = args.input::<u32>()?;
        let param = args.input::<u32>()?;
        let mut result = args.output::<u32>()?;

        let Some(entry) = self.core.nvmap.get(handle) else {
            return Ok(PosixResult::InvalidArgument);
        };
        let param = match HandleParameterType::try_from(param) {
            Ok(param) => param,
            Err(err) => return Ok(err),
        };

        result.set(match param {
            HandleParameterType::Size => entry.orig_size,
            HandleParameterType::Alignment => entry.align,
            HandleParameterType::Base => entry.address as u32,
            HandleParameterType::Heap if entry.allocated => HEAP_IOVMM,
            HandleParameterType::Heap => 0,
            HandleParameterType::Kind => u32::from(entry.kind),
            HandleParameterType::IsSharedMemMapped => 0,
        });
        Ok(PosixResult::Success)
    }

    fn get_id(&self, args: &mut Args<'_>) -> DriverResult<PosixResult> {
        let mut id = args.output::<u32>()?;
        let handle = args.input::<u32>()?;

        match self.core.nvmap.get(handle) {
            Some(entry) => {
                id.set(entry.id);
                Ok(PosixResult::Success)
            }
            None => Ok(PosixResult::InvalidArgument),
        }
    }
}

impl NvDevice for NvMap {
    fn name(&self) -> &'static str {
        "nvmap"
    }

    fn ioctl(&self, cmd: IoctlDescriptor, buffer: &mut [u8]) -> DriverResult<PosixResult> {
        NVMAP_IOCTLS.dispatch(self, cmd, buffer, self.core.config.strict_decode)
    }
}
