//! Ioctl descriptors and the table-driven argument decoder

mod decode;
mod table;

pub use decode::{decode_arguments, schema_size, ArgSlot, Args, InOut, Out};
pub use table::{IoctlAction, IoctlEntry, IoctlHandler, IoctlTable};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Maximum value of the 14-bit size field
pub const MAX_IOCTL_SIZE: u16 = 0x3FFF;

/// Packed identifier of a single ioctl command
///
/// Layout: `[out:1 | in:1 | size:14 | magic:8 | function:8]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoctlDescriptor {
    /// Guest writes, driver reads
    pub input: bool,
    /// Driver writes, guest reads
    pub output: bool,
    /// Size of the argument buffer
    pub size: u16,
    /// Unique to each driver
    pub magic: i8,
    /// Function number within the driver
    pub function: u8,
}

impl IoctlDescriptor {
    /// Build a descriptor, the size is truncated to 14 bits
    pub const fn new(input: bool, output: bool, size: u16, magic: i8, function: u8) -> Self {
        Self {
            input,
            output,
            size: size & MAX_IOCTL_SIZE,
            magic,
            function,
        }
    }

    /// Descriptor for a command that both reads and writes its buffer
    pub const fn inout(size: u16, magic: i8, function: u8) -> Self {
        Self::new(true, true, size, magic, function)
    }

    /// Unpack a raw command number
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            function: (raw & 0xFF) as u8,
            magic: ((raw >> 8) & 0xFF) as u8 as i8,
            size: ((raw >> 16) as u16) & MAX_IOCTL_SIZE,
            input: (raw >> 30) & 1 != 0,
            output: (raw >> 31) & 1 != 0,
        }
    }

    /// Packed command number, used as the dispatch key
    pub const fn raw(self) -> u32 {
        (self.function as u32)
            | ((self.magic as u8 as u32) << 8)
            | (((self.size & MAX_IOCTL_SIZE) as u32) << 16)
            | ((self.input as u32) << 30)
            | ((self.output as u32) << 31)
    }

    /// Magic and function only, with the direction and size bits stripped
    ///
    /// Ioctl2 and Ioctl3 commands are dispatched on this value.
    pub const fn command_id(self) -> Self {
        Self::from_raw(self.raw() & 0xFFFF)
    }

    /// Direction as the conventional `NONE`/`WRITE`/`READ`/`READ|WRITE` string
    pub fn direction(&self) -> &'static str {
        match (self.input, self.output) {
            (false, false) => "NONE",
            (true, false) => "WRITE",
            (false, true) => "READ",
            (true, true) => "READ|WRITE",
        }
    }
}

impl From<u32> for IoctlDescriptor {
    fn from(raw: u32) -> Self {
        Self::from_raw(raw)
    }
}

impl From<IoctlDescriptor> for u32 {
    fn from(descriptor: IoctlDescriptor) -> Self {
        descriptor.raw()
    }
}

impl std::fmt::Display for IoctlDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:08X} (dir={}, size=0x{:X}, magic={}, function=0x{:02X})",
            self.raw(),
            self.direction(),
            self.size,
            self.magic,
            self.function
        )
    }
}

/// Plain data that can live in an ioctl argument buffer
///
/// Arguments are little-endian and unaligned; `decode` and `encode` are
/// always handed exactly `SIZE` bytes.
pub trait IoctlData: Sized + Copy {
    /// Number of bytes the value occupies in the buffer
    const SIZE: usize;

    /// Read the value from its slot
    fn decode(buf: &[u8]) -> Self;

    /// Write the value into its slot
    fn encode(&self, buf: &mut [u8]);
}

macro_rules! impl_ioctl_data {
    ($($ty:ty => $get:ident, $put:ident;)*) => {
        $(
            impl IoctlData for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn decode(mut buf: &[u8]) -> Self {
                    buf.$get()
                }

                fn encode(&self, mut buf: &mut [u8]) {
                    buf.$put(*self);
                }
            }
        )*
    };
}

impl_ioctl_data! {
    u8 => get_u8, put_u8;
    i8 => get_i8, put_i8;
    u16 => get_u16_le, put_u16_le;
    i16 => get_i16_le, put_i16_le;
    u32 => get_u32_le, put_u32_le;
    i32 => get_i32_le, put_i32_le;
    u64 => get_u64_le, put_u64_le;
    i64 => get_i64_le, put_i64_le;
}
