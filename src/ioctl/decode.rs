//! Schema-driven argument decoding
//!
//! A schema is an ordered list of [`ArgSlot`]s. Offsets are the running sum
//! of the slot sizes, nothing is aligned beyond explicit padding slots.
//! Output slots are handed to handlers as views into the original buffer so
//! results land in place.

use std::marker::PhantomData;

use crate::error::DecodeError;
use crate::ioctl::IoctlData;

/// One entry of an argument schema, carrying its size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    /// Read-only argument
    In(usize),
    /// Argument written back by the handler
    Out(usize),
    /// Argument read and overwritten in place
    InOut(usize),
    /// Skipped bytes, produces no argument
    Pad(usize),
}

impl ArgSlot {
    /// Input slot sized for `T`
    pub const fn input<T: IoctlData>() -> Self {
        ArgSlot::In(T::SIZE)
    }

    /// Output slot sized for `T`
    pub const fn output<T: IoctlData>() -> Self {
        ArgSlot::Out(T::SIZE)
    }

    /// In/out slot sized for `T`
    pub const fn inout<T: IoctlData>() -> Self {
        ArgSlot::InOut(T::SIZE)
    }

    /// `count` elements of `T` worth of padding
    pub const fn pad<T: IoctlData>(count: usize) -> Self {
        ArgSlot::Pad(T::SIZE * count)
    }

    /// Bytes the slot occupies
    pub const fn len(&self) -> usize {
        match *self {
            ArgSlot::In(len) | ArgSlot::Out(len) | ArgSlot::InOut(len) | ArgSlot::Pad(len) => len,
        }
    }
}

/// Total number of bytes a schema walks over
pub const fn schema_size(schema: &[ArgSlot]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < schema.len() {
        total += schema[i].len();
        i += 1;
    }
    total
}

enum ArgValue<'a> {
    In(&'a [u8]),
    Out(&'a mut [u8]),
    InOut(&'a mut [u8]),
}

impl ArgValue<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ArgValue::In(_) => "in",
            ArgValue::Out(_) => "out",
            ArgValue::InOut(_) => "inout",
        }
    }

    fn len(&self) -> usize {
        match self {
            ArgValue::In(bytes) => bytes.len(),
            ArgValue::Out(bytes) | ArgValue::InOut(bytes) => bytes.len(),
        }
    }
}

/// Write-back view of an output argument
pub struct Out<'a, T> {
    bytes: &'a mut [u8],
    _marker: PhantomData<T>,
}

impl<T: IoctlData> Out<'_, T> {
    /// Store the handler's result into the guest buffer
    pub fn set(&mut self, value: T) {
        value.encode(self.bytes);
    }
}

/// Argument read from the buffer that the handler may overwrite in place
pub struct InOut<'a, T> {
    bytes: &'a mut [u8],
    _marker: PhantomData<T>,
}

impl<T: IoctlData> InOut<'_, T> {
    /// Current contents of the slot
    pub fn get(&self) -> T {
        T::decode(self.bytes)
    }

    /// Overwrite the slot in place
    pub fn set(&mut self, value: T) {
        value.encode(self.bytes);
    }
}

/// Decoded arguments, consumed in schema order by a handler
pub struct Args<'a> {
    values: std::vec::IntoIter<ArgValue<'a>>,
    index: usize,
}

impl<'a> Args<'a> {
    fn next_slot<T: IoctlData>(&mut self) -> Result<(usize, ArgValue<'a>), DecodeError> {
        let index = self.index;
        let value = self.values.next().ok_or(DecodeError::Exhausted { index })?;
        self.index += 1;

        if value.len() != T::SIZE {
            return Err(DecodeError::SlotSize {
                index,
                expected: T::SIZE,
                found: value.len(),
            });
        }
        Ok((index, value))
    }

    /// Next argument, declared as [`ArgSlot::In`]
    pub fn input<T: IoctlData>(&mut self) -> Result<T, DecodeError> {
        match self.next_slot::<T>()? {
            (_, ArgValue::In(bytes)) => Ok(T::decode(bytes)),
            (index, other) => Err(DecodeError::SlotKind {
                index,
                expected: "in",
                found: other.kind(),
            }),
        }
    }

    /// Next argument, declared as [`ArgSlot::Out`]
    pub fn output<T: IoctlData>(&mut self) -> Result<Out<'a, T>, DecodeError> {
        match self.next_slot::<T>()? {
            (_, ArgValue::Out(bytes)) => Ok(Out {
                bytes,
                _marker: PhantomData,
            }),
            (index, other) => Err(DecodeError::SlotKind {
                index,
                expected: "out",
                found: other.kind(),
            }),
        }
    }

    /// Next argument, declared as [`ArgSlot::InOut`]
    pub fn inout<T: IoctlData>(&mut self) -> Result<InOut<'a, T>, DecodeError> {
        match self.next_slot::<T>()? {
            (_, ArgValue::InOut(bytes)) => Ok(InOut {
                bytes,
                _marker: PhantomData,
            }),
            (index, other) => Err(DecodeError::SlotKind {
                index,
                expected: "inout",
                found: other.kind(),
            }),
        }
    }

    /// Arguments not yet taken by the handler
    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

/// Split `buffer` into the arguments described by `schema`
///
/// With `strict` set the schema has to add up to `declared` exactly,
/// otherwise only the buffer length is checked.
pub fn decode_arguments<'a>(
    schema: &[ArgSlot],
    buffer: &'a mut [u8],
    declared: usize,
    strict: bool,
) -> Result<Args<'a>, DecodeError> {
    let consumed = schema_size(schema);
    if strict && consumed != declared {
        return Err(DecodeError::SizeMismatch { declared, consumed });
    }
    if buffer.len() < consumed {
        return Err(DecodeError::BufferTooSmall {
            needed: consumed,
            available: buffer.len(),
        });
    }

    let mut rest = buffer;
    let mut values = Vec::with_capacity(schema.len());
    for slot in schema {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(slot.len());
        rest = tail;

        match slot {
            ArgSlot::In(_) => values.push(ArgValue::In(head)),
            ArgSlot::Out(_) => values.push(ArgValue::Out(head)),
            ArgSlot::InOut(_) => values.push(ArgValue::InOut(head)),
            ArgSlot::Pad(_) => {}
        }
    }

    Ok(Args {
        values: values.into_iter(),
        index: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fence;
    use pretty_assertions::assert_eq;

    const ALLOC_LIKE: &[ArgSlot] = &[
        ArgSlot::input::<u32>(),
        ArgSlot::inout::<u32>(),
        ArgSlot::input::<u8>(),
        ArgSlot::pad::<u8>(7),
        ArgSlot::input::<u64>(),
    ];

    #[test]
    fn test_schema_size_sums_slots() {
        assert_eq!(schema_size(ALLOC_LIKE), 4 + 4 + 1 + 7 + 8);
        assert_eq!(schema_size(&[]), 0);
    }

    #[test]
    fn test_sequential_offsets_and_padding() {
        let mut buffer = [0u8; 24];
        buffer[0..4].copy_from_slice(&7u32.to_le_bytes());
        buffer[4..8].copy_from_slice(&0x1000u32.to_le_bytes());
        buffer[8] = 3;
        buffer[9..16].fill(0xEE);
        buffer[16..24].copy_from_slice(&0xDEAD_0000u64.to_le_bytes());

        let mut args = decode_arguments(ALLOC_LIKE, &mut buffer, 24, true).unwrap();
        assert_eq!(args.input::<u32>().unwrap(), 7);
        let mut align = args.inout::<u32>().unwrap();
        assert_eq!(args.input::<u8>().unwrap(), 3);
        assert_eq!(args.input::<u64>().unwrap(), 0xDEAD_0000);
        assert_eq!(args.remaining(), 0);

        assert_eq!(align.get(), 0x1000);
        align.set(0x2000);
        drop(args);
        assert_eq!(&buffer[4..8], &0x2000u32.to_le_bytes());
        // Padding is never touched
        assert_eq!(&buffer[9..16], &[0xEE; 7]);
    }

    #[test]
    fn test_output_writes_back_into_buffer() {
        let schema = [ArgSlot::input::<Fence>(), ArgSlot::output::<u32>()];
        let mut buffer = [0u8; 12];
        {
            let mut args = decode_arguments(&schema, &mut buffer, 12, true).unwrap();
            assert_eq!(args.input::<Fence>().unwrap(), Fence::default());
            args.output::<u32>().unwrap().set(0xCAFE);
        }
        assert_eq!(&buffer[8..12], &0xCAFEu32.to_le_bytes());
    }

    #[test]
    fn test_strict_mode_rejects_size_mismatch() {
        let mut buffer = [0u8; 32];
        let err = decode_arguments(ALLOC_LIKE, &mut buffer, 0x20, true)
            .err()
            .unwrap();
        assert_eq!(
            err,
            DecodeError::SizeMismatch {
                declared: 0x20,
                consumed: 24
            }
        );
        assert!(decode_arguments(ALLOC_LIKE, &mut buffer, 0x20, false).is_ok());
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let mut buffer = [0u8; 10];
        let err = decode_arguments(ALLOC_LIKE, &mut buffer, 24, false)
            .err()
            .unwrap();
        assert_eq!(
            err,
            DecodeError::BufferTooSmall {
                needed: 24,
                available: 10
            }
        );
    }

    #[test]
    fn test_handler_schema_disagreement() {
        let schema = [ArgSlot::output::<u32>()];
        let mut buffer = [0u8; 4];

        let mut args = decode_arguments(&schema, &mut buffer, 4, true).unwrap();
        assert_eq!(
            args.input::<u32>().err(),
            Some(DecodeError::SlotKind {
                index: 0,
                expected: "in",
                found: "out"
            })
        );
        assert_eq!(
            args.input::<u32>().err(),
            Some(DecodeError::Exhausted { index: 1 })
        );

        let mut args = decode_arguments(&schema, &mut buffer, 4, true).unwrap();
        assert!(matches!(
            args.output::<u64>(),
            Err(DecodeError::SlotSize {
                index: 0,
                expected: 8,
                found: 4
            })
        ));
    }
}
