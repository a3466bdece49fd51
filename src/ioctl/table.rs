//! Static per-device dispatch tables

use log::warn;

use crate::error::DriverResult;
use crate::ioctl::decode::{decode_arguments, schema_size, ArgSlot, Args};
use crate::ioctl::IoctlDescriptor;
use crate::types::PosixResult;

/// Handler invoked with the decoded arguments of a command
pub type IoctlHandler<D> = fn(&D, &mut Args<'_>) -> DriverResult<PosixResult>;

/// What a table entry does once its descriptor matches
pub enum IoctlAction<D> {
    /// Decode the buffer and call the handler
    Handler(IoctlHandler<D>),
    /// Return a fixed result without touching the buffer
    Fixed(PosixResult),
}

/// One command understood by a device
pub struct IoctlEntry<D> {
    /// Descriptor whose raw value is the dispatch key
    pub descriptor: IoctlDescriptor,
    /// Name used in logs
    pub name: &'static str,
    /// Ordered argument slots
    pub schema: &'static [ArgSlot],
    /// What to do on a match
    pub action: IoctlAction<D>,
}

impl<D> IoctlEntry<D> {
    /// Entry decoding `schema` and calling `handler`
    pub const fn handler(
        descriptor: IoctlDescriptor,
        name: &'static str,
        schema: &'static [ArgSlot],
        handler: IoctlHandler<D>,
    ) -> Self {
        Self {
            descriptor,
            name,
            schema,
            action: IoctlAction::Handler(handler),
        }
    }

    /// Entry answering with `result` without decoding
    pub const fn fixed(descriptor: IoctlDescriptor, name: &'static str, result: PosixResult) -> Self {
        Self {
            descriptor,
            name,
            schema: &[],
            action: IoctlAction::Fixed(result),
        }
    }
}

/// Raw command value to entry mapping of a device type
pub struct IoctlTable<D: 'static> {
    entries: &'static [IoctlEntry<D>],
}

impl<D: 'static> IoctlTable<D> {
    /// Table over a static entry list
    pub const fn new(entries: &'static [IoctlEntry<D>]) -> Self {
        Self { entries }
    }

    /// Every entry in declaration order
    pub fn entries(&self) -> &'static [IoctlEntry<D>] {
        self.entries
    }

    /// Entry whose packed descriptor equals `cmd`
    pub fn lookup(&self, cmd: IoctlDescriptor) -> Option<&'static IoctlEntry<D>> {
        let raw = cmd.raw();
        self.entries.iter().find(|entry| entry.descriptor.raw() == raw)
    }

    /// Handler entries whose schema disagrees with the descriptor size
    pub fn mismatched_entries(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.action, IoctlAction::Handler(_)))
            .filter(|entry| schema_size(entry.schema) != entry.descriptor.size as usize)
            .map(|entry| entry.name)
            .collect()
    }

    /// Decode `buffer` for `cmd` and run the matching handler
    ///
    /// Unknown commands yield `InappropriateIoctlForDevice` without decoding.
    pub fn dispatch(
        &self,
        device: &D,
        cmd: IoctlDescriptor,
        buffer: &mut [u8],
        strict: bool,
    ) -> DriverResult<PosixResult> {
        let Some(entry) = self.lookup(cmd) else {
            warn!("Unsupported ioctl: {}", cmd);
            return Ok(PosixResult::InappropriateIoctlForDevice);
        };

        match entry.action {
            IoctlAction::Fixed(result) => Ok(result),
            IoctlAction::Handler(handler) => {
                let mut args = decode_arguments(entry.schema, buffer, cmd.size as usize, strict)
                    .map_err(|err| {
                        warn!("Rejecting {}: {}", entry.name, err);
                        err
                    })?;
                handler(device, &mut args)
            }
        }
    }
}
