use crate::paging::Fault;

/// Represents all possible errors that can occur in this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Page table walk failed for a virtual address.
    #[error("translation fault: {0}")]
    TranslationFault(#[from] Fault),

    /// Physical address is outside of the device or the memory map.
    #[error("physical address {0:#x} is out of range")]
    OutOfRange(u64),

    /// Fewer bytes than requested could be read.
    #[error("partial read at {addr:#x}: {read} of {requested} bytes")]
    PartialRead {
        addr: u64,
        read: usize,
        requested: usize,
    },

    /// The device committed fewer bytes than requested. Bytes before the
    /// failing fragment may already be written.
    #[error("write failed at {addr:#x}: {written} of {requested} bytes committed")]
    WriteFailed {
        addr: u64,
        written: usize,
        requested: usize,
    },

    /// The acquisition device does not accept writes.
    #[error("device is read-only")]
    ReadOnlyDevice,

    /// Error reported by the acquisition device.
    #[error("device error: {0}")]
    Device(String),
}
