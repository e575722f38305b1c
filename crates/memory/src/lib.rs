pub mod cache;
pub mod device;
pub mod engine;
pub mod error;
pub mod flags;
mod inflight;
pub mod paging;
pub mod scatter;
pub mod space;
pub mod types;

pub use device::{BufferDevice, Device};
pub use engine::{EngineStats, MemoryEngine};
pub use error::Error;
pub use flags::ReadFlags;
pub use paging::{Fault, FaultReason, MappedPage, PteKind, SoftPage, Translation};
pub use scatter::ScatterItem;
pub use space::AddressSpace;
pub use types::{
    MemoryModel, PAGE_SIZE, PID_KERNEL_MEMORY, PID_PHYSICAL, Page, fragments, page_base,
    page_offset,
};
