pub mod clock;
mod error;
pub mod forensic;
pub mod maps;
pub mod modules;
pub mod options;
pub mod plugin;
pub mod process;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod vfs;
pub mod vfs_util;
mod vmm;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use options::Notification;
pub use process::{Process, ProcessInformation, ProcessRecord, ProcessState, ProcessTable};
pub use provider::{ObjectProvider, StaticProvider, SystemInfo, SystemType};
pub use scheduler::{ControlEvent, RefreshScheduler};
pub use vfs::{DirEntry, EntryKind, Listing, VfsStatus};
pub use vmm::{MapQuery, ProcessString, TickReport, Vmm};
