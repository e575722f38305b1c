#![forbid(unsafe_code)]

use crate::maps::{
    HandleEntry, HeapEntry, Lazy, ModuleEntry, PteEntry, ThreadEntry, UnloadedModuleEntry,
    VadEntry,
};
use educe::Educe;
use memory::{AddressSpace, MemoryModel, PID_KERNEL_MEMORY, PID_PHYSICAL};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessState {
    #[default]
    Running,
    Terminated,
    Created,
}

impl ProcessState {
    pub fn code(self) -> u32 {
        match self {
            Self::Running => 0,
            Self::Terminated => 1,
            Self::Created => 2,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Created => "created",
        })
    }
}

/// Process as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: u32,
    pub state: ProcessState,
    pub name: String,
    pub long_name: String,
    pub dtb: u64,
    /// Separate user mode table root of kernel isolated systems.
    pub dtb_user: Option<u64>,
    /// Only user mode pages belong to the process view.
    pub user_only: bool,
    pub eprocess: u64,
    pub peb: u64,
    pub wow64: bool,
    pub peb32: u32,
    pub session: u32,
    pub luid: u64,
    pub sid: String,
    pub kernel_path: String,
    pub user_path: String,
    pub cmdline: String,
}

/// Maps derived from one process snapshot. Built on first use, dropped
/// wholesale on full refresh.
#[derive(Debug, Default)]
pub(crate) struct ProcessMaps {
    pub(crate) pte: Lazy<Vec<PteEntry>>,
    pub(crate) vad: Lazy<Vec<VadEntry>>,
    pub(crate) modules: Lazy<Vec<ModuleEntry>>,
    pub(crate) unloaded: Lazy<Vec<UnloadedModuleEntry>>,
    pub(crate) heaps: Lazy<Vec<HeapEntry>>,
    pub(crate) threads: Lazy<Vec<ThreadEntry>>,
    pub(crate) handles: Lazy<Vec<HandleEntry>>,
}

/// One process of a snapshot. Equality and hashing go by pid only.
#[derive(Debug, Educe)]
#[educe(Eq, PartialEq, Hash)]
pub struct Process {
    pub pid: u32,
    #[educe(Eq(ignore), Hash(ignore))]
    pub generation: u64,
    #[educe(Eq(ignore), Hash(ignore))]
    pub info: ProcessRecord,
    #[educe(Eq(ignore), Hash(ignore))]
    pub(crate) maps: Arc<ProcessMaps>,
}

impl Process {
    pub(crate) fn new(info: ProcessRecord, generation: u64, maps: Arc<ProcessMaps>) -> Self {
        Self {
            pid: info.pid,
            generation,
            info,
            maps,
        }
    }

    /// Address space of the process. `kernel` selects the full table root
    /// and lifts the user-only restriction.
    pub fn space(&self, kernel: bool) -> AddressSpace {
        if kernel {
            return AddressSpace::virtual_space(self.info.dtb);
        }
        AddressSpace::Virtual {
            dtb: self.info.dtb_user.unwrap_or(self.info.dtb),
            user_only: self.info.user_only,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.info.state == ProcessState::Terminated
    }

    /// Name truncated the way the kernel stores it (15 characters).
    pub fn short_name(&self) -> &str {
        match self.info.name.char_indices().nth(15) {
            Some((idx, _)) => &self.info.name[..idx],
            None => &self.info.name,
        }
    }

    /// Size of the raw virtual memory file.
    pub fn vmem_size(&self, model: MemoryModel) -> u64 {
        match model {
            MemoryModel::X86 | MemoryModel::X86Pae => 1 << 32,
            MemoryModel::X64 if self.info.user_only => 1 << 47,
            MemoryModel::X64 => u64::MAX,
            MemoryModel::Na => 0,
        }
    }
}

/// Split a caller supplied pid into the process id and the kernel memory
/// bit. The physical pseudo-pid never carries the bit.
pub fn split_pid(pid: u32) -> (u32, bool) {
    if pid == PID_PHYSICAL {
        return (pid, false);
    }
    (pid & !PID_KERNEL_MEMORY, pid & PID_KERNEL_MEMORY != 0)
}

/// Immutable process snapshot. Published by copy-and-swap.
#[derive(Debug, Default)]
pub struct ProcessTable {
    pub generation: u64,
    processes: BTreeMap<u32, Arc<Process>>,
}

impl ProcessTable {
    /// Build the next snapshot. A partial refresh keeps the derived maps of
    /// processes whose table root did not change, a full refresh drops all
    /// of them.
    pub(crate) fn refreshed(&self, records: Vec<ProcessRecord>, full: bool) -> Self {
        let generation = self.generation + 1;
        let processes = records
            .into_iter()
            .map(|record| {
                let maps = match self.processes.get(&record.pid) {
                    Some(old) if !full && old.info.dtb == record.dtb => old.maps.clone(),
                    _ => Arc::default(),
                };
                (record.pid, Arc::new(Process::new(record, generation, maps)))
            })
            .collect();
        Self {
            generation,
            processes,
        }
    }

    pub fn get(&self, pid: u32) -> Option<&Arc<Process>> {
        self.processes.get(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.processes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Process>> {
        self.processes.values()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// First live process with a matching name, compared case-insensitively
    /// against both the short and the long name.
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<Process>> {
        self.processes.values().find(|p| {
            !p.is_terminated()
                && (p.info.name.eq_ignore_ascii_case(name)
                    || p.info.long_name.eq_ignore_ascii_case(name))
        })
    }

    /// Children of `ppid` ordered by pid.
    pub fn children(&self, ppid: u32) -> impl Iterator<Item = &Arc<Process>> {
        self.processes
            .values()
            .filter(move |p| p.info.ppid == ppid && p.pid != ppid)
    }
}

/// Fixed layout process information record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInformation {
    pub memory_model: MemoryModel,
    pub system_type: u32,
    pub record: ProcessRecord,
}

impl ProcessInformation {
    pub const MAGIC: u64 = 0xc0ff_ee66_3df9_301e;
    pub const VERSION: u16 = 6;
    pub const SIZE: usize = 0xf0;

    pub fn encode(&self) -> Vec<u8> {
        fn fixed<const N: usize>(text: &str) -> [u8; N] {
            let mut out = [0; N];
            let len = text.len().min(N - 1);
            out[..len].copy_from_slice(&text.as_bytes()[..len]);
            out
        }

        let r = &self.record;
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&Self::MAGIC.to_le_bytes());
        out.extend_from_slice(&Self::VERSION.to_le_bytes());
        out.extend_from_slice(&[0; 2]);
        out.extend_from_slice(&(Self::SIZE as u32).to_le_bytes());
        for value in [
            self.memory_model as u32,
            self.system_type,
            u32::from(r.user_only),
            r.pid,
            r.ppid,
            r.state.code(),
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&fixed::<16>(&r.name));
        out.extend_from_slice(&fixed::<64>(&r.long_name));
        for value in [r.dtb, r.dtb_user.unwrap_or(0), r.eprocess, r.peb] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        for value in [u32::from(r.wow64), r.peb32, r.session, 0] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&r.luid.to_le_bytes());
        out.extend_from_slice(&fixed::<64>(&r.sid));
        debug_assert_eq!(out.len(), Self::SIZE);
        out
    }
}
