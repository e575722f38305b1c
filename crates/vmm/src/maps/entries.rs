use memory::PteKind;
use std::fmt;

/// Run of virtual pages sharing the same protection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PteEntry {
    pub va_base: u64,
    pub pages: u64,
    pub writable: bool,
    /// Accessible from user mode.
    pub user: bool,
    pub nx: bool,
    pub wow64: bool,
    /// Name of the module covering `va_base`, if any.
    pub text: String,
    pub software_pages: u32,
}

impl PteEntry {
    /// Last byte of the run. Runs may end at the top of the address space.
    pub fn last(&self) -> u64 {
        let len = self.pages.saturating_mul(memory::PAGE_SIZE as u64);
        self.va_base.saturating_add(len.saturating_sub(1))
    }

    pub fn contains(&self, va: u64) -> bool {
        self.pages > 0 && (self.va_base..=self.last()).contains(&va)
    }

    /// Protection in the usual `rwx` notation.
    pub fn protection(&self) -> String {
        format!(
            "{}r{}{}",
            if self.user { '-' } else { 's' },
            if self.writable { 'w' } else { '-' },
            if self.nx { '-' } else { 'x' }
        )
    }
}

/// Virtual address descriptor. `end` is the last byte of the range.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VadEntry {
    pub start: u64,
    pub end: u64,
    pub vad: u64,
    pub vad_type: u8,
    pub protection: u8,
    pub image: bool,
    pub file: bool,
    pub pagefile: bool,
    pub private_memory: bool,
    pub teb: bool,
    pub stack: bool,
    pub heap_num: u8,
    pub heap: bool,
    pub commit_charge: u32,
    pub mem_commit: bool,
    pub prototype_pte_va: u64,
    pub prototype_pte_size: u32,
    pub subsection: u64,
    pub file_object: u64,
    pub text: String,
    /// Number of pages in the range, filled in by the map builder.
    pub vadex_pages: u32,
    /// Page index of `start` in the whole VAD map, filled in by the map
    /// builder.
    pub vadex_pages_base: u32,
}

impl VadEntry {
    pub fn pages(&self) -> u64 {
        self.end.saturating_sub(self.start) / memory::PAGE_SIZE as u64 + 1
    }

    pub fn kind(&self) -> &'static str {
        if self.image {
            "Image"
        } else if self.file {
            "File"
        } else if self.heap {
            "Heap"
        } else if self.stack {
            "Stack"
        } else if self.teb {
            "Teb"
        } else if self.private_memory {
            "Private"
        } else {
            "-"
        }
    }
}

/// Translation of a single page inside a VAD.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VadExEntry {
    /// `None` when the page has no translation at all.
    pub kind: Option<PteKind>,
    /// Paging level of the leaf (1 = 4 KiB, 2 = 2 MiB, 3 = 1 GiB).
    pub level: u32,
    pub va: u64,
    pub pa: u64,
    pub pte: u64,
    pub proto_kind: Option<PteKind>,
    pub proto_pa: u64,
    pub proto_pte: u64,
    pub vad_base: u64,
}

pub(crate) fn pte_kind_code(kind: Option<PteKind>) -> u32 {
    match kind {
        None => 0,
        Some(PteKind::Hardware) => 1,
        Some(PteKind::Transition) => 2,
        Some(PteKind::Prototype) => 3,
        Some(PteKind::DemandZero) => 4,
        Some(PteKind::Compressed) => 5,
        Some(PteKind::PageFile) => 6,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleType {
    #[default]
    Normal,
    Data,
    NotLinked,
    Injected,
}

impl ModuleType {
    pub fn code(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Data => 1,
            Self::NotLinked => 2,
            Self::Injected => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleEntry {
    pub base: u64,
    pub entry: u64,
    pub image_size: u32,
    pub wow64: bool,
    pub name: String,
    pub full_name: String,
    pub module_type: ModuleType,
    pub file_size_raw: u32,
    pub sections: u32,
    pub eat_functions: u32,
    pub iat_functions: u32,
}

impl ModuleEntry {
    pub fn contains(&self, va: u64) -> bool {
        va >= self.base && va - self.base < u64::from(self.image_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnloadedModuleEntry {
    pub base: u64,
    pub image_size: u32,
    pub wow64: bool,
    pub name: String,
    pub checksum: u32,
    pub timestamp: u32,
    /// FILETIME of the unload.
    pub unload_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EatEntry {
    pub function_va: u64,
    pub ordinal: u32,
    pub functions_index: u32,
    pub names_index: u32,
    pub name: String,
}

/// Export table of one module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EatMap {
    pub ordinal_base: u32,
    pub names: u32,
    pub functions: u32,
    pub module_base: u64,
    pub functions_va: u64,
    pub names_va: u64,
    pub entries: Vec<EatEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Thunk {
    pub is32: bool,
    pub hint: u16,
    pub rva_first_thunk: u32,
    pub rva_original_first_thunk: u32,
    pub rva_name_module: u32,
    pub rva_name_function: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IatEntry {
    pub function_va: u64,
    pub function: String,
    pub module: String,
    pub thunk: Thunk,
}

/// Import table of one module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IatMap {
    pub module_base: u64,
    pub entries: Vec<IatEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeapEntry {
    pub segment_va: u64,
    pub pages: u32,
    pub uncommitted_pages: u32,
    pub heap_id: u8,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadEntry {
    pub tid: u32,
    pub pid: u32,
    pub exit_status: u32,
    pub state: u8,
    pub running: u8,
    pub priority: u8,
    pub base_priority: u8,
    pub ethread: u64,
    pub teb: u64,
    pub create_time: u64,
    pub exit_time: u64,
    pub start_address: u64,
    pub stack_base_user: u64,
    pub stack_limit_user: u64,
    pub stack_base_kernel: u64,
    pub stack_limit_kernel: u64,
    pub trap_frame: u64,
    pub rip: u64,
    pub rsp: u64,
    pub affinity: u64,
    pub user_time: u32,
    pub kernel_time: u32,
    pub suspend_count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandleEntry {
    pub object_va: u64,
    pub handle: u32,
    pub granted_access: u32,
    pub type_index: u8,
    pub handle_count: u64,
    pub pointer_count: u64,
    pub create_info_va: u64,
    pub security_descriptor_va: u64,
    pub text: String,
    pub pid: u32,
    pub pool_tag: u32,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetEndpoint {
    pub valid: bool,
    pub port: u16,
    /// IPv4 in the first four bytes, or IPv6.
    pub addr: [u8; 16],
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetEntry {
    pub pid: u32,
    pub state: u32,
    pub af: u16,
    pub src: NetEndpoint,
    pub dst: NetEndpoint,
    pub object_va: u64,
    pub time: u64,
    pub pool_tag: u32,
    pub text: String,
}

impl NetEntry {
    pub fn state_name(&self) -> &'static str {
        const STATES: [&str; 13] = [
            "CLOSED",
            "LISTENING",
            "SYN_SENT",
            "SYN_RCVD",
            "ESTABLISHED",
            "FIN_WAIT_1",
            "FIN_WAIT_2",
            "CLOSE_WAIT",
            "CLOSING",
            "LAST_ACK",
            "TIME_WAIT",
            "DELETE_TCB",
            "-",
        ];
        STATES.get(self.state as usize).copied().unwrap_or("-")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysMemEntry {
    pub pa: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserEntry {
    pub name: String,
    pub sid: String,
    pub hive_va: u64,
}

/// Win32 `SERVICE_STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    pub service_type: u32,
    pub current_state: u32,
    pub controls_accepted: u32,
    pub win32_exit_code: u32,
    pub service_specific_exit_code: u32,
    pub check_point: u32,
    pub wait_hint: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceEntry {
    pub object_va: u64,
    pub ordinal: u32,
    pub start_type: u32,
    pub status: ServiceStatus,
    pub service_name: String,
    pub display_name: String,
    pub path: String,
    pub user_type: String,
    pub user_account: String,
    pub image_path: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PfnType {
    #[default]
    Zero,
    Free,
    Standby,
    Modified,
    ModifiedNoWrite,
    Bad,
    Active,
    Transition,
}

impl PfnType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zero => "Zero",
            Self::Free => "Free",
            Self::Standby => "Standby",
            Self::Modified => "Modified",
            Self::ModifiedNoWrite => "ModNoWr",
            Self::Bad => "Bad",
            Self::Active => "Active",
            Self::Transition => "Transit",
        }
    }
}

impl fmt::Display for PfnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PfnExtended {
    #[default]
    Unknown,
    Unused,
    ProcessPrivate,
    PageTable,
    LargePage,
    DriverLocked,
    Shareable,
    File,
}

impl PfnExtended {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "-",
            Self::Unused => "Unused",
            Self::ProcessPrivate => "ProcPriv",
            Self::PageTable => "PageTable",
            Self::LargePage => "LargePage",
            Self::DriverLocked => "DriverLock",
            Self::Shareable => "Shareable",
            Self::File => "File",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PfnEntry {
    pub pfn: u32,
    pub location: PfnType,
    pub extended: PfnExtended,
    pub modified: bool,
    pub prototype: bool,
    pub priority: u8,
    pub pid: u32,
    pub va: u64,
    pub pte_va: u64,
    pub original_pte: u64,
    pub pte_frame: u64,
}
