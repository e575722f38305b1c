use crate::maps::*;
use crate::process::{Process, ProcessRecord};
use memory::MemoryModel;
use parking_lot::RwLock;
use std::collections::HashMap;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SystemType {
    #[default]
    Unknown = 0,
    UnknownX64 = 1,
    WindowsX64 = 2,
    UnknownX86 = 3,
    WindowsX86 = 4,
}

impl SystemType {
    pub fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemInfo {
    pub system_type: SystemType,
    /// Model suggested by the provider; `Na` leaves the choice to the
    /// configuration.
    pub memory_model: MemoryModel,
    pub version_major: u32,
    pub version_minor: u32,
    pub build: u32,
    pub unique_id: u32,
}

/// Source of OS objects. Everything but the process list is optional.
pub trait ObjectProvider: Send + Sync {
    fn system(&self) -> SystemInfo {
        SystemInfo::default()
    }

    fn processes(&self) -> Vec<ProcessRecord>;

    fn vads(&self, _process: &Process) -> Vec<VadEntry> {
        Vec::new()
    }

    fn modules(&self, _process: &Process) -> Vec<ModuleEntry> {
        Vec::new()
    }

    fn unloaded_modules(&self, _process: &Process) -> Vec<UnloadedModuleEntry> {
        Vec::new()
    }

    fn eat(&self, _process: &Process, _module: &ModuleEntry) -> Option<EatMap> {
        None
    }

    fn iat(&self, _process: &Process, _module: &ModuleEntry) -> Option<IatMap> {
        None
    }

    fn heaps(&self, _process: &Process) -> Vec<HeapEntry> {
        Vec::new()
    }

    fn threads(&self, _process: &Process) -> Vec<ThreadEntry> {
        Vec::new()
    }

    fn handles(&self, _process: &Process) -> Vec<HandleEntry> {
        Vec::new()
    }

    fn net(&self) -> Vec<NetEntry> {
        Vec::new()
    }

    fn users(&self) -> Vec<UserEntry> {
        Vec::new()
    }

    fn services(&self) -> Vec<ServiceEntry> {
        Vec::new()
    }

    fn physmem(&self) -> Vec<PhysMemEntry> {
        Vec::new()
    }

    fn pfn(&self, _pfn: u32) -> Option<PfnEntry> {
        None
    }
}

/// Objects of one process held by a [`StaticProvider`]. EAT and IAT maps
/// are keyed by module base.
#[derive(Debug, Clone, Default)]
pub struct ProcessObjects {
    pub vads: Vec<VadEntry>,
    pub modules: Vec<ModuleEntry>,
    pub unloaded: Vec<UnloadedModuleEntry>,
    pub eat: HashMap<u64, EatMap>,
    pub iat: HashMap<u64, IatMap>,
    pub heaps: Vec<HeapEntry>,
    pub threads: Vec<ThreadEntry>,
    pub handles: Vec<HandleEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticObjects {
    pub system: SystemInfo,
    pub processes: Vec<ProcessRecord>,
    pub objects: HashMap<u32, ProcessObjects>,
    pub net: Vec<NetEntry>,
    pub users: Vec<UserEntry>,
    pub services: Vec<ServiceEntry>,
    pub physmem: Vec<PhysMemEntry>,
    pub pfns: HashMap<u32, PfnEntry>,
}

/// Provider over pre-built records. Contents may be swapped at runtime;
/// the engine picks the change up at its next refresh.
#[derive(Debug, Default)]
pub struct StaticProvider {
    inner: RwLock<StaticObjects>,
}

impl StaticProvider {
    pub fn new(objects: StaticObjects) -> Self {
        Self {
            inner: RwLock::new(objects),
        }
    }

    /// Single process view over a known directory table base.
    pub fn single(system: SystemInfo, dtb: u64, name: &str) -> Self {
        let record = ProcessRecord {
            pid: 4,
            name: name.to_owned(),
            long_name: name.to_owned(),
            dtb,
            ..ProcessRecord::default()
        };
        Self::new(StaticObjects {
            system,
            processes: vec![record],
            ..StaticObjects::default()
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut StaticObjects)) {
        f(&mut self.inner.write());
    }

    fn with_process<T: Default>(&self, pid: u32, f: impl FnOnce(&ProcessObjects) -> T) -> T {
        self.inner.read().objects.get(&pid).map(f).unwrap_or_default()
    }
}

impl ObjectProvider for StaticProvider {
    fn system(&self) -> SystemInfo {
        self.inner.read().system.clone()
    }

    fn processes(&self) -> Vec<ProcessRecord> {
        self.inner.read().processes.clone()
    }

    fn vads(&self, process: &Process) -> Vec<VadEntry> {
        self.with_process(process.pid, |o| o.vads.clone())
    }

    fn modules(&self, process: &Process) -> Vec<ModuleEntry> {
        self.with_process(process.pid, |o| o.modules.clone())
    }

    fn unloaded_modules(&self, process: &Process) -> Vec<UnloadedModuleEntry> {
        self.with_process(process.pid, |o| o.unloaded.clone())
    }

    fn eat(&self, process: &Process, module: &ModuleEntry) -> Option<EatMap> {
        self.with_process(process.pid, |o| o.eat.get(&module.base).cloned())
    }

    fn iat(&self, process: &Process, module: &ModuleEntry) -> Option<IatMap> {
        self.with_process(process.pid, |o| o.iat.get(&module.base).cloned())
    }

    fn heaps(&self, process: &Process) -> Vec<HeapEntry> {
        self.with_process(process.pid, |o| o.heaps.clone())
    }

    fn threads(&self, process: &Process) -> Vec<ThreadEntry> {
        self.with_process(process.pid, |o| o.threads.clone())
    }

    fn handles(&self, process: &Process) -> Vec<HandleEntry> {
        self.with_process(process.pid, |o| o.handles.clone())
    }

    fn net(&self) -> Vec<NetEntry> {
        self.inner.read().net.clone()
    }

    fn users(&self) -> Vec<UserEntry> {
        self.inner.read().users.clone()
    }

    fn services(&self) -> Vec<ServiceEntry> {
        self.inner.read().services.clone()
    }

    fn physmem(&self) -> Vec<PhysMemEntry> {
        self.inner.read().physmem.clone()
    }

    fn pfn(&self, pfn: u32) -> Option<PfnEntry> {
        self.inner.read().pfns.get(&pfn).cloned()
    }
}
