#![forbid(unsafe_code)]

use crate::error::Error;
use crate::forensic::{self, ForensicStore};
use crate::maps::encode::{encode_eat, encode_entries, encode_iat, encode_vad};
use crate::maps::{
    EatMap, HandleEntry, HeapEntry, IatMap, Lazy, ModuleEntry, NetEntry, PfnEntry, PhysMemEntry,
    PteEntry, ServiceEntry, ThreadEntry, UnloadedModuleEntry, UserEntry, VadEntry, VadExEntry,
    build, copy_out,
};
use crate::options::{self, Notification};
use crate::plugin::{Capabilities, Context, PluginInit, Registrar, RegistrationInfo};
use crate::process::{Process, ProcessInformation, ProcessTable, split_pid};
use crate::provider::{ObjectProvider, SystemInfo};
use crate::registry::Registry;
use crate::stats::{Call, CallStats};
use crate::vfs::{self, Listing, VfsStatus};
use config::{Config, MAX_FORENSIC_MODE, MemoryModelHint, PhysRange};
use memory::{
    AddressSpace, Device, MemoryEngine, MemoryModel, PID_PHYSICAL, Page, ReadFlags, ScatterItem,
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, debug_span, info, info_span, trace, warn};

/// What one scheduler tick triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub tick: u64,
    pub fast: bool,
    pub medium: bool,
    pub slow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessString {
    KernelPath,
    UserPath,
    Cmdline,
}

/// Selects the map returned by [`Vmm::map_blob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapQuery<'a> {
    Pte { pid: u32 },
    Vad { pid: u32 },
    VadEx { pid: u32, offset: u32, count: u32 },
    Module { pid: u32 },
    ModuleFromName { pid: u32, name: &'a str },
    UnloadedModule { pid: u32 },
    Eat { pid: u32, module: &'a str },
    Iat { pid: u32, module: &'a str },
    Heap { pid: u32 },
    Thread { pid: u32 },
    Handle { pid: u32 },
    Net,
    PhysMem,
    User,
    Service,
    Pfn(&'a [u32]),
}

/// Maps not bound to a process. Each one is replaced on its refresh level.
#[derive(Debug, Clone, Default)]
struct GlobalMaps {
    net: Arc<Lazy<Vec<NetEntry>>>,
    physmem: Arc<Lazy<Vec<PhysMemEntry>>>,
    users: Arc<Lazy<Vec<UserEntry>>>,
    services: Arc<Lazy<Vec<ServiceEntry>>>,
}

#[derive(Debug, Default)]
struct Verbosity {
    printf: AtomicBool,
    verbose: AtomicBool,
    extra: AtomicBool,
    tlp: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Fast = 0,
    Medium = 1,
    Slow = 2,
}

/// Clears the in-progress flag of a refresh level.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn version_part(part: &str) -> u64 {
    part.parse().unwrap_or(0)
}

/// The engine context. Every operation goes through one instance; several
/// instances may coexist.
pub struct Vmm {
    engine: Arc<MemoryEngine>,
    provider: Arc<dyn ObjectProvider>,
    config: RwLock<Config>,
    system: RwLock<SystemInfo>,
    processes: RwLock<Arc<ProcessTable>>,
    globals: RwLock<GlobalMaps>,
    registry: RwLock<Registry>,
    plugins_initialized: AtomicBool,
    closed: AtomicBool,
    refreshing: [AtomicBool; 3],
    verbosity: Verbosity,
    stats: CallStats,
    forensic: ForensicStore,
}

impl Vmm {
    /// Bring up an engine over `device`. A non-volatile device turns
    /// automatic refresh off; forensic mode needs one.
    pub fn initialize(
        device: Arc<dyn Device>,
        provider: Arc<dyn ObjectProvider>,
        mut config: Config,
    ) -> Result<Self, Error> {
        let span = info_span!("initialize");
        let _enter = span.enter();

        if device.max_address() == 0 {
            return Err(Error::Initialize("device reports no memory".into()));
        }
        let volatile = device.is_volatile();
        if !volatile && config.refresh.enabled {
            debug!("non-volatile device, automatic refresh disabled");
            config.refresh.enabled = false;
        }
        if volatile && config.forensic.mode > 0 {
            return Err(Error::Forensic("requires a non-volatile device"));
        }

        let system = provider.system();
        let engine = MemoryEngine::new(device, &config);
        if config.memory.model == MemoryModelHint::Auto && system.memory_model != MemoryModel::Na {
            engine.set_memory_model(system.memory_model);
        }
        if config.memory.memmap.is_empty() {
            let ranges = build::physmem_map(provider.physmem());
            if !ranges.is_empty() {
                engine.set_memmap(
                    ranges
                        .iter()
                        .map(|r| PhysRange {
                            base: r.pa,
                            size: r.size,
                        })
                        .collect(),
                );
            }
        }
        if engine.model() == MemoryModel::Na {
            warn!("memory model unknown, only physical memory is available");
        }

        let processes = ProcessTable::default().refreshed(provider.processes(), true);
        let forensic = ForensicStore::default();
        forensic.set_mode(config.forensic.mode);
        info!(
            model = %engine.model(),
            max_address = %format_args!("{:#x}", engine.max_address()),
            processes = processes.len(),
            volatile,
            "engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            provider,
            config: RwLock::new(config),
            system: RwLock::new(system),
            processes: RwLock::new(Arc::new(processes)),
            globals: RwLock::new(GlobalMaps::default()),
            registry: RwLock::new(Registry::default()),
            plugins_initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            refreshing: Default::default(),
            verbosity: Verbosity::default(),
            stats: CallStats::default(),
            forensic,
        })
    }

    /// Register and activate the built-in modules.
    pub fn initialize_plugins(&self) -> Result<usize, Error> {
        self.initialize_plugins_with(crate::modules::BUILTIN)
    }

    /// Invoke every candidate once, activate what registered and, in
    /// forensic mode, run the forensic pass. Returns the active count.
    pub fn initialize_plugins_with(&self, candidates: &[PluginInit]) -> Result<usize, Error> {
        let _timer = self.stats.timer(Call::InitializePlugins);
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        if self.plugins_initialized.swap(true, Ordering::AcqRel) {
            return Err(Error::PluginsInitialized);
        }
        let span = info_span!("initialize_plugins", candidates = candidates.len());
        let _enter = span.enter();

        let system = self.system();
        let info = RegistrationInfo {
            memory_model: self.engine.model(),
            system_type: system.system_type,
            version_major: system.version_major,
            version_minor: system.version_minor,
            build: system.build,
        };
        let active = {
            let mut registry = self.registry.write();
            for init in candidates {
                let mut registrar = Registrar::new(&info);
                init(&mut registrar);
                for registration in registrar.into_pending() {
                    registry.register(registration);
                }
            }
            registry.activate_all()
        };
        info!(modules = active, "plugins active");

        if self.forensic.mode() > 0 {
            forensic::run(self)?;
        }
        Ok(active)
    }

    /// Close every module. Returns false if already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let closed = self.registry.write().close_all();
        info!(modules = closed, "engine closed");
        true
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        // module callbacks reach back into the dispatcher
        self.registry.read_recursive()
    }

    pub fn config(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read()
    }

    pub fn system(&self) -> SystemInfo {
        self.system.read().clone()
    }

    pub fn forensic(&self) -> &ForensicStore {
        &self.forensic
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    /// Current process snapshot.
    pub fn processes(&self) -> Arc<ProcessTable> {
        self.processes.read().clone()
    }

    pub fn process(&self, pid: u32) -> Result<Arc<Process>, Error> {
        self.processes()
            .get(pid)
            .cloned()
            .ok_or(Error::UnknownProcess(pid))
    }

    // ---- configuration ----

    pub fn config_get(&self, key: u64) -> Result<u64, Error> {
        let _timer = self.stats.timer(Call::ConfigGet);
        let flag = |b: &AtomicBool| u64::from(b.load(Ordering::Relaxed));
        let config = self.config.read();
        let system = self.system.read();
        let value = match options::option_id(key) {
            options::CORE_PRINTF_ENABLE => flag(&self.verbosity.printf),
            options::CORE_VERBOSE => flag(&self.verbosity.verbose),
            options::CORE_VERBOSE_EXTRA => flag(&self.verbosity.extra),
            options::CORE_VERBOSE_EXTRA_TLP => flag(&self.verbosity.tlp),
            options::CORE_MAX_NATIVE_ADDRESS => self.engine.device().max_address(),
            options::CORE_SYSTEM => u64::from(system.system_type.code()),
            options::CORE_MEMORYMODEL => self.engine.model() as u64,
            options::CONFIG_IS_REFRESH_ENABLED => u64::from(config.refresh.enabled),
            options::CONFIG_TICK_PERIOD => {
                u64::try_from(config.refresh.tick_period.as_millis()).unwrap_or(u64::MAX)
            }
            options::CONFIG_READCACHE_TICKS => self.engine.data_validity(),
            options::CONFIG_TLBCACHE_TICKS => self.engine.tlb_validity(),
            options::CONFIG_PROCCACHE_TICKS_PARTIAL => config.refresh.fast_ticks,
            options::CONFIG_PROCCACHE_TICKS_TOTAL => config.refresh.medium_ticks,
            options::CONFIG_VMM_VERSION_MAJOR => version_part(env!("CARGO_PKG_VERSION_MAJOR")),
            options::CONFIG_VMM_VERSION_MINOR => version_part(env!("CARGO_PKG_VERSION_MINOR")),
            options::CONFIG_VMM_VERSION_REVISION => version_part(env!("CARGO_PKG_VERSION_PATCH")),
            options::CONFIG_STATISTICS_FUNCTIONCALL => u64::from(self.stats.is_enabled()),
            options::CONFIG_IS_PAGING_ENABLED => u64::from(self.engine.paging_enabled()),
            options::WIN_VERSION_MAJOR => u64::from(system.version_major),
            options::WIN_VERSION_MINOR => u64::from(system.version_minor),
            options::WIN_VERSION_BUILD => u64::from(system.build),
            options::WIN_SYSTEM_UNIQUE_ID => u64::from(system.unique_id),
            options::FORENSIC_MODE => u64::from(self.forensic.mode()),
            id if options::is_refresh_trigger(id) => return Err(Error::WriteOnlyOption(key)),
            _ => return Err(Error::UnknownOption(key)),
        };
        Ok(value)
    }

    pub fn config_set(&self, key: u64, value: u64) -> Result<(), Error> {
        let _timer = self.stats.timer(Call::ConfigSet);
        let id = options::option_id(key);
        let invalid = || Error::InvalidValue { option: key, value };
        let ticks = || if value == 0 { Err(invalid()) } else { Ok(value) };
        debug!(key = %format_args!("{key:#018x}"), value, "config set");

        match id {
            options::CORE_PRINTF_ENABLE
            | options::CORE_VERBOSE
            | options::CORE_VERBOSE_EXTRA
            | options::CORE_VERBOSE_EXTRA_TLP => {
                let target = match id {
                    options::CORE_PRINTF_ENABLE => &self.verbosity.printf,
                    options::CORE_VERBOSE => &self.verbosity.verbose,
                    options::CORE_VERBOSE_EXTRA => &self.verbosity.extra,
                    _ => &self.verbosity.tlp,
                };
                target.store(value != 0, Ordering::Relaxed);
                self.notify_all(Notification::VerbosityChange);
            }
            options::CONFIG_TICK_PERIOD => {
                self.config.write().refresh.tick_period = Duration::from_millis(ticks()?);
            }
            options::CONFIG_READCACHE_TICKS => {
                let ticks = ticks()?;
                self.config.write().refresh.mem_ticks = ticks;
                self.engine.set_data_validity(ticks);
            }
            options::CONFIG_TLBCACHE_TICKS => {
                let ticks = ticks()?;
                self.config.write().refresh.tlb_ticks = ticks;
                self.engine.set_tlb_validity(ticks);
            }
            options::CONFIG_PROCCACHE_TICKS_PARTIAL => {
                self.config.write().refresh.fast_ticks = ticks()?;
            }
            options::CONFIG_PROCCACHE_TICKS_TOTAL => {
                self.config.write().refresh.medium_ticks = ticks()?;
            }
            options::CONFIG_STATISTICS_FUNCTIONCALL => self.stats.set_enabled(value != 0),
            options::CONFIG_IS_PAGING_ENABLED => {
                self.config.write().memory.paging_enabled = value != 0;
                self.engine.set_paging_enabled(value != 0);
            }
            options::FORENSIC_MODE => self.set_forensic_mode(key, value)?,
            options::REFRESH_ALL => self.refresh_all(),
            options::REFRESH_FREQ_MEM => self.engine.refresh_data(true),
            options::REFRESH_FREQ_TLB => self.engine.refresh_tlb(true),
            options::REFRESH_PAGING => {
                self.engine.refresh_tlb(true);
                self.engine.refresh_data(true);
            }
            options::REFRESH_FREQ_FAST => {
                self.refresh_fast();
            }
            options::REFRESH_FREQ_MEDIUM | options::REFRESH_OBJ => {
                self.refresh_medium();
            }
            options::REFRESH_FREQ_SLOW => {
                self.refresh_slow();
            }
            options::REFRESH_USER => self.globals.write().users = Arc::default(),
            options::REFRESH_PHYSMEMMAP => self.globals.write().physmem = Arc::default(),
            options::REFRESH_NET => self.globals.write().net = Arc::default(),
            // PFN records are never cached
            options::REFRESH_PFN => {}
            options::CORE_MAX_NATIVE_ADDRESS
            | options::CORE_SYSTEM
            | options::CORE_MEMORYMODEL
            | options::CONFIG_IS_REFRESH_ENABLED
            | options::CONFIG_VMM_VERSION_MAJOR
            | options::CONFIG_VMM_VERSION_MINOR
            | options::CONFIG_VMM_VERSION_REVISION
            | options::WIN_VERSION_MAJOR
            | options::WIN_VERSION_MINOR
            | options::WIN_VERSION_BUILD
            | options::WIN_SYSTEM_UNIQUE_ID => return Err(Error::ReadOnlyOption(key)),
            _ => return Err(Error::UnknownOption(key)),
        }
        Ok(())
    }

    /// Forensic mode can be entered once, on a non-volatile device.
    fn set_forensic_mode(&self, key: u64, value: u64) -> Result<(), Error> {
        let mode = u8::try_from(value)
            .ok()
            .filter(|mode| (1..=MAX_FORENSIC_MODE).contains(mode))
            .ok_or(Error::InvalidValue { option: key, value })?;
        if self.engine.device().is_volatile() {
            return Err(Error::Forensic("requires a non-volatile device"));
        }
        if self.forensic.mode() != 0 {
            return Err(Error::Forensic("mode already set"));
        }
        self.forensic.set_mode(mode);
        self.config.write().forensic.mode = mode;
        if self.plugins_initialized.load(Ordering::Acquire) {
            forensic::run(self)?;
        }
        Ok(())
    }

    // ---- refresh ----

    /// Advance the tick counter and run the refresh levels that fall due.
    pub fn tick(&self) -> TickReport {
        let tick = self.engine.tick();
        let (fast, medium, slow) = {
            let config = self.config.read();
            let refresh = &config.refresh;
            (
                refresh.fast_ticks.max(1),
                refresh.medium_ticks.max(1),
                refresh.slow_ticks.max(1),
            )
        };
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };
        if tick % slow == 0 {
            report.slow = self.refresh_slow();
        }
        if tick % medium == 0 {
            report.medium = self.refresh_medium();
        } else if tick % fast == 0 {
            report.fast = self.refresh_fast();
        }
        trace!(?report, "tick");
        report
    }

    /// Returns None while the level is already running.
    fn begin_refresh(&self, level: Level) -> Option<RefreshGuard<'_>> {
        let flag = &self.refreshing[level as usize];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard(flag))
    }

    fn publish_processes(&self, full: bool) {
        let current = self.processes.upgradable_read();
        let next = current.refreshed(self.provider.processes(), full);
        debug!(
            generation = next.generation,
            processes = next.len(),
            full,
            "process snapshot published"
        );
        *RwLockUpgradableReadGuard::upgrade(current) = Arc::new(next);
    }

    /// Partial process refresh. Returns false if one is already running.
    pub fn refresh_fast(&self) -> bool {
        let Some(_guard) = self.begin_refresh(Level::Fast) else {
            debug!("fast refresh coalesced");
            return false;
        };
        let span = debug_span!("refresh", level = "fast");
        let _enter = span.enter();
        self.publish_processes(false);
        self.notify_all(Notification::RefreshFast);
        true
    }

    /// Full process rebuild: every derived map is dropped.
    pub fn refresh_medium(&self) -> bool {
        let Some(_guard) = self.begin_refresh(Level::Medium) else {
            debug!("medium refresh coalesced");
            return false;
        };
        let span = debug_span!("refresh", level = "medium");
        let _enter = span.enter();
        self.publish_processes(true);
        self.globals.write().net = Arc::default();
        self.notify_all(Notification::RefreshMedium);
        true
    }

    /// System info, users, services and the physical memory map.
    pub fn refresh_slow(&self) -> bool {
        let Some(_guard) = self.begin_refresh(Level::Slow) else {
            debug!("slow refresh coalesced");
            return false;
        };
        let span = debug_span!("refresh", level = "slow");
        let _enter = span.enter();
        *self.system.write() = self.provider.system();
        {
            let mut globals = self.globals.write();
            globals.users = Arc::default();
            globals.services = Arc::default();
            globals.physmem = Arc::default();
        }
        self.notify_all(Notification::RefreshSlow);
        true
    }

    /// Drop every cache, then run the slow and medium levels.
    pub fn refresh_all(&self) {
        let span = info_span!("refresh_all");
        let _enter = span.enter();
        self.engine.refresh_all();
        self.refresh_slow();
        self.refresh_medium();
    }

    /// Deliver `event` to every active module with notify capability.
    pub fn notify_all(&self, event: Notification) {
        let registry = self.registry();
        for slot in registry.with_capability(Capabilities::NOTIFY) {
            let ctx = Context {
                vmm: self,
                process: None,
                path: "",
            };
            slot.lock().notify(&ctx, event);
        }
        trace!(?event, "notification delivered");
    }

    // ---- raw memory ----

    /// Address space of a caller pid. The kernel memory bit selects the
    /// full table root.
    fn space(&self, pid: u32) -> Result<AddressSpace, Error> {
        let (pid, kernel) = split_pid(pid);
        if pid == PID_PHYSICAL {
            return Ok(AddressSpace::Physical);
        }
        Ok(self.process(pid)?.space(kernel))
    }

    pub fn mem_read_scatter(&self, pid: u32, items: &mut [ScatterItem], flags: ReadFlags) -> usize {
        let _timer = self.stats.timer(Call::MemReadScatter);
        match self.space(pid) {
            Ok(space) => self.engine.read_scatter(space, items, flags),
            Err(err) => {
                debug!(pid, %err, "scatter read on unknown address space");
                0
            }
        }
    }

    pub fn mem_read(&self, pid: u32, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        let _timer = self.stats.timer(Call::MemRead);
        Ok(self.engine.read(self.space(pid)?, addr, len, ReadFlags::empty())?)
    }

    /// Bytes (zero filled where unreadable) and the count actually read.
    pub fn mem_read_ex(
        &self,
        pid: u32,
        addr: u64,
        len: usize,
        flags: ReadFlags,
    ) -> Result<(Vec<u8>, usize), Error> {
        let _timer = self.stats.timer(Call::MemReadEx);
        Ok(self.engine.read_ex(self.space(pid)?, addr, len, flags))
    }

    pub fn mem_read_page(&self, pid: u32, addr: u64) -> Result<Page, Error> {
        let _timer = self.stats.timer(Call::MemReadPage);
        Ok(self.engine.read_page(self.space(pid)?, addr, ReadFlags::empty())?)
    }

    pub fn mem_write(&self, pid: u32, addr: u64, data: &[u8]) -> Result<(), Error> {
        let _timer = self.stats.timer(Call::MemWrite);
        Ok(self.engine.write(self.space(pid)?, addr, data)?)
    }

    pub fn mem_prefetch(&self, pid: u32, addrs: &[u64]) -> Result<usize, Error> {
        let _timer = self.stats.timer(Call::MemPrefetch);
        Ok(self.engine.prefetch(self.space(pid)?, addrs))
    }

    pub fn mem_virt2phys(&self, pid: u32, va: u64) -> Result<u64, Error> {
        let _timer = self.stats.timer(Call::MemVirtToPhys);
        let space = self.space(pid)?;
        if space.is_physical() {
            return Err(Error::UnknownProcess(pid));
        }
        Ok(self.engine.virt_to_phys(space, va)?)
    }

    // ---- maps ----

    /// Maps are per process; the kernel memory bit is ignored.
    fn map_process(&self, pid: u32) -> Result<Arc<Process>, Error> {
        self.process(split_pid(pid).0)
    }

    fn modules_of(&self, process: &Process) -> Arc<Vec<ModuleEntry>> {
        process.maps.modules.get_or_init(|| {
            let mut modules = self.provider.modules(process);
            modules.sort_by_key(|m| m.base);
            modules.dedup_by_key(|m| m.base);
            modules
        })
    }

    fn vads_of(&self, process: &Process) -> Arc<Vec<VadEntry>> {
        process
            .maps
            .vad
            .get_or_init(|| build::vad_map(self.provider.vads(process)))
    }

    fn module_named(&self, process: &Process, name: &str) -> Result<ModuleEntry, Error> {
        let modules = self.modules_of(process);
        let found = if name.is_empty() {
            modules.first()
        } else {
            modules.iter().find(|m| m.name.eq_ignore_ascii_case(name))
        };
        found.cloned().ok_or_else(|| Error::UnknownModule(name.to_owned()))
    }

    /// Page table map sorted by virtual address, tagged with module names.
    pub fn map_pte(&self, pid: u32) -> Result<Arc<Vec<PteEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapPte);
        let process = self.map_process(pid)?;
        process.maps.pte.get_or_build(|| {
            let pages = self.engine.walk(process.space(false))?;
            let modules = self.modules_of(&process);
            Ok(build::pte_map(&pages, &modules, process.info.wow64))
        })
    }

    /// VAD map sorted by start address.
    pub fn map_vad(&self, pid: u32) -> Result<Arc<Vec<VadEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapVad);
        let process = self.map_process(pid)?;
        Ok(self.vads_of(&process))
    }

    /// Per-page view of the VAD map over `count` pages starting at page
    /// index `offset`.
    pub fn map_vadex(&self, pid: u32, offset: u32, count: u32) -> Result<Vec<VadExEntry>, Error> {
        let _timer = self.stats.timer(Call::MapVadEx);
        let process = self.map_process(pid)?;
        let vads = self.vads_of(&process);
        let space = process.space(false);
        Ok(build::vadex_map(&vads, offset, count, |va| {
            self.engine.translate(space, va).ok()
        }))
    }

    /// Loaded modules sorted by base.
    pub fn map_module(&self, pid: u32) -> Result<Arc<Vec<ModuleEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapModule);
        let process = self.map_process(pid)?;
        Ok(self.modules_of(&process))
    }

    /// Module by name, case-insensitive. An empty name selects the first
    /// module.
    pub fn map_module_from_name(&self, pid: u32, name: &str) -> Result<ModuleEntry, Error> {
        let _timer = self.stats.timer(Call::MapModuleFromName);
        let process = self.map_process(pid)?;
        self.module_named(&process, name)
    }

    pub fn map_unloaded_module(&self, pid: u32) -> Result<Arc<Vec<UnloadedModuleEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapUnloadedModule);
        let process = self.map_process(pid)?;
        Ok(process.maps.unloaded.get_or_init(|| {
            let mut unloaded = self.provider.unloaded_modules(&process);
            unloaded.sort_by_key(|m| m.base);
            unloaded
        }))
    }

    /// Export table sorted by ordinal.
    pub fn map_eat(&self, pid: u32, module: &str) -> Result<EatMap, Error> {
        let _timer = self.stats.timer(Call::MapEat);
        let process = self.map_process(pid)?;
        let module = self.module_named(&process, module)?;
        let mut map = self.provider.eat(&process, &module).unwrap_or_default();
        map.module_base = module.base;
        map.entries.sort_by_key(|e| e.ordinal);
        Ok(map)
    }

    pub fn map_iat(&self, pid: u32, module: &str) -> Result<IatMap, Error> {
        let _timer = self.stats.timer(Call::MapIat);
        let process = self.map_process(pid)?;
        let module = self.module_named(&process, module)?;
        let mut map = self.provider.iat(&process, &module).unwrap_or_default();
        map.module_base = module.base;
        Ok(map)
    }

    pub fn map_heap(&self, pid: u32) -> Result<Arc<Vec<HeapEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapHeap);
        let process = self.map_process(pid)?;
        Ok(process.maps.heaps.get_or_init(|| {
            let mut heaps = self.provider.heaps(&process);
            heaps.sort_by_key(|h| h.segment_va);
            heaps
        }))
    }

    /// Threads sorted by thread id.
    pub fn map_thread(&self, pid: u32) -> Result<Arc<Vec<ThreadEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapThread);
        let process = self.map_process(pid)?;
        Ok(process.maps.threads.get_or_init(|| {
            let mut threads = self.provider.threads(&process);
            threads.sort_by_key(|t| t.tid);
            threads.dedup_by_key(|t| t.tid);
            threads
        }))
    }

    /// Handles sorted by handle value.
    pub fn map_handle(&self, pid: u32) -> Result<Arc<Vec<HandleEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapHandle);
        let process = self.map_process(pid)?;
        Ok(process.maps.handles.get_or_init(|| {
            let mut handles = self.provider.handles(&process);
            handles.sort_by_key(|h| h.handle);
            handles
        }))
    }

    /// Connections sorted by pid, then object address.
    pub fn map_net(&self) -> Result<Arc<Vec<NetEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapNet);
        let lazy = self.globals.read().net.clone();
        Ok(lazy.get_or_init(|| {
            let mut net = self.provider.net();
            net.sort_by_key(|e| (e.pid, e.object_va));
            net
        }))
    }

    /// Physical memory ranges, merged. Falls back to the engine's memory
    /// map when the provider has none.
    pub fn map_physmem(&self) -> Result<Arc<Vec<PhysMemEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapPhysMem);
        let lazy = self.globals.read().physmem.clone();
        Ok(lazy.get_or_init(|| {
            let ranges = build::physmem_map(self.provider.physmem());
            if !ranges.is_empty() {
                return ranges;
            }
            self.engine
                .memmap()
                .into_iter()
                .map(|r| PhysMemEntry {
                    pa: r.base,
                    size: r.size,
                })
                .collect()
        }))
    }

    pub fn map_user(&self) -> Result<Arc<Vec<UserEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapUser);
        let lazy = self.globals.read().users.clone();
        Ok(lazy.get_or_init(|| {
            let mut users = self.provider.users();
            users.sort_by_cached_key(|u| u.name.to_ascii_lowercase());
            users
        }))
    }

    /// Services sorted by ordinal.
    pub fn map_service(&self) -> Result<Arc<Vec<ServiceEntry>>, Error> {
        let _timer = self.stats.timer(Call::MapService);
        let lazy = self.globals.read().services.clone();
        Ok(lazy.get_or_init(|| {
            let mut services = self.provider.services();
            services.sort_by_key(|s| s.ordinal);
            services
        }))
    }

    /// PFN records in request order. Unknown frames come back empty.
    pub fn map_pfn(&self, pfns: &[u32]) -> Vec<PfnEntry> {
        let _timer = self.stats.timer(Call::MapPfn);
        pfns.iter()
            .map(|&pfn| {
                self.provider.pfn(pfn).unwrap_or(PfnEntry {
                    pfn,
                    ..PfnEntry::default()
                })
            })
            .collect()
    }

    /// Encode a map into `buf`. With `None` only the required size is
    /// returned.
    pub fn map_blob(&self, query: MapQuery<'_>, buf: Option<&mut [u8]>) -> Result<usize, Error> {
        let blob = match query {
            MapQuery::Pte { pid } => encode_entries(self.map_pte(pid)?.as_slice()),
            MapQuery::Vad { pid } => encode_vad(self.map_vad(pid)?.as_slice()),
            MapQuery::VadEx { pid, offset, count } => {
                encode_entries(self.map_vadex(pid, offset, count)?.as_slice())
            }
            MapQuery::Module { pid } => encode_entries(self.map_module(pid)?.as_slice()),
            MapQuery::ModuleFromName { pid, name } => {
                encode_entries(std::slice::from_ref(&self.map_module_from_name(pid, name)?))
            }
            MapQuery::UnloadedModule { pid } => {
                encode_entries(self.map_unloaded_module(pid)?.as_slice())
            }
            MapQuery::Eat { pid, module } => encode_eat(&self.map_eat(pid, module)?),
            MapQuery::Iat { pid, module } => encode_iat(&self.map_iat(pid, module)?),
            MapQuery::Heap { pid } => encode_entries(self.map_heap(pid)?.as_slice()),
            MapQuery::Thread { pid } => encode_entries(self.map_thread(pid)?.as_slice()),
            MapQuery::Handle { pid } => encode_entries(self.map_handle(pid)?.as_slice()),
            MapQuery::Net => encode_entries(self.map_net()?.as_slice()),
            MapQuery::PhysMem => encode_entries(self.map_physmem()?.as_slice()),
            MapQuery::User => encode_entries(self.map_user()?.as_slice()),
            MapQuery::Service => encode_entries(self.map_service()?.as_slice()),
            MapQuery::Pfn(pfns) => encode_entries(&self.map_pfn(pfns)),
        };
        copy_out(&blob, buf)
    }

    // ---- processes ----

    pub fn pid_from_name(&self, name: &str) -> Result<u32, Error> {
        let _timer = self.stats.timer(Call::PidFromName);
        self.processes()
            .find_by_name(name)
            .map(|p| p.pid)
            .ok_or_else(|| Error::ProcessNotFound(name.to_owned()))
    }

    /// Pids of the current snapshot, ascending.
    pub fn pid_list(&self) -> Vec<u32> {
        let _timer = self.stats.timer(Call::PidList);
        self.processes().pids()
    }

    pub fn process_information(&self, pid: u32) -> Result<ProcessInformation, Error> {
        let _timer = self.stats.timer(Call::ProcessInformation);
        let process = self.map_process(pid)?;
        Ok(ProcessInformation {
            memory_model: self.engine.model(),
            system_type: self.system.read().system_type.code(),
            record: process.info.clone(),
        })
    }

    /// Fixed layout record through the two-call convention.
    pub fn process_information_blob(&self, pid: u32, buf: Option<&mut [u8]>) -> Result<usize, Error> {
        copy_out(&self.process_information(pid)?.encode(), buf)
    }

    pub fn process_string(&self, pid: u32, which: ProcessString) -> Result<String, Error> {
        let _timer = self.stats.timer(Call::ProcessString);
        let process = self.map_process(pid)?;
        Ok(match which {
            ProcessString::KernelPath => process.info.kernel_path.clone(),
            ProcessString::UserPath => process.info.user_path.clone(),
            ProcessString::Cmdline => process.info.cmdline.clone(),
        })
    }

    pub fn module_base(&self, pid: u32, module: &str) -> Result<u64, Error> {
        let _timer = self.stats.timer(Call::ModuleBase);
        let process = self.map_process(pid)?;
        Ok(self.module_named(&process, module)?.base)
    }

    /// Address of an exported function. Names compare case-sensitively.
    pub fn proc_address(&self, pid: u32, module: &str, function: &str) -> Result<u64, Error> {
        let _timer = self.stats.timer(Call::ProcAddress);
        let eat = self.map_eat(pid, module)?;
        eat.entries
            .iter()
            .find(|e| e.name == function)
            .map(|e| e.function_va)
            .ok_or_else(|| Error::UnknownExport(function.to_owned()))
    }

    // ---- virtual filesystem ----

    /// Entries of a directory, or `None` if `path` is not one.
    pub fn vfs_list(&self, path: &str) -> Option<Listing> {
        let _timer = self.stats.timer(Call::VfsList);
        vfs::list(self, path)
    }

    pub fn vfs_read(&self, path: &str, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        let _timer = self.stats.timer(Call::VfsRead);
        vfs::read(self, path, buf, offset)
    }

    pub fn vfs_write(&self, path: &str, data: &[u8], offset: u64) -> (VfsStatus, usize) {
        let _timer = self.stats.timer(Call::VfsWrite);
        vfs::write(self, path, data, offset)
    }
}

impl Drop for Vmm {
    fn drop(&mut self) {
        self.close();
    }
}
