use crate::cache::{Lookup, Pool, PoolStats, Source};
use crate::device::Device;
use crate::error::Error;
use crate::flags::ReadFlags;
use crate::inflight::{Claim, InFlight};
use crate::paging::{
    Fault, FaultReason, MappedPage, PageWalker, PteKind, SoftPage, TableSource, Translation,
};
use crate::scatter::{ScatterItem, scatter_pages};
use crate::space::AddressSpace;
use crate::types::{
    MemoryModel, PAGE_SIZE, Page, fragments, page_base, page_from_slice, page_offset,
};
use config::{CachePolicy, Config, PhysRange};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, trace_span};

type WalkKey = (u64, u64, bool);

#[derive(Debug, Clone)]
struct Settings {
    paging_enabled: bool,
    x64_levels: u8,
    predictive_pages: u32,
    predictive_threshold: u32,
    memmap: Vec<PhysRange>,
}

#[derive(Debug, Default)]
struct Counters {
    scatter_calls: AtomicU64,
    items_requested: AtomicU64,
    items_satisfied: AtomicU64,
    device_batches: AtomicU64,
    device_pages: AtomicU64,
    predicted_pages: AtomicU64,
    zero_padded: AtomicU64,
    recovered: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub tick: u64,
    pub model: MemoryModel,
    pub data: PoolStats,
    pub tables: PoolStats,
    pub walks: PoolStats,
    pub scatter_calls: u64,
    pub items_requested: u64,
    pub items_satisfied: u64,
    pub device_batches: u64,
    pub device_pages: u64,
    pub coalesced: u64,
    pub predicted_pages: u64,
    pub zero_padded: u64,
    pub recovered: u64,
}

/// How one scatter item will be satisfied.
#[derive(Debug, Clone, Copy)]
enum Plan {
    Phys(u64),
    /// Inside the physical range but outside the memory map.
    Unbacked(u64),
    Zero,
    Recover(SoftPage),
    Fail,
}

/// Shared address space engine. Cheap to share behind an `Arc`; every
/// method takes `&self`.
pub struct MemoryEngine {
    device: Arc<dyn Device>,
    walker: RwLock<Option<Arc<PageWalker>>>,
    settings: RwLock<Settings>,
    data: Pool<u64, Page>,
    tables: Pool<u64, Page>,
    walks: Pool<WalkKey, Translation>,
    inflight: InFlight,
    tick: AtomicU64,
    counters: Counters,
}

impl MemoryEngine {
    pub fn new(device: Arc<dyn Device>, config: &Config) -> Self {
        let regions = config.cache.regions();
        let engine = Self {
            device,
            walker: RwLock::new(None),
            settings: RwLock::new(Settings {
                paging_enabled: config.memory.paging_enabled,
                x64_levels: config.memory.x64_levels,
                predictive_pages: config.cache.predictive_read_pages,
                predictive_threshold: config.cache.predictive_read_threshold,
                memmap: config.memory.normalized_memmap(),
            }),
            data: Pool::new("data", regions, config.refresh.mem_ticks),
            tables: Pool::new("tlb", regions, config.refresh.tlb_ticks),
            walks: Pool::new("walk", regions, config.refresh.tlb_ticks),
            inflight: InFlight::default(),
            tick: AtomicU64::new(0),
            counters: Counters::default(),
        };
        engine.set_memory_model(config.memory.model.into());
        engine
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn model(&self) -> MemoryModel {
        self.walker
            .read()
            .as_ref()
            .map_or(MemoryModel::Na, |walker| walker.model())
    }

    /// Select the paging model. Cached walks are dropped.
    pub fn set_memory_model(&self, model: MemoryModel) {
        let levels = self.settings.read().x64_levels;
        *self.walker.write() = PageWalker::for_model(model, levels).map(Arc::new);
        self.walks.clear();
        debug!(%model, "memory model set");
    }

    pub fn set_x64_levels(&self, levels: u8) {
        self.settings.write().x64_levels = levels;
        let model = self.model();
        if model == MemoryModel::X64 {
            self.set_memory_model(model);
        }
    }

    pub fn paging_enabled(&self) -> bool {
        self.settings.read().paging_enabled
    }

    pub fn set_paging_enabled(&self, enabled: bool) {
        self.settings.write().paging_enabled = enabled;
        self.walks.clear();
    }

    pub fn set_data_validity(&self, ticks: u64) {
        self.data.set_validity(ticks);
    }

    pub fn set_tlb_validity(&self, ticks: u64) {
        self.tables.set_validity(ticks);
        self.walks.set_validity(ticks);
    }

    pub fn data_validity(&self) -> u64 {
        self.data.validity()
    }

    pub fn tlb_validity(&self) -> u64 {
        self.tables.validity()
    }

    pub fn set_cache_policy(&self, policy: CachePolicy) {
        let policy = policy.clamp();
        let regions = policy.regions();
        self.data.set_regions(regions);
        self.tables.set_regions(regions);
        self.walks.set_regions(regions);
        let mut settings = self.settings.write();
        settings.predictive_pages = policy.predictive_read_pages;
        settings.predictive_threshold = policy.predictive_read_threshold;
    }

    /// Replace the physical memory map. An empty map means "the whole device".
    pub fn set_memmap(&self, ranges: Vec<PhysRange>) {
        let memory = config::Memory {
            memmap: ranges,
            ..config::Memory::default()
        };
        self.settings.write().memmap = memory.normalized_memmap();
        self.refresh_all();
    }

    pub fn memmap(&self) -> Vec<PhysRange> {
        let settings = self.settings.read();
        if settings.memmap.is_empty() {
            vec![PhysRange {
                base: 0,
                size: self.device.max_address(),
            }]
        } else {
            settings.memmap.clone()
        }
    }

    /// One past the highest physical address the engine will consider.
    pub fn max_address(&self) -> u64 {
        let settings = self.settings.read();
        settings
            .memmap
            .iter()
            .map(PhysRange::end)
            .max()
            .unwrap_or_else(|| self.device.max_address())
    }

    /// Whether `pa` is backed by the device and the memory map.
    fn is_backed(&self, pa: u64) -> bool {
        if pa >= self.device.max_address() {
            return false;
        }
        let settings = self.settings.read();
        settings.memmap.is_empty()
            || settings
                .memmap
                .iter()
                .any(|range| pa >= range.base && pa < range.end())
    }

    pub fn now(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Advance the tick counter and age each pool on its sweep period.
    pub fn tick(&self) -> u64 {
        let now = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        self.data.tick(now);
        self.tables.tick(now);
        self.walks.tick(now);
        now
    }

    /// Partial refresh ages one region, full refresh drops the pool.
    pub fn refresh_data(&self, full: bool) {
        if full {
            self.data.clear();
        } else {
            self.data.age();
        }
    }

    pub fn refresh_tlb(&self, full: bool) {
        if full {
            self.tables.clear();
            self.walks.clear();
        } else {
            self.tables.age();
            self.walks.age();
        }
    }

    pub fn refresh_all(&self) {
        self.refresh_data(true);
        self.refresh_tlb(true);
        debug!("memory caches cleared");
    }

    fn walker(&self) -> Option<Arc<PageWalker>> {
        self.walker.read().clone()
    }

    fn translate_page(&self, dtb: u64, user_only: bool, va: u64) -> Result<Translation, Fault> {
        let now = self.now();
        let key = (dtb, page_base(va), user_only);
        if let Some(hit) = self.walks.get(&key, now, Lookup::default()) {
            return Ok(hit.at(va));
        }
        let walker = self.walker().ok_or(Fault {
            va,
            reason: FaultReason::NoModel,
        })?;
        let translation = walker.translate(self, dtb, page_base(va), user_only)?;
        self.walks.put(key, translation, now, Source::Backend);
        Ok(translation.at(va))
    }

    /// Translate a virtual address, reporting soft states as well.
    pub fn translate(&self, space: AddressSpace, va: u64) -> Result<Translation, Error> {
        match space {
            AddressSpace::Physical => Ok(Translation {
                va,
                kind: PteKind::Hardware,
                pa: va,
                pte: 0,
                page_size: PAGE_SIZE as u64,
                writable: true,
                user: false,
                nx: false,
            }),
            AddressSpace::Virtual { dtb, user_only } => {
                Ok(self.translate_page(dtb, user_only, va)?)
            }
        }
    }

    /// Physical address of a hardware resident virtual address.
    pub fn virt_to_phys(&self, space: AddressSpace, va: u64) -> Result<u64, Error> {
        let translation = self.translate(space, va)?;
        if translation.kind != PteKind::Hardware {
            return Err(Fault {
                va,
                reason: FaultReason::NotResident(translation.kind),
            }
            .into());
        }
        Ok(translation.pa)
    }

    /// Every present leaf of a virtual space, sorted by virtual address.
    pub fn walk(&self, space: AddressSpace) -> Result<Vec<MappedPage>, Error> {
        let AddressSpace::Virtual { dtb, user_only } = space else {
            return Ok(Vec::new());
        };
        let walker = self.walker().ok_or(Fault {
            va: 0,
            reason: FaultReason::NoModel,
        })?;
        Ok(walker.walk(self, dtb, user_only))
    }

    fn plan(&self, space: AddressSpace, addr: u64, flags: ReadFlags, paging: bool) -> Plan {
        let (dtb, user_only) = match space {
            AddressSpace::Physical => {
                return if self.is_backed(addr) {
                    Plan::Phys(addr)
                } else {
                    Plan::Unbacked(addr)
                };
            }
            AddressSpace::Virtual { dtb, user_only } => (dtb, user_only),
        };

        let translation = match self.translate_page(dtb, user_only, addr) {
            Ok(translation) => translation,
            Err(fault) => {
                trace!(%fault, "translation failed");
                return Plan::Fail;
            }
        };
        let soft_ok = paging && !flags.contains(ReadFlags::NOPAGING);
        let io_ok = soft_ok && !flags.contains(ReadFlags::NOPAGING_IO);
        match translation.kind {
            PteKind::Hardware => Plan::Phys(translation.pa),
            PteKind::Transition if soft_ok => Plan::Phys(translation.pa),
            PteKind::DemandZero if soft_ok => Plan::Zero,
            PteKind::Prototype | PteKind::Compressed | PteKind::PageFile if io_ok => {
                match self.walker() {
                    Some(walker) => Plan::Recover(walker.soft_page(dtb, &translation)),
                    None => Plan::Fail,
                }
            }
            _ => Plan::Fail,
        }
    }

    fn device_read(&self, items: &mut [ScatterItem]) {
        self.counters.device_batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .device_pages
            .fetch_add(items.len() as u64, Ordering::Relaxed);
        trace!(pages = items.len(), "device read");
        self.device.read_scatter(items);
    }

    /// Read whole pages from the device, coalescing with concurrent readers
    /// and reading ahead when the request is small.
    fn fetch(
        &self,
        pages: &[u64],
        flags: ReadFlags,
        now: u64,
        request_pages: usize,
    ) -> HashMap<u64, Page> {
        let mut fetched = HashMap::with_capacity(pages.len());
        let mut leaders = Vec::new();
        let mut followers = Vec::new();
        for &pa in pages {
            if !self.is_backed(pa) {
                continue;
            }
            match self.inflight.claim(pa) {
                Claim::Leader(leader) => {
                    // another leader may have finished since our cache miss
                    if flags.uses_cache()
                        && let Some(page) = self.data.peek(&pa, now)
                    {
                        fetched.insert(pa, page.clone());
                        leader.complete(Some(page));
                        continue;
                    }
                    leaders.push((leader, Source::Backend));
                }
                Claim::Follower(slot) => followers.push((pa, slot)),
            }
        }

        let (predict, threshold) = {
            let settings = self.settings.read();
            (settings.predictive_pages, settings.predictive_threshold)
        };
        let predictive = predict > 0
            && !leaders.is_empty()
            && request_pages <= threshold as usize
            && !flags.intersects(ReadFlags::NO_PREDICTIVE_READ | ReadFlags::NOCACHEPUT);
        if predictive {
            for &pa in pages {
                for n in 1..=u64::from(predict) {
                    let next = pa + n * PAGE_SIZE as u64;
                    if !self.is_backed(next) || self.data.contains_fresh(&next, now) {
                        continue;
                    }
                    if let Some(leader) = self.inflight.try_lead(next) {
                        leaders.push((leader, Source::Predictive));
                    }
                }
            }
        }

        if !leaders.is_empty() {
            let mut items: Vec<ScatterItem> = leaders
                .iter()
                .map(|(leader, _)| ScatterItem::page(leader.pa()))
                .collect();
            self.device_read(&mut items);
            for ((leader, source), item) in leaders.into_iter().zip(items) {
                let page = item.ok.then(|| page_from_slice(&item.data));
                if let Some(page) = &page {
                    if !flags.contains(ReadFlags::NOCACHEPUT) {
                        self.data.put(leader.pa(), page.clone(), now, source);
                    }
                    match source {
                        Source::Backend => {
                            fetched.insert(leader.pa(), page.clone());
                        }
                        Source::Predictive => {
                            self.counters.predicted_pages.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                leader.complete(page);
            }
        }

        for (pa, slot) in followers {
            if let Some(page) = slot.wait() {
                fetched.insert(pa, page);
            }
        }
        fetched
    }

    fn recover(&self, soft: &SoftPage, item: &mut ScatterItem) -> bool {
        let mut page = [0u8; PAGE_SIZE];
        if !self.device.recover_page(soft, &mut page) {
            trace!(va = %format_args!("{:#x}", soft.va), kind = %soft.kind, "soft page not recovered");
            return false;
        }
        self.counters.recovered.fetch_add(1, Ordering::Relaxed);
        let offset = page_offset(item.addr);
        let len = item.data.len();
        item.data.copy_from_slice(&page[offset..offset + len]);
        true
    }

    /// Fill every item independently; returns the number fully satisfied.
    ///
    /// Cache hits are served first, all misses go to the device as one
    /// batch. With FORCECACHE_READ a cache miss fails the item, and
    /// ZEROPAD_ON_FAIL only covers device failures in physical space.
    pub fn read_scatter(
        &self,
        space: AddressSpace,
        items: &mut [ScatterItem],
        flags: ReadFlags,
    ) -> usize {
        let span = trace_span!("read_scatter", %space, items = items.len(), flags = flags.bits());
        let _enter = span.enter();
        self.counters.scatter_calls.fetch_add(1, Ordering::Relaxed);
        self.counters
            .items_requested
            .fetch_add(items.len() as u64, Ordering::Relaxed);

        let now = self.now();
        let paging = self.paging_enabled();
        let lookup = Lookup {
            recent_only: flags.contains(ReadFlags::CACHE_RECENT_ONLY),
            allow_stale: flags.contains(ReadFlags::FORCECACHE_READ),
        };
        let force_cache = flags.contains(ReadFlags::FORCECACHE_READ);
        let zeropad = space.is_physical() && flags.contains(ReadFlags::ZEROPAD_ON_FAIL);

        let mut pending: Vec<Option<u64>> = vec![None; items.len()];
        let mut misses = Vec::new();
        for (item, pending) in items.iter_mut().zip(pending.iter_mut()) {
            item.ok = false;
            if !item.is_well_formed() {
                item.fail();
                continue;
            }
            match self.plan(space, item.addr, flags, paging) {
                Plan::Phys(pa) => {
                    if flags.uses_cache()
                        && let Some(page) = self.data.get(&page_base(pa), now, lookup)
                    {
                        let offset = page_offset(pa);
                        let len = item.data.len();
                        item.data.copy_from_slice(&page[offset..offset + len]);
                        item.ok = true;
                        continue;
                    }
                    if force_cache {
                        item.fail();
                        continue;
                    }
                    misses.push(page_base(pa));
                    *pending = Some(pa);
                }
                Plan::Unbacked(pa) => {
                    if zeropad && pa < self.max_address() {
                        item.data.fill(0);
                        item.ok = true;
                        self.counters.zero_padded.fetch_add(1, Ordering::Relaxed);
                    } else {
                        item.fail();
                    }
                }
                Plan::Zero => {
                    item.data.fill(0);
                    item.ok = true;
                }
                Plan::Recover(soft) => {
                    if !self.recover(&soft, item) {
                        item.fail();
                    }
                }
                Plan::Fail => item.fail(),
            }
        }

        misses.sort_unstable();
        misses.dedup();
        let fetched = if misses.is_empty() {
            HashMap::new()
        } else {
            self.fetch(&misses, flags, now, items.len())
        };

        for (item, pending) in items.iter_mut().zip(pending) {
            let Some(pa) = pending else {
                continue;
            };
            if let Some(page) = fetched.get(&page_base(pa)) {
                let offset = page_offset(pa);
                let len = item.data.len();
                item.data.copy_from_slice(&page[offset..offset + len]);
                item.ok = true;
            } else if zeropad {
                item.data.fill(0);
                item.ok = true;
                self.counters.zero_padded.fetch_add(1, Ordering::Relaxed);
            } else {
                item.fail();
            }
        }

        let satisfied = items.iter().filter(|item| item.ok).count();
        self.counters
            .items_satisfied
            .fetch_add(satisfied as u64, Ordering::Relaxed);
        trace!(satisfied, "read_scatter done");
        satisfied
    }

    /// Contiguous read of any length. Returns the buffer (failed ranges
    /// zeroed) and the number of bytes actually read.
    pub fn read_ex(
        &self,
        space: AddressSpace,
        addr: u64,
        len: usize,
        flags: ReadFlags,
    ) -> (Vec<u8>, usize) {
        let mut out = vec![0u8; len];
        if len == 0 {
            return (out, 0);
        }
        let mut items = scatter_pages(addr, len);
        self.read_scatter(space, &mut items, flags);
        let mut read = 0;
        for ((cur, offset, chunk), item) in fragments(addr, len).zip(&items) {
            if !item.ok {
                continue;
            }
            let start = page_offset(cur);
            out[offset..offset + chunk].copy_from_slice(&item.data[start..start + chunk]);
            read += chunk;
        }
        (out, read)
    }

    /// All-or-nothing contiguous read.
    pub fn read(
        &self,
        space: AddressSpace,
        addr: u64,
        len: usize,
        flags: ReadFlags,
    ) -> Result<Vec<u8>, Error> {
        let (out, read) = self.read_ex(space, addr, len, flags);
        if read != len {
            return Err(Error::PartialRead {
                addr,
                read,
                requested: len,
            });
        }
        Ok(out)
    }

    /// The full page containing `addr`.
    pub fn read_page(&self, space: AddressSpace, addr: u64, flags: ReadFlags) -> Result<Page, Error> {
        let mut items = [ScatterItem::page(addr)];
        if self.read_scatter(space, &mut items, flags) != 1 {
            return Err(Error::PartialRead {
                addr: page_base(addr),
                read: 0,
                requested: PAGE_SIZE,
            });
        }
        Ok(page_from_slice(&items[0].data))
    }

    fn invalidate_page(&self, pa: u64) {
        self.data.invalidate(&pa);
        if self.tables.invalidate(&pa) {
            // a page table changed under cached walks
            self.walks.clear();
        }
    }

    /// Write `data` at `addr`, bypassing the cache.
    ///
    /// All fragments are resolved before anything is written. A short
    /// device write fails the call even though earlier fragments landed.
    pub fn write(&self, space: AddressSpace, addr: u64, data: &[u8]) -> Result<(), Error> {
        let span = trace_span!("write", %space, addr = %format_args!("{addr:#x}"), len = data.len());
        let _enter = span.enter();
        let mut targets = Vec::new();
        for (cur, offset, chunk) in fragments(addr, data.len()) {
            let pa = match space {
                AddressSpace::Physical => {
                    if !self.is_backed(cur) || !self.is_backed(cur + chunk as u64 - 1) {
                        return Err(Error::OutOfRange(cur));
                    }
                    cur
                }
                AddressSpace::Virtual { dtb, user_only } => {
                    let translation = self.translate_page(dtb, user_only, cur)?;
                    if translation.kind != PteKind::Hardware {
                        return Err(Fault {
                            va: cur,
                            reason: FaultReason::NotResident(translation.kind),
                        }
                        .into());
                    }
                    translation.pa
                }
            };
            targets.push((cur, pa, offset, chunk));
        }

        let mut written = 0;
        for (cur, pa, offset, chunk) in targets {
            let result = self.device.write(pa, &data[offset..offset + chunk]);
            self.invalidate_page(page_base(pa));
            let n = result?;
            written += n;
            if n < chunk {
                return Err(Error::WriteFailed {
                    addr: cur,
                    written,
                    requested: data.len(),
                });
            }
        }
        Ok(())
    }

    /// Load pages into the data cache ahead of use. Returns the number of
    /// pages read from the device.
    pub fn prefetch(&self, space: AddressSpace, addrs: &[u64]) -> usize {
        let now = self.now();
        let paging = self.paging_enabled();
        let mut pages: Vec<u64> = addrs
            .iter()
            .filter_map(|&addr| match self.plan(space, addr, ReadFlags::empty(), paging) {
                Plan::Phys(pa) => Some(page_base(pa)),
                _ => None,
            })
            .filter(|pa| !self.data.contains_fresh(pa, now))
            .collect();
        pages.sort_unstable();
        pages.dedup();
        if pages.is_empty() {
            return 0;
        }
        self.device.prefetch(&pages);
        let n = pages.len();
        self.fetch(&pages, ReadFlags::NO_PREDICTIVE_READ, now, n)
            .len()
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            tick: self.now(),
            model: self.model(),
            data: self.data.stats(),
            tables: self.tables.stats(),
            walks: self.walks.stats(),
            scatter_calls: c.scatter_calls.load(Ordering::Relaxed),
            items_requested: c.items_requested.load(Ordering::Relaxed),
            items_satisfied: c.items_satisfied.load(Ordering::Relaxed),
            device_batches: c.device_batches.load(Ordering::Relaxed),
            device_pages: c.device_pages.load(Ordering::Relaxed),
            coalesced: self.inflight.coalesced(),
            predicted_pages: c.predicted_pages.load(Ordering::Relaxed),
            zero_padded: c.zero_padded.load(Ordering::Relaxed),
            recovered: c.recovered.load(Ordering::Relaxed),
        }
    }
}

impl TableSource for MemoryEngine {
    fn table_page(&self, pa: u64) -> Option<Page> {
        let now = self.now();
        if let Some(page) = self.tables.get(&pa, now, Lookup::default()) {
            return Some(page);
        }
        if !self.is_backed(pa) {
            return None;
        }
        let mut items = [ScatterItem::page(pa)];
        self.device_read(&mut items);
        if !items[0].ok {
            return None;
        }
        let page = page_from_slice(&items[0].data);
        self.tables.put(pa, page.clone(), now, Source::Backend);
        Some(page)
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("model", &self.model())
            .field("tick", &self.now())
            .field("max_address", &self.max_address())
            .finish_non_exhaustive()
    }
}
