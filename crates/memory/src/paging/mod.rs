mod pae;
mod soft;
mod x64;
mod x86;

pub use soft::{SoftLayout, SoftPage};

use crate::types::{MemoryModel, PAGE_MASK, PAGE_SIZE, Page, page_offset};
use std::fmt;

const PTE_PRESENT: u64 = 1 << 0;
const PTE_WRITE: u64 = 1 << 1;
const PTE_USER: u64 = 1 << 2;
const PTE_LARGE: u64 = 1 << 7;
const PTE_NX: u64 = 1 << 63;

/// State of the page a virtual address resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PteKind {
    /// Present in hardware page tables.
    Hardware,
    /// Frame still in RAM on a standby/modified list.
    Transition,
    /// Backed by a prototype PTE.
    Prototype,
    /// Not yet touched; reads as zeros.
    DemandZero,
    /// Held in the compressed store.
    Compressed,
    /// Written out to a page file.
    PageFile,
}

impl PteKind {
    /// Soft states readable without additional device I/O.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Hardware | Self::Transition | Self::DemandZero)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Transition => "transition",
            Self::Prototype => "prototype",
            Self::DemandZero => "demand-zero",
            Self::Compressed => "compressed",
            Self::PageFile => "pagefile",
        }
    }
}

impl fmt::Display for PteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultReason {
    #[error("no memory model")]
    NoModel,
    #[error("non-canonical address")]
    NonCanonical,
    #[error("not present at level {0}")]
    NotPresent(u8),
    #[error("page table at level {0} unreadable")]
    TableUnreadable(u8),
    #[error("supervisor page in user-only space")]
    Supervisor,
    #[error("page is not resident ({0})")]
    NotResident(PteKind),
}

/// A failed translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{reason} at {va:#x}")]
pub struct Fault {
    pub va: u64,
    pub reason: FaultReason,
}

/// Successful translation of one virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub va: u64,
    pub kind: PteKind,
    /// Physical address for hardware and transition pages, 0 otherwise.
    pub pa: u64,
    /// Raw leaf entry.
    pub pte: u64,
    pub page_size: u64,
    pub writable: bool,
    pub user: bool,
    pub nx: bool,
}

impl Translation {
    pub fn is_resident(&self) -> bool {
        self.kind == PteKind::Hardware
    }

    /// Same translation moved to another address within the page.
    pub fn at(&self, va: u64) -> Self {
        let delta = va.wrapping_sub(self.va);
        Self {
            va,
            pa: match self.kind {
                PteKind::Hardware | PteKind::Transition => self.pa.wrapping_add(delta),
                _ => 0,
            },
            ..*self
        }
    }
}

/// One present leaf found while enumerating page tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedPage {
    pub va: u64,
    pub pa: u64,
    pub size: u64,
    pub writable: bool,
    pub user: bool,
    pub nx: bool,
}

/// Supplies page table pages to the walker.
pub trait TableSource {
    /// Page aligned physical page, or `None` when unreadable.
    fn table_page(&self, pa: u64) -> Option<Page>;
}

#[derive(Debug, Clone, Copy)]
struct Level {
    shift: u32,
    bits: u32,
    large: bool,
}

#[derive(Debug, Clone, Copy)]
struct Flags {
    writable: bool,
    user: bool,
    nx: bool,
}

/// Table driven page walker shared by all memory models.
#[derive(Debug, Clone)]
pub struct PageWalker {
    model: MemoryModel,
    entry_size: usize,
    levels: Vec<Level>,
    frame_mask: u64,
    root_mask: u64,
    va_bits: u32,
    canonical: bool,
    root_has_flags: bool,
    soft: SoftLayout,
}

impl PageWalker {
    /// Walker for `model`; `x64_levels` selects 4 or 5 level paging.
    pub fn for_model(model: MemoryModel, x64_levels: u8) -> Option<Self> {
        match model {
            MemoryModel::Na => None,
            MemoryModel::X86 => Some(x86::walker()),
            MemoryModel::X86Pae => Some(pae::walker()),
            MemoryModel::X64 => Some(x64::walker(x64_levels)),
        }
    }

    pub fn model(&self) -> MemoryModel {
        self.model
    }

    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    fn is_canonical(&self, va: u64) -> bool {
        if self.canonical {
            self.sign_extend(va) == va
        } else {
            va >> self.va_bits == 0
        }
    }

    fn sign_extend(&self, va: u64) -> u64 {
        if !self.canonical {
            return va;
        }
        let shift = 64 - self.va_bits;
        (((va << shift) as i64) >> shift) as u64
    }

    fn entry(&self, page: &Page, offset: usize) -> u64 {
        let bytes = &page[offset..offset + self.entry_size];
        match self.entry_size {
            4 => u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            _ => u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
        }
    }

    fn accumulate(&self, flags: Flags, entry: u64, depth: usize) -> Flags {
        let has_flags = depth > 0 || self.root_has_flags;
        Flags {
            writable: flags.writable && (!has_flags || entry & PTE_WRITE != 0),
            user: flags.user && (!has_flags || entry & PTE_USER != 0),
            nx: flags.nx || (self.entry_size == 8 && entry & PTE_NX != 0),
        }
    }

    /// Translate `va` through the tables rooted at `dtb`.
    ///
    /// Non-present leaf entries decode to soft states instead of failing
    /// when they still describe recoverable data.
    pub fn translate(
        &self,
        src: &dyn TableSource,
        dtb: u64,
        va: u64,
        user_only: bool,
    ) -> Result<Translation, Fault> {
        let fault = |reason| Fault { va, reason };
        if !self.is_canonical(va) {
            return Err(fault(FaultReason::NonCanonical));
        }

        let mut table = dtb & self.root_mask;
        let mut flags = Flags {
            writable: true,
            user: true,
            nx: false,
        };
        let last = self.levels.len() - 1;
        for (depth, level) in self.levels.iter().enumerate() {
            let index = (va >> level.shift) & ((1u64 << level.bits) - 1);
            let entry_pa = table + index * self.entry_size as u64;
            let page = src
                .table_page(entry_pa & PAGE_MASK)
                .ok_or(fault(FaultReason::TableUnreadable(depth as u8)))?;
            let entry = self.entry(&page, page_offset(entry_pa));

            if entry & PTE_PRESENT == 0 {
                if depth == last && entry != 0 {
                    return self.soft_translation(va, entry, flags);
                }
                return Err(fault(FaultReason::NotPresent(depth as u8)));
            }

            flags = self.accumulate(flags, entry, depth);
            let is_large = level.large && entry & PTE_LARGE != 0;
            if depth == last || is_large {
                if user_only && !flags.user {
                    return Err(fault(FaultReason::Supervisor));
                }
                let size = 1u64 << level.shift;
                let frame = entry & self.frame_mask & !(size - 1);
                return Ok(Translation {
                    va,
                    kind: PteKind::Hardware,
                    pa: frame + (va & (size - 1)),
                    pte: entry,
                    page_size: size,
                    writable: flags.writable,
                    user: flags.user,
                    nx: flags.nx,
                });
            }
            table = entry & self.frame_mask;
        }
        Err(fault(FaultReason::NotPresent(last as u8)))
    }

    fn soft_translation(&self, va: u64, entry: u64, flags: Flags) -> Result<Translation, Fault> {
        let kind = self.soft.decode(entry).ok_or(Fault {
            va,
            reason: FaultReason::NotPresent((self.levels.len() - 1) as u8),
        })?;
        let pa = match kind {
            PteKind::Transition => (entry & self.frame_mask) + page_offset(va) as u64,
            _ => 0,
        };
        Ok(Translation {
            va,
            kind,
            pa,
            pte: entry,
            page_size: PAGE_SIZE as u64,
            writable: flags.writable,
            user: flags.user,
            nx: flags.nx,
        })
    }

    /// Describe a soft translation for the acquisition device.
    pub fn soft_page(&self, dtb: u64, translation: &Translation) -> SoftPage {
        self.soft.page(dtb, translation)
    }

    /// Enumerate every present leaf reachable from `dtb`, in address order.
    pub fn walk(&self, src: &dyn TableSource, dtb: u64, user_only: bool) -> Vec<MappedPage> {
        let mut out = Vec::new();
        let flags = Flags {
            writable: true,
            user: true,
            nx: false,
        };
        self.walk_table(src, dtb & self.root_mask, 0, 0, flags, user_only, &mut out);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_table(
        &self,
        src: &dyn TableSource,
        table: u64,
        depth: usize,
        prefix: u64,
        flags: Flags,
        user_only: bool,
        out: &mut Vec<MappedPage>,
    ) {
        let Some(page) = src.table_page(table & PAGE_MASK) else {
            return;
        };
        let level = self.levels[depth];
        let base = page_offset(table);
        let last = self.levels.len() - 1;
        for index in 0..(1u64 << level.bits) {
            let entry = self.entry(&page, base + index as usize * self.entry_size);
            if entry & PTE_PRESENT == 0 {
                continue;
            }
            let flags = self.accumulate(flags, entry, depth);
            if user_only && !flags.user {
                continue;
            }
            let va = prefix | (index << level.shift);
            if depth == last || (level.large && entry & PTE_LARGE != 0) {
                let size = 1u64 << level.shift;
                out.push(MappedPage {
                    va: self.sign_extend(va),
                    pa: entry & self.frame_mask & !(size - 1),
                    size,
                    writable: flags.writable,
                    user: flags.user,
                    nx: flags.nx,
                });
            } else {
                self.walk_table(
                    src,
                    entry & self.frame_mask,
                    depth + 1,
                    va,
                    flags,
                    user_only,
                    out,
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Sparse physical memory holding hand built page tables.
    #[derive(Default)]
    pub struct Tables {
        pages: HashMap<u64, [u8; PAGE_SIZE]>,
    }

    impl Tables {
        pub fn set32(&mut self, pa: u64, value: u32) {
            let page = self.pages.entry(pa & PAGE_MASK).or_insert([0; PAGE_SIZE]);
            let off = page_offset(pa);
            page[off..off + 4].copy_from_slice(&value.to_le_bytes());
        }

        pub fn set64(&mut self, pa: u64, value: u64) {
            let page = self.pages.entry(pa & PAGE_MASK).or_insert([0; PAGE_SIZE]);
            let off = page_offset(pa);
            page[off..off + 8].copy_from_slice(&value.to_le_bytes());
        }
    }

    impl TableSource for Tables {
        fn table_page(&self, pa: u64) -> Option<Page> {
            self.pages.get(&pa).map(|page| std::sync::Arc::new(*page))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Tables;
    use super::*;

    #[test]
    fn unset_model_has_no_walker() {
        assert!(PageWalker::for_model(MemoryModel::Na, 4).is_none());
    }

    #[test]
    fn translation_at_keeps_offset_within_page() {
        let t = Translation {
            va: 0x40_0000,
            kind: PteKind::Hardware,
            pa: 0x9000,
            pte: 0x9003,
            page_size: 0x1000,
            writable: true,
            user: true,
            nx: false,
        };
        assert_eq!(t.at(0x40_0123).pa, 0x9123);
    }

    #[test]
    fn unreadable_table_is_a_fault() {
        let walker = PageWalker::for_model(MemoryModel::X64, 4).unwrap();
        let tables = Tables::default();
        let err = walker.translate(&tables, 0x1000, 0x1000, false).unwrap_err();
        assert_eq!(err.reason, FaultReason::TableUnreadable(0));
    }
}
