use std::fmt;
use std::sync::Arc;

pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_MASK: u64 = !(PAGE_SIZE as u64 - 1);

/// A page-sized payload shared between cache pools and readers.
pub type Page = Arc<[u8; PAGE_SIZE]>;

/// Physical memory pseudo process id.
pub const PID_PHYSICAL: u32 = u32::MAX;

/// Combined with a process id to read that process with kernel memory.
pub const PID_KERNEL_MEMORY: u32 = 0x8000_0000;

#[inline]
pub fn page_base(addr: u64) -> u64 {
    addr & PAGE_MASK
}

#[inline]
pub fn page_offset(addr: u64) -> usize {
    (addr & !PAGE_MASK) as usize
}

pub fn zero_page() -> Page {
    Arc::new([0u8; PAGE_SIZE])
}

/// Copy up to one page of `bytes` into a new zero padded page.
pub fn page_from_slice(bytes: &[u8]) -> Page {
    let mut page = [0u8; PAGE_SIZE];
    let len = bytes.len().min(PAGE_SIZE);
    page[..len].copy_from_slice(&bytes[..len]);
    Arc::new(page)
}

/// Page aligned chunks covering `[addr, addr + len)`.
///
/// Yields `(address, offset into the caller buffer, length)`; no chunk
/// crosses a page boundary.
pub fn fragments(addr: u64, len: usize) -> impl Iterator<Item = (u64, usize, usize)> {
    let mut done = 0usize;
    std::iter::from_fn(move || {
        if done >= len {
            return None;
        }
        let cur = addr.wrapping_add(done as u64);
        let chunk = (PAGE_SIZE - page_offset(cur)).min(len - done);
        let item = (cur, done, chunk);
        done += chunk;
        Some(item)
    })
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryModel {
    #[default]
    Na = 0,
    X86 = 1,
    X86Pae = 2,
    X64 = 3,
}

impl MemoryModel {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Na),
            1 => Some(Self::X86),
            2 => Some(Self::X86Pae),
            3 => Some(Self::X64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Na => "N/A",
            Self::X86 => "X86",
            Self::X86Pae => "X86PAE",
            Self::X64 => "X64",
        }
    }

    pub fn is_32bit(self) -> bool {
        matches!(self, Self::X86 | Self::X86Pae)
    }
}

impl fmt::Display for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<config::MemoryModelHint> for MemoryModel {
    fn from(hint: config::MemoryModelHint) -> Self {
        match hint {
            config::MemoryModelHint::Auto => Self::Na,
            config::MemoryModelHint::X86 => Self::X86,
            config::MemoryModelHint::X86Pae => Self::X86Pae,
            config::MemoryModelHint::X64 => Self::X64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fragments_split_on_page_boundaries() {
        let parts: Vec<_> = fragments(0x1ff0, 0x1020).collect();
        assert_eq!(
            parts,
            vec![(0x1ff0, 0, 0x10), (0x2000, 0x10, 0x1000), (0x3000, 0x1010, 0x10)]
        );
    }

    #[test]
    fn empty_range_has_no_fragments() {
        assert_eq!(fragments(0x1234, 0).count(), 0);
    }

    proptest! {
        #[test]
        fn fragments_cover_range_without_crossing_pages(addr in 0u64..0x1_0000_0000, len in 0usize..0x5000) {
            let mut covered = 0usize;
            for (cur, offset, chunk) in fragments(addr, len) {
                prop_assert_eq!(offset, covered);
                prop_assert_eq!(cur, addr + offset as u64);
                prop_assert!(chunk > 0);
                prop_assert!(page_offset(cur) + chunk <= PAGE_SIZE);
                covered += chunk;
            }
            prop_assert_eq!(covered, len);
        }
    }
}
