use crate::types::{PAGE_SIZE, page_offset};

/// One page-bounded unit of scatter work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterItem {
    /// Target address (physical or virtual depending on the address space).
    pub addr: u64,
    /// Transfer buffer, at most one page.
    pub data: Vec<u8>,
    /// Set once the whole buffer was transferred.
    pub ok: bool,
}

impl ScatterItem {
    pub fn new(addr: u64, len: usize) -> Self {
        Self {
            addr,
            data: vec![0u8; len],
            ok: false,
        }
    }

    /// Full page item at the page containing `addr`.
    pub fn page(addr: u64) -> Self {
        Self::new(crate::types::page_base(addr), PAGE_SIZE)
    }

    /// Item carrying bytes to write.
    pub fn with_data(addr: u64, data: Vec<u8>) -> Self {
        Self {
            addr,
            data,
            ok: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Non-empty, at most a page, 4-byte aligned and not crossing a page.
    pub fn is_well_formed(&self) -> bool {
        !self.data.is_empty()
            && self.data.len() <= PAGE_SIZE
            && self.addr % 4 == 0
            && page_offset(self.addr) + self.data.len() <= PAGE_SIZE
    }

    pub(crate) fn fail(&mut self) {
        self.ok = false;
        self.data.fill(0);
    }
}

/// Build one item per page touched by `[addr, addr + len)`.
pub fn scatter_pages(addr: u64, len: usize) -> Vec<ScatterItem> {
    crate::types::fragments(crate::types::page_base(addr), page_offset(addr) + len)
        .map(|(page, _, _)| ScatterItem::page(page))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_rules() {
        assert!(ScatterItem::new(0x1000, 0x1000).is_well_formed());
        assert!(ScatterItem::new(0x1ffc, 4).is_well_formed());
        assert!(!ScatterItem::new(0x1ffc, 8).is_well_formed());
        assert!(!ScatterItem::new(0x1002, 4).is_well_formed());
        assert!(!ScatterItem::new(0x1000, 0).is_well_formed());
        assert!(!ScatterItem::new(0x1000, 0x1001).is_well_formed());
    }

    #[test]
    fn scatter_pages_covers_every_page() {
        let items = scatter_pages(0x1ff0, 0x20);
        let addrs: Vec<u64> = items.iter().map(|i| i.addr).collect();
        assert_eq!(addrs, vec![0x1000, 0x2000]);
        assert!(items.iter().all(ScatterItem::is_well_formed));
    }
}
