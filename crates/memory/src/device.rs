use crate::error::Error;
use crate::paging::SoftPage;
use crate::scatter::ScatterItem;
use crate::types::{PAGE_SIZE, Page};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Raw physical memory source: a live acquisition device or a dump file.
pub trait Device: Send + Sync {
    /// Fill every item from physical memory, setting `ok` on success.
    fn read_scatter(&self, items: &mut [ScatterItem]);

    /// Write `data` at physical address `pa`, returning the bytes committed.
    fn write(&self, pa: u64, data: &[u8]) -> Result<usize, Error>;

    /// One past the highest readable physical address.
    fn max_address(&self) -> u64;

    /// Whether the underlying memory can change between reads.
    fn is_volatile(&self) -> bool {
        false
    }

    /// Hint that the given physical pages will be read soon.
    fn prefetch(&self, _pages: &[u64]) {}

    /// Recover a page the translator could not read directly (prototype,
    /// compressed, page file). Returns false when unsupported.
    fn recover_page(&self, _page: &SoftPage, _out: &mut [u8]) -> bool {
        false
    }
}

/// In-memory physical memory image.
#[derive(Debug)]
pub struct BufferDevice {
    memory: RwLock<Vec<u8>>,
    read_only: bool,
    volatile: bool,
    recoverable: Mutex<HashMap<u64, Page>>,
    batches: AtomicU64,
    page_reads: AtomicU64,
    /// Writes commit at most this many bytes; used to model flaky hardware.
    write_limit: Option<usize>,
}

impl BufferDevice {
    pub fn new(memory: Vec<u8>) -> Self {
        Self {
            memory: RwLock::new(memory),
            read_only: false,
            volatile: true,
            recoverable: Mutex::new(HashMap::new()),
            batches: AtomicU64::new(0),
            page_reads: AtomicU64::new(0),
            write_limit: None,
        }
    }

    pub fn zeroed(size: usize) -> Self {
        Self::new(vec![0u8; size])
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Treat the image as a static dump.
    pub fn non_volatile(mut self) -> Self {
        self.volatile = false;
        self
    }

    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Change memory behind the engine's back.
    pub fn poke(&self, pa: u64, bytes: &[u8]) {
        let mut memory = self.memory.write();
        let start = pa as usize;
        let end = (start + bytes.len()).min(memory.len());
        if start < end {
            memory[start..end].copy_from_slice(&bytes[..end - start]);
        }
    }

    pub fn poke_u64(&self, pa: u64, value: u64) {
        self.poke(pa, &value.to_le_bytes());
    }

    pub fn peek(&self, pa: u64, len: usize) -> Vec<u8> {
        let memory = self.memory.read();
        let start = (pa as usize).min(memory.len());
        let end = (start + len).min(memory.len());
        memory[start..end].to_vec()
    }

    /// Serve `bytes` when a soft page with raw entry `pte` is recovered.
    pub fn add_recoverable(&self, pte: u64, bytes: &[u8]) {
        self.recoverable
            .lock()
            .insert(pte, crate::types::page_from_slice(bytes));
    }

    /// Number of `read_scatter` calls that reached the device.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Number of items the device was asked for.
    pub fn page_reads(&self) -> u64 {
        self.page_reads.load(Ordering::Relaxed)
    }
}

impl Device for BufferDevice {
    fn read_scatter(&self, items: &mut [ScatterItem]) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.page_reads
            .fetch_add(items.len() as u64, Ordering::Relaxed);
        let memory = self.memory.read();
        for item in items.iter_mut() {
            let start = item.addr as usize;
            let end = start.saturating_add(item.data.len());
            if item.addr > usize::MAX as u64 || end > memory.len() {
                item.ok = false;
                continue;
            }
            item.data.copy_from_slice(&memory[start..end]);
            item.ok = true;
        }
    }

    fn write(&self, pa: u64, data: &[u8]) -> Result<usize, Error> {
        if self.read_only {
            return Err(Error::ReadOnlyDevice);
        }
        let mut memory = self.memory.write();
        let start = pa as usize;
        if start >= memory.len() {
            return Ok(0);
        }
        let mut len = data.len().min(memory.len() - start);
        if let Some(limit) = self.write_limit {
            len = len.min(limit);
        }
        memory[start..start + len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn max_address(&self) -> u64 {
        self.memory.read().len() as u64
    }

    fn is_volatile(&self) -> bool {
        self.volatile
    }

    fn recover_page(&self, page: &SoftPage, out: &mut [u8]) -> bool {
        let recoverable = self.recoverable.lock();
        let Some(bytes) = recoverable.get(&page.pte) else {
            return false;
        };
        let len = out.len().min(PAGE_SIZE);
        out[..len].copy_from_slice(&bytes[..len]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_inside_and_fails_outside_the_image() {
        let device = BufferDevice::new((0..=255u8).cycle().take(0x2000).collect());
        let mut items = vec![ScatterItem::new(0x1000, 16), ScatterItem::new(0x2000, 16)];
        device.read_scatter(&mut items);
        assert!(items[0].ok);
        assert_eq!(items[0].data[..4], [0, 1, 2, 3]);
        assert!(!items[1].ok);
        assert_eq!((device.batches(), device.page_reads()), (1, 2));
    }

    #[test]
    fn read_only_rejects_writes() {
        let device = BufferDevice::zeroed(0x1000).read_only();
        assert_eq!(device.write(0, &[1]), Err(Error::ReadOnlyDevice));
    }

    #[test]
    fn write_limit_truncates() {
        let device = BufferDevice::zeroed(0x1000).with_write_limit(2);
        assert_eq!(device.write(0, &[1, 2, 3]), Ok(2));
        assert_eq!(device.peek(0, 3), vec![1, 2, 0]);
    }
}
