use crate::error::Error;
use memory::{Device, PAGE_SIZE, ScatterItem};
use nix::fcntl::PosixFadviseAdvice;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Raw physical memory dump. Offset `n` in the file is physical address `n`.
#[derive(Debug)]
pub struct DumpDevice {
    file: File,
    size: u64,
    reads: AtomicU64,
}

impl DumpDevice {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|source| Error::OpenDevice {
            path: path.to_owned(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| Error::OpenDevice {
                path: path.to_owned(),
                source,
            })?
            .len();
        if size == 0 {
            return Err(Error::EmptyDevice(path.to_owned()));
        }
        debug!(?path, size, "dump opened");
        Ok(Self {
            file,
            size,
            reads: AtomicU64::new(0),
        })
    }

    /// Number of `pread` calls issued so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn read_item(&self, item: &mut ScatterItem) -> bool {
        let end = item.addr.saturating_add(item.data.len() as u64);
        if end > self.size {
            return false;
        }
        let Ok(offset) = i64::try_from(item.addr) else {
            return false;
        };
        let mut filled = 0;
        while filled < item.data.len() {
            self.reads.fetch_add(1, Ordering::Relaxed);
            match nix::sys::uio::pread(&self.file, &mut item.data[filled..], offset + filled as i64) {
                Ok(0) => return false,
                Ok(n) => filled += n,
                Err(nix::Error::EINTR) => continue,
                Err(err) => {
                    warn!(addr = %format_args!("{:#x}", item.addr), %err, "dump read failed");
                    return false;
                }
            }
        }
        true
    }
}

impl Device for DumpDevice {
    fn read_scatter(&self, items: &mut [ScatterItem]) {
        trace!(items = items.len(), "dump scatter read");
        for item in items {
            item.ok = self.read_item(item);
        }
    }

    fn write(&self, _pa: u64, _data: &[u8]) -> Result<usize, memory::Error> {
        Err(memory::Error::ReadOnlyDevice)
    }

    fn max_address(&self) -> u64 {
        self.size
    }

    fn prefetch(&self, pages: &[u64]) {
        for &pa in pages {
            let Ok(offset) = i64::try_from(pa) else {
                continue;
            };
            if let Err(err) = nix::fcntl::posix_fadvise(
                &self.file,
                offset,
                PAGE_SIZE as i64,
                PosixFadviseAdvice::POSIX_FADV_WILLNEED,
            ) {
                trace!(pa, %err, "readahead hint rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn dump(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn reads_pages_at_their_file_offsets() {
        let mut bytes = vec![0u8; PAGE_SIZE * 2];
        bytes[PAGE_SIZE..PAGE_SIZE + 4].copy_from_slice(b"page");
        let file = dump(&bytes);
        let device = DumpDevice::open(file.path()).unwrap();
        assert_eq!(device.max_address(), (PAGE_SIZE * 2) as u64);
        assert!(!device.is_volatile());

        let mut items = vec![
            ScatterItem::new(PAGE_SIZE as u64, 4),
            ScatterItem::page(PAGE_SIZE as u64 * 2),
        ];
        device.read_scatter(&mut items);
        assert!(items[0].ok);
        assert_eq!(items[0].data, b"page");
        assert!(!items[1].ok);
    }

    #[test]
    fn dumps_are_read_only() {
        let file = dump(&[0; 16]);
        let device = DumpDevice::open(file.path()).unwrap();
        assert_eq!(device.write(0, &[1]), Err(memory::Error::ReadOnlyDevice));
    }

    #[test]
    fn empty_dumps_are_refused() {
        let file = dump(&[]);
        assert!(matches!(
            DumpDevice::open(file.path()),
            Err(Error::EmptyDevice(_))
        ));
    }
}
