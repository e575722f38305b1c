use bitflags::bitflags;

bitflags! {
    /// Per-call read/write behaviour. Values match the wire-level flag set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReadFlags: u64 {
        /// Skip the data cache and always ask the device.
        const NOCACHE = 0x0001;
        /// Zero fill failed physical reads inside the physical range.
        const ZEROPAD_ON_FAIL = 0x0002;
        /// Serve from the cache only; a miss fails the item.
        const FORCECACHE_READ = 0x0008;
        /// Never follow software PTEs.
        const NOPAGING = 0x0010;
        /// Follow only software PTEs that need no extra device I/O.
        const NOPAGING_IO = 0x0020;
        /// Do not store device results in the data cache.
        const NOCACHEPUT = 0x0100;
        /// Only look at the most recent cache region.
        const CACHE_RECENT_ONLY = 0x0200;
        /// Disable read-ahead of adjacent pages.
        const NO_PREDICTIVE_READ = 0x0400;
    }
}

impl ReadFlags {
    pub(crate) fn uses_cache(self) -> bool {
        self.contains(Self::FORCECACHE_READ) || !self.contains(Self::NOCACHE)
    }
}
