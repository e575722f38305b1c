pub const CORE_PRINTF_ENABLE: u64 = 0x4000_0001_0000_0000;
pub const CORE_VERBOSE: u64 = 0x4000_0002_0000_0000;
pub const CORE_VERBOSE_EXTRA: u64 = 0x4000_0003_0000_0000;
pub const CORE_VERBOSE_EXTRA_TLP: u64 = 0x4000_0004_0000_0000;
pub const CORE_MAX_NATIVE_ADDRESS: u64 = 0x4000_0008_0000_0000;

pub const CORE_SYSTEM: u64 = 0x2000_0001_0000_0000;
pub const CORE_MEMORYMODEL: u64 = 0x2000_0002_0000_0000;

pub const CONFIG_IS_REFRESH_ENABLED: u64 = 0x2000_0003_0000_0000;
pub const CONFIG_TICK_PERIOD: u64 = 0x2000_0004_0000_0000;
pub const CONFIG_READCACHE_TICKS: u64 = 0x2000_0005_0000_0000;
pub const CONFIG_TLBCACHE_TICKS: u64 = 0x2000_0006_0000_0000;
pub const CONFIG_PROCCACHE_TICKS_PARTIAL: u64 = 0x2000_0007_0000_0000;
pub const CONFIG_PROCCACHE_TICKS_TOTAL: u64 = 0x2000_0008_0000_0000;
pub const CONFIG_VMM_VERSION_MAJOR: u64 = 0x2000_0009_0000_0000;
pub const CONFIG_VMM_VERSION_MINOR: u64 = 0x2000_000a_0000_0000;
pub const CONFIG_VMM_VERSION_REVISION: u64 = 0x2000_000b_0000_0000;
pub const CONFIG_STATISTICS_FUNCTIONCALL: u64 = 0x2000_000c_0000_0000;
pub const CONFIG_IS_PAGING_ENABLED: u64 = 0x2000_000d_0000_0000;

pub const WIN_VERSION_MAJOR: u64 = 0x2000_0101_0000_0000;
pub const WIN_VERSION_MINOR: u64 = 0x2000_0102_0000_0000;
pub const WIN_VERSION_BUILD: u64 = 0x2000_0103_0000_0000;
pub const WIN_SYSTEM_UNIQUE_ID: u64 = 0x2000_0104_0000_0000;

pub const FORENSIC_MODE: u64 = 0x2000_0201_0000_0000;

pub const REFRESH_ALL: u64 = 0x2001_ffff_0000_0000;
pub const REFRESH_FREQ_MEM: u64 = 0x2001_0002_0000_0000;
pub const REFRESH_FREQ_TLB: u64 = 0x2001_0004_0000_0000;
pub const REFRESH_FREQ_FAST: u64 = 0x2001_0400_0000_0000;
pub const REFRESH_FREQ_MEDIUM: u64 = 0x2001_0001_0000_0000;
pub const REFRESH_FREQ_SLOW: u64 = 0x2001_0010_0000_0000;

// legacy single-subsystem triggers
pub const REFRESH_PROCESS: u64 = REFRESH_FREQ_MEDIUM;
pub const REFRESH_READ: u64 = REFRESH_FREQ_MEM;
pub const REFRESH_TLB: u64 = REFRESH_FREQ_TLB;
pub const REFRESH_PAGING: u64 = 0x2001_0008_0000_0000;
pub const REFRESH_REGISTRY: u64 = REFRESH_FREQ_SLOW;
pub const REFRESH_USER: u64 = 0x2001_0020_0000_0000;
pub const REFRESH_PHYSMEMMAP: u64 = 0x2001_0040_0000_0000;
pub const REFRESH_PFN: u64 = 0x2001_0080_0000_0000;
pub const REFRESH_OBJ: u64 = 0x2001_0100_0000_0000;
pub const REFRESH_NET: u64 = 0x2001_0200_0000_0000;

/// Option selector with the argument dword masked off.
pub fn option_id(key: u64) -> u64 {
    key & 0xffff_ffff_0000_0000
}

/// Whether `key` names a refresh trigger (write only).
pub fn is_refresh_trigger(key: u64) -> bool {
    option_id(key) >> 48 == 0x2001
}

/// Event delivered to every module with notify capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    VerbosityChange,
    RefreshFast,
    RefreshMedium,
    RefreshSlow,
    ForensicInit,
    ForensicInitComplete,
}

impl Notification {
    pub fn code(self) -> u32 {
        match self {
            Self::VerbosityChange => 0x01,
            Self::RefreshFast => 0x05,
            Self::RefreshMedium => 0x02,
            Self::RefreshSlow => 0x04,
            Self::ForensicInit => 0x0100_0100,
            Self::ForensicInitComplete => 0x0100_0200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_id_masks_argument() {
        assert_eq!(option_id(CONFIG_TICK_PERIOD | 0x1234), CONFIG_TICK_PERIOD);
    }

    #[test]
    fn refresh_triggers_are_recognized() {
        for key in [
            REFRESH_ALL,
            REFRESH_FREQ_MEM,
            REFRESH_FREQ_FAST,
            REFRESH_PAGING,
            REFRESH_NET,
        ] {
            assert!(is_refresh_trigger(key), "{key:#x}");
        }
        assert!(!is_refresh_trigger(CONFIG_TICK_PERIOD));
        assert!(!is_refresh_trigger(CORE_VERBOSE));
    }
}
