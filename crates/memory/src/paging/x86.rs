use super::{Level, PageWalker, SoftLayout};
use crate::types::MemoryModel;

const FRAME_MASK: u64 = 0xffff_f000;

pub(super) fn walker() -> PageWalker {
    PageWalker {
        model: MemoryModel::X86,
        entry_size: 4,
        levels: vec![
            Level {
                shift: 22,
                bits: 10,
                large: true,
            },
            Level {
                shift: 12,
                bits: 10,
                large: false,
            },
        ],
        frame_mask: FRAME_MASK,
        root_mask: FRAME_MASK,
        va_bits: 32,
        canonical: false,
        root_has_flags: true,
        soft: SoftLayout {
            pagefile_low_shift: 1,
            pagefile_high_shift: 12,
            pagefile_high_bits: 20,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Tables;
    use super::super::{FaultReason, PteKind};
    use super::*;

    const DTB: u64 = 0x10_0000;

    fn tables() -> Tables {
        let mut t = Tables::default();
        // PDE[1] -> page table at 0x11_0000 (user, writable)
        t.set32(DTB + 4, 0x11_0007);
        // PTE[0] -> 0x20_0000
        t.set32(0x11_0000, 0x20_0005);
        // PTE[1] transition at frame 0x30_0000
        t.set32(0x11_0004, 0x30_0800);
        // PDE[2] 4 MiB supervisor page at 0x80_0000
        t.set32(DTB + 8, 0x80_0083);
        t
    }

    #[test]
    fn resolves_small_page() {
        let walker = walker();
        let t = walker.translate(&tables(), DTB, 0x40_0123, false).unwrap();
        assert_eq!(t.pa, 0x20_0123);
        assert_eq!(t.kind, PteKind::Hardware);
        assert!(!t.writable);
        assert!(t.user);
        assert!(!t.nx);
    }

    #[test]
    fn resolves_large_page() {
        let t = walker().translate(&tables(), DTB, 0x81_2345, false).unwrap();
        assert_eq!(t.pa, 0x81_2345);
        assert_eq!(t.page_size, 0x40_0000);
    }

    #[test]
    fn user_only_rejects_supervisor_page() {
        let err = walker().translate(&tables(), DTB, 0x81_2345, true).unwrap_err();
        assert_eq!(err.reason, FaultReason::Supervisor);
    }

    #[test]
    fn transition_entry_points_at_frame() {
        let t = walker().translate(&tables(), DTB, 0x40_1010, false).unwrap();
        assert_eq!(t.kind, PteKind::Transition);
        assert_eq!(t.pa, 0x30_0010);
    }

    #[test]
    fn addresses_above_4g_are_rejected() {
        let err = walker().translate(&tables(), DTB, 0x1_0000_0000, false).unwrap_err();
        assert_eq!(err.reason, FaultReason::NonCanonical);
    }

    #[test]
    fn walk_lists_present_leaves_in_order() {
        let pages = walker().walk(&tables(), DTB, false);
        let vas: Vec<u64> = pages.iter().map(|p| p.va).collect();
        assert_eq!(vas, vec![0x40_0000, 0x80_0000]);
        assert_eq!(pages[1].size, 0x40_0000);
    }
}
