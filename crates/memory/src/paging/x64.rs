use super::{Level, PageWalker, SoftLayout};
use crate::types::MemoryModel;

const FRAME_MASK: u64 = 0x000f_ffff_ffff_f000;

pub(super) fn walker(levels: u8) -> PageWalker {
    let mut table = vec![
        Level {
            shift: 39,
            bits: 9,
            large: false,
        },
        Level {
            shift: 30,
            bits: 9,
            large: true,
        },
        Level {
            shift: 21,
            bits: 9,
            large: true,
        },
        Level {
            shift: 12,
            bits: 9,
            large: false,
        },
    ];
    if levels >= 5 {
        table.insert(
            0,
            Level {
                shift: 48,
                bits: 9,
                large: false,
            },
        );
    }
    PageWalker {
        model: MemoryModel::X64,
        entry_size: 8,
        va_bits: if levels >= 5 { 57 } else { 48 },
        levels: table,
        frame_mask: FRAME_MASK,
        root_mask: FRAME_MASK,
        canonical: true,
        root_has_flags: true,
        soft: SoftLayout {
            pagefile_low_shift: 12,
            pagefile_high_shift: 32,
            pagefile_high_bits: 32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Tables;
    use super::super::{FaultReason, PteKind};
    use super::*;
    use pretty_assertions::assert_eq;

    const DTB: u64 = 0x1000;

    fn tables() -> Tables {
        let mut t = Tables::default();
        // PML4[0] -> PDPT 0x2000
        t.set64(DTB, 0x2007);
        // PML4[511] -> PDPT 0x5000 (kernel)
        t.set64(DTB + 511 * 8, 0x5003);
        // PDPT[0] -> PD 0x3000
        t.set64(0x2000, 0x3007);
        // PDPT[1] -> 1 GiB page at 0x4000_0000
        t.set64(0x2008, 0x4000_0087);
        // PD[0] -> PT 0x4000
        t.set64(0x3000, 0x4007);
        // PT[0x10] -> 0x8000
        t.set64(0x4000 + 0x10 * 8, 0x8007);
        // PT[0x11] paged out
        t.set64(0x4000 + 0x11 * 8, (5 << 32) | (1 << 12) | 0x80);
        // PT[0x12] compressed
        t.set64(0x4000 + 0x12 * 8, (5 << 32) | (2 << 12) | 0x80);
        // PT[0x13] prototype
        t.set64(0x4000 + 0x13 * 8, 0xffff_a000_0000_0400);
        // kernel PDPT[0] -> PD 0x6000, PD[0] -> 2 MiB at 0x20_0000
        t.set64(0x5000, 0x6003);
        t.set64(0x6000, 0x20_0083);
        t
    }

    #[test]
    fn resolves_four_level_page() {
        let t = walker(4).translate(&tables(), DTB, 0x10_234, false).unwrap();
        assert_eq!(t.pa, 0x8234);
        assert_eq!(t.kind, PteKind::Hardware);
    }

    #[test]
    fn resolves_gigabyte_page() {
        let t = walker(4).translate(&tables(), DTB, 0x4123_4567, false).unwrap();
        assert_eq!(t.pa, 0x4123_4567);
        assert_eq!(t.page_size, 1 << 30);
    }

    #[test]
    fn kernel_half_needs_full_dtb() {
        let va = 0xffff_ff80_0001_0000;
        let t = walker(4).translate(&tables(), DTB, va, false).unwrap();
        assert_eq!(t.pa, 0x21_0000);
        assert!(!t.user);
        let err = walker(4).translate(&tables(), DTB, va, true).unwrap_err();
        assert_eq!(err.reason, FaultReason::Supervisor);
    }

    #[test]
    fn non_canonical_address_faults() {
        let err = walker(4)
            .translate(&tables(), DTB, 0x0000_8000_0000_0000, false)
            .unwrap_err();
        assert_eq!(err.reason, FaultReason::NonCanonical);
        // valid with la57
        let err = walker(5)
            .translate(&tables(), DTB, 0x0000_8000_0000_0000, false)
            .unwrap_err();
        assert_ne!(err.reason, FaultReason::NonCanonical);
    }

    #[test]
    fn soft_leaf_states() {
        let walker = walker(4);
        let kind = |va| walker.translate(&tables(), DTB, va, false).unwrap().kind;
        assert_eq!(kind(0x11_000), PteKind::PageFile);
        assert_eq!(kind(0x12_000), PteKind::Compressed);
        assert_eq!(kind(0x13_000), PteKind::Prototype);
        let err = walker.translate(&tables(), DTB, 0x14_000, false).unwrap_err();
        assert_eq!(err.reason, FaultReason::NotPresent(3));
    }

    #[test]
    fn pagefile_offset_is_reported() {
        let walker = walker(4);
        let t = walker.translate(&tables(), DTB, 0x11_000, false).unwrap();
        let soft = walker.soft_page(DTB, &t);
        assert_eq!(soft.pagefile, 1);
        assert_eq!(soft.pagefile_offset, 5 * 0x1000);
    }

    #[test]
    fn walk_sign_extends_kernel_addresses() {
        let pages = walker(4).walk(&tables(), DTB, false);
        let vas: Vec<u64> = pages.iter().map(|p| p.va).collect();
        assert_eq!(vas, vec![0x10_000, 0x4000_0000, 0xffff_ff80_0000_0000]);

        let user = walker(4).walk(&tables(), DTB, true);
        assert_eq!(user.len(), 2);
    }
}
