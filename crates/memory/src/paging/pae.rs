use super::{Level, PageWalker, SoftLayout};
use crate::types::MemoryModel;

const FRAME_MASK: u64 = 0x0000_000f_ffff_f000;
/// The PDPT only needs 32 byte alignment and lives below 4 GiB.
const PDPT_MASK: u64 = 0xffff_ffe0;

pub(super) fn walker() -> PageWalker {
    PageWalker {
        model: MemoryModel::X86Pae,
        entry_size: 8,
        levels: vec![
            Level {
                shift: 30,
                bits: 2,
                large: false,
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
        ],
        frame_mask: FRAME_MASK,
        root_mask: PDPT_MASK,
        va_bits: 32,
        canonical: false,
        // PDPT entries carry no RW/US bits
        root_has_flags: false,
        soft: SoftLayout {
            pagefile_low_shift: 1,
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

    // deliberately not page aligned
    const DTB: u64 = 0x10_0020;

    fn tables() -> Tables {
        let mut t = Tables::default();
        // PDPT[0] -> PD at 0x11_0000
        t.set64(DTB, 0x11_0001);
        // PD[2] -> PT at 0x12_0000
        t.set64(0x11_0000 + 2 * 8, 0x12_0007);
        // PT[3] -> 0x1_2345_6000, NX
        t.set64(0x12_0000 + 3 * 8, 0x8000_0001_2345_6007);
        // PD[3] -> 2 MiB page at 0x60_0000
        t.set64(0x11_0000 + 3 * 8, 0x60_0087);
        // PT[4] demand zero
        t.set64(0x12_0000 + 4 * 8, 0x80);
        t
    }

    #[test]
    fn resolves_through_unaligned_pdpt() {
        let t = walker().translate(&tables(), DTB, 0x40_3abc, false).unwrap();
        assert_eq!(t.pa, 0x1_2345_6abc);
        assert!(t.nx);
        assert!(t.writable);
        assert!(t.user);
    }

    #[test]
    fn resolves_two_meg_page() {
        let t = walker().translate(&tables(), DTB, 0x61_0000, false).unwrap();
        assert_eq!(t.pa, 0x61_0000);
        assert_eq!(t.page_size, 0x20_0000);
    }

    #[test]
    fn demand_zero_leaf_is_soft() {
        let t = walker().translate(&tables(), DTB, 0x40_4000, false).unwrap();
        assert_eq!(t.kind, PteKind::DemandZero);
    }

    #[test]
    fn empty_pdpt_slot_is_not_present() {
        let err = walker().translate(&tables(), DTB, 0x4000_0000, false).unwrap_err();
        assert_eq!(err.reason, FaultReason::NotPresent(0));
    }
}
