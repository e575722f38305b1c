use super::{PteKind, Translation};
use crate::types::PAGE_SIZE;

const SOFT_PROTOTYPE: u64 = 1 << 10;
const SOFT_TRANSITION: u64 = 1 << 11;
/// Page file number Windows reserves for the compressed (virtual) store.
const VIRTUAL_STORE_PAGEFILE: u8 = 2;

/// Bit positions of the software PTE fields, per memory model.
#[derive(Debug, Clone, Copy)]
pub struct SoftLayout {
    pub pagefile_low_shift: u32,
    pub pagefile_high_shift: u32,
    pub pagefile_high_bits: u32,
}

impl SoftLayout {
    fn pagefile_number(&self, entry: u64) -> u8 {
        ((entry >> self.pagefile_low_shift) & 0xf) as u8
    }

    fn pagefile_high(&self, entry: u64) -> u64 {
        (entry >> self.pagefile_high_shift) & ((1u64 << self.pagefile_high_bits) - 1)
    }

    /// Classify a non-present, non-zero leaf entry.
    pub fn decode(&self, entry: u64) -> Option<PteKind> {
        if entry == 0 {
            return None;
        }
        if entry & SOFT_PROTOTYPE != 0 {
            return Some(PteKind::Prototype);
        }
        if entry & SOFT_TRANSITION != 0 {
            return Some(PteKind::Transition);
        }
        if self.pagefile_high(entry) == 0 {
            return Some(PteKind::DemandZero);
        }
        if self.pagefile_number(entry) == VIRTUAL_STORE_PAGEFILE {
            Some(PteKind::Compressed)
        } else {
            Some(PteKind::PageFile)
        }
    }

    pub fn page(&self, dtb: u64, translation: &Translation) -> SoftPage {
        let entry = translation.pte;
        SoftPage {
            kind: translation.kind,
            va: translation.va,
            dtb,
            pte: entry,
            pagefile: self.pagefile_number(entry),
            pagefile_offset: self.pagefile_high(entry) * PAGE_SIZE as u64,
        }
    }
}

/// A non-resident page handed to the device for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftPage {
    pub kind: PteKind,
    pub va: u64,
    pub dtb: u64,
    pub pte: u64,
    pub pagefile: u8,
    pub pagefile_offset: u64,
}
