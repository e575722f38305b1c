use super::entries::*;
use itertools::Itertools;
use memory::{MappedPage, PAGE_SIZE, PteKind, Translation};

const PAGE: u64 = PAGE_SIZE as u64;

fn module_at(modules: &[ModuleEntry], va: u64) -> Option<&ModuleEntry> {
    let idx = modules.partition_point(|m| m.base <= va);
    idx.checked_sub(1)
        .map(|i| &modules[i])
        .filter(|m| m.contains(va))
}

/// Coalesce walked pages into runs of identical protection.
///
/// `modules` must be sorted by base. Runs are split where the covering
/// module changes so every run carries exactly one module name.
pub fn pte_map(pages: &[MappedPage], modules: &[ModuleEntry], wow64: bool) -> Vec<PteEntry> {
    pages
        .iter()
        .map(|page| PteEntry {
            va_base: page.va,
            pages: page.size.div_ceil(PAGE),
            writable: page.writable,
            user: page.user,
            nx: page.nx,
            wow64,
            text: module_at(modules, page.va)
                .map(|m| m.name.clone())
                .unwrap_or_default(),
            software_pages: 0,
        })
        .coalesce(|prev, next| {
            let joins = prev.last().checked_add(1) == Some(next.va_base)
                && prev.writable == next.writable
                && prev.user == next.user
                && prev.nx == next.nx
                && prev.text == next.text;
            if joins {
                Ok(PteEntry {
                    pages: prev.pages + next.pages,
                    ..prev
                })
            } else {
                Err((prev, next))
            }
        })
        .collect()
}

/// Sort by start, drop malformed ranges and assign page indices.
pub fn vad_map(mut vads: Vec<VadEntry>) -> Vec<VadEntry> {
    vads.retain(|vad| vad.end >= vad.start);
    vads.sort_by_key(|vad| vad.start);
    vads.dedup_by_key(|vad| vad.start);
    let mut base: u64 = 0;
    for vad in &mut vads {
        let pages = vad.pages();
        vad.vadex_pages = u32::try_from(pages).unwrap_or(u32::MAX);
        vad.vadex_pages_base = u32::try_from(base).unwrap_or(u32::MAX);
        base += pages;
    }
    vads
}

fn level_of(page_size: u64) -> u32 {
    match page_size {
        s if s >= 1 << 30 => 3,
        s if s >= 1 << 21 => 2,
        _ => 1,
    }
}

/// Per-page translations over the page window `[offset, offset + count)`
/// of the VAD map.
pub fn vadex_map(
    vads: &[VadEntry],
    offset: u32,
    count: u32,
    translate: impl Fn(u64) -> Option<Translation>,
) -> Vec<VadExEntry> {
    let window = u64::from(offset)..u64::from(offset) + u64::from(count);
    let total = vads.last().map_or(0, |vad| {
        u64::from(vad.vadex_pages_base) + u64::from(vad.vadex_pages)
    });
    let mut out = Vec::with_capacity(total.saturating_sub(window.start).min(u64::from(count)) as usize);
    for vad in vads {
        let base = u64::from(vad.vadex_pages_base);
        let pages = u64::from(vad.vadex_pages);
        if base + pages <= window.start {
            continue;
        }
        if base >= window.end {
            break;
        }
        let first = window.start.saturating_sub(base);
        let last = (window.end - base).min(pages);
        for index in first..last {
            let va = vad.start + index * PAGE;
            let entry = match translate(va) {
                Some(t) => VadExEntry {
                    kind: Some(t.kind),
                    level: level_of(t.page_size),
                    va,
                    pa: match t.kind {
                        PteKind::Hardware | PteKind::Transition => t.pa,
                        _ => 0,
                    },
                    pte: t.pte,
                    vad_base: vad.start,
                    ..VadExEntry::default()
                },
                None => VadExEntry {
                    va,
                    vad_base: vad.start,
                    ..VadExEntry::default()
                },
            };
            out.push(entry);
        }
    }
    out
}

/// Merge overlapping or adjacent ranges.
pub fn physmem_map(mut ranges: Vec<PhysMemEntry>) -> Vec<PhysMemEntry> {
    ranges.retain(|r| r.size > 0);
    ranges.sort_by_key(|r| r.pa);
    ranges
        .into_iter()
        .coalesce(|prev, next| {
            let prev_end = prev.pa.saturating_add(prev.size);
            if next.pa <= prev_end {
                let end = prev_end.max(next.pa.saturating_add(next.size));
                Ok(PhysMemEntry {
                    pa: prev.pa,
                    size: end - prev.pa,
                })
            } else {
                Err((prev, next))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn page(va: u64, writable: bool) -> MappedPage {
        MappedPage {
            va,
            pa: va.wrapping_add(0x100_0000),
            size: PAGE,
            writable,
            user: true,
            nx: false,
        }
    }

    #[test]
    fn contiguous_pages_coalesce_until_protection_changes() {
        let pages = [
            page(0x1000, true),
            page(0x2000, true),
            page(0x3000, false),
            page(0x5000, false),
        ];
        let map = pte_map(&pages, &[], false);
        let runs: Vec<(u64, u64)> = map.iter().map(|e| (e.va_base, e.pages)).collect();
        assert_eq!(runs, [(0x1000, 2), (0x3000, 1), (0x5000, 1)]);
    }

    #[test]
    fn runs_reach_the_top_of_the_address_space() {
        let pages = [page(u64::MAX - 2 * PAGE + 1, true), page(u64::MAX - PAGE + 1, true)];
        let map = pte_map(&pages, &[], false);
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].pages, 2);
        assert_eq!(map[0].last(), u64::MAX);
        assert!(map[0].contains(u64::MAX));
    }

    #[test]
    fn vadex_window_past_the_map_returns_existing_pages() {
        let vads = vad_map(vec![VadEntry {
            start: 0x10000,
            end: 0x10fff,
            ..VadEntry::default()
        }]);
        let map = vadex_map(&vads, 0, u32::MAX, |_| None);
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].va, 0x10000);
        assert!(vadex_map(&vads, 5, u32::MAX, |_| None).is_empty());
    }

    #[test]
    fn runs_split_at_module_boundaries() {
        let modules = [
            ModuleEntry {
                base: 0x2000,
                image_size: 0x2000,
                name: "a.dll".into(),
                ..ModuleEntry::default()
            },
            ModuleEntry {
                base: 0x4000,
                image_size: 0x1000,
                name: "b.dll".into(),
                ..ModuleEntry::default()
            },
        ];
        let pages: Vec<MappedPage> = (1..=5).map(|i| page(i * PAGE, true)).collect();
        let map = pte_map(&pages, &modules, false);
        let runs: Vec<(u64, &str)> = map.iter().map(|e| (e.va_base, e.text.as_str())).collect();
        assert_eq!(
            runs,
            [(0x1000, ""), (0x2000, "a.dll"), (0x4000, "b.dll"), (0x5000, "")]
        );
    }

    #[test]
    fn vad_map_sorts_and_indexes_pages() {
        let vads = vec![
            VadEntry {
                start: 0x20000,
                end: 0x21fff,
                ..VadEntry::default()
            },
            VadEntry {
                start: 0x10000,
                end: 0x10fff,
                ..VadEntry::default()
            },
            VadEntry {
                start: 0x30000,
                end: 0x2ffff,
                ..VadEntry::default()
            },
        ];
        let map = vad_map(vads);
        let layout: Vec<(u64, u32, u32)> = map
            .iter()
            .map(|v| (v.start, v.vadex_pages_base, v.vadex_pages))
            .collect();
        assert_eq!(layout, [(0x10000, 0, 1), (0x20000, 1, 2)]);
    }

    #[test]
    fn vadex_window_crosses_vads() {
        let map = vad_map(vec![
            VadEntry {
                start: 0x10000,
                end: 0x11fff,
                ..VadEntry::default()
            },
            VadEntry {
                start: 0x40000,
                end: 0x42fff,
                ..VadEntry::default()
            },
        ]);
        let entries = vadex_map(&map, 1, 3, |va| {
            (va != 0x40000).then_some(Translation {
                va,
                kind: PteKind::Hardware,
                pa: va << 4,
                pte: 0,
                page_size: PAGE,
                writable: false,
                user: true,
                nx: false,
            })
        });
        let vas: Vec<(u64, Option<PteKind>, u64)> =
            entries.iter().map(|e| (e.va, e.kind, e.vad_base)).collect();
        assert_eq!(
            vas,
            [
                (0x11000, Some(PteKind::Hardware), 0x10000),
                (0x40000, None, 0x40000),
                (0x41000, Some(PteKind::Hardware), 0x40000),
            ]
        );
        assert_eq!(entries[0].level, 1);
    }

    #[test]
    fn physmem_ranges_merge() {
        let map = physmem_map(vec![
            PhysMemEntry { pa: 0x10_0000, size: 0x1000 },
            PhysMemEntry { pa: 0x1000, size: 0x9e000 },
            PhysMemEntry { pa: 0x10_1000, size: 0x1000 },
            PhysMemEntry { pa: 0x20_0000, size: 0 },
        ]);
        assert_eq!(
            map,
            [
                PhysMemEntry { pa: 0x1000, size: 0x9e000 },
                PhysMemEntry { pa: 0x10_0000, size: 0x2000 },
            ]
        );
    }
}
