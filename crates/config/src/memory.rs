#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Memory model hint for targets without OS awareness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryModelHint {
    #[default]
    Auto,
    X86,
    X86Pae,
    X64,
}

/// One physical memory range of a user supplied memory map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhysRange {
    pub base: u64,
    pub size: u64,
}

impl PhysRange {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Memory {
    /// Follow software PTEs (transition, demand-zero, page file, ...).
    pub paging_enabled: bool,

    /// Paging levels of the x64 model (4, or 5 with LA57).
    pub x64_levels: u8,

    pub model: MemoryModelHint,

    /// Overrides the discovered physical memory map when non-empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memmap: Vec<PhysRange>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            paging_enabled: true,
            x64_levels: 4,
            model: MemoryModelHint::Auto,
            memmap: Vec::new(),
        }
    }
}

impl Memory {
    /// Sort the memory map and merge overlapping or adjacent ranges.
    pub fn normalized_memmap(&self) -> Vec<PhysRange> {
        let mut ranges: Vec<PhysRange> = self.memmap.iter().copied().filter(|r| r.size > 0).collect();
        ranges.sort_by_key(|r| r.base);
        let mut merged: Vec<PhysRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.base <= last.end() => {
                    let end = last.end().max(range.end());
                    last.size = end - last.base;
                }
                _ => merged.push(range),
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memmap_is_merged() {
        let memory = Memory {
            memmap: vec![
                PhysRange { base: 0x3000, size: 0x1000 },
                PhysRange { base: 0x1000, size: 0x1000 },
                PhysRange { base: 0x2000, size: 0x800 },
                PhysRange { base: 0x9000, size: 0 },
            ],
            ..Memory::default()
        };
        assert_eq!(
            memory.normalized_memmap(),
            vec![
                PhysRange { base: 0x1000, size: 0x1800 },
                PhysRange { base: 0x3000, size: 0x1000 },
            ]
        );
    }
}
