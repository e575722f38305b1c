#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const MAX_FORENSIC_MODE: u8 = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Forensic {
    /// 0 = off, 1..=4 = forensic scan (storage flavour is up to the host).
    pub mode: u8,

    /// Physical pages handed to the ingest callbacks per batch.
    pub batch_pages: u32,
}

impl Default for Forensic {
    fn default() -> Self {
        Self {
            mode: 0,
            batch_pages: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Vfs {
    /// Largest single read or write served by the virtual file system.
    pub read_limit: u64,
}

impl Default for Vfs {
    fn default() -> Self {
        Self {
            read_limit: 64 * 1024 * 1024,
        }
    }
}
