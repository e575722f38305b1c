#![forbid(unsafe_code)]

mod cache_policy;
mod error;
mod forensic;
mod memory;
mod refresh;

pub use cache_policy::{CachePolicy, MAX_CACHE_REGIONS};
pub use error::Error;
pub use forensic::{Forensic, MAX_FORENSIC_MODE, Vfs};
pub use memory::{Memory, MemoryModelHint, PhysRange};
pub use refresh::Refresh;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variables with this prefix override file values, e.g.
/// `VMMFS_REFRESH__MEM_TICKS=10`.
pub const ENV_PREFIX: &str = "VMMFS_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub refresh: Refresh,
    pub cache: CachePolicy,
    pub memory: Memory,
    pub vfs: Vfs,
    pub forensic: Forensic,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML file, then apply `VMMFS_` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InvalidPath(path.to_path_buf()));
        }
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validated()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: Self = toml_edit::de::from_str(text)?;
        config.validated()
    }

    pub fn to_toml_string(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    fn validated(mut self) -> Result<Self, Error> {
        if !matches!(self.memory.x64_levels, 4 | 5) {
            return Err(Error::InvalidValue {
                field: "memory.x64_levels",
                reason: format!("{} (expected 4 or 5)", self.memory.x64_levels),
            });
        }
        if self.forensic.mode > MAX_FORENSIC_MODE {
            return Err(Error::InvalidValue {
                field: "forensic.mode",
                reason: format!("{} (expected 0..={MAX_FORENSIC_MODE})", self.forensic.mode),
            });
        }
        self.refresh = self.refresh.normalize();
        self.cache = self.cache.clamp();
        self.forensic.batch_pages = self.forensic.batch_pages.max(1);
        Ok(self)
    }
}
