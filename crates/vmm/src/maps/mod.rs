pub mod build;
pub mod encode;
pub mod entries;
pub mod wire;

pub use entries::*;
pub use wire::{BlobView, copy_out};

use crate::error::Error;
use std::sync::{Arc, OnceLock};

/// A lazily built, immutable map. Once built, every reader sees the same
/// `Arc`; a failed build leaves the slot empty.
#[derive(Debug)]
pub(crate) struct Lazy<T>(OnceLock<Arc<T>>);

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Self(OnceLock::new())
    }
}

impl<T> Lazy<T> {
    pub(crate) fn get_or_build(&self, build: impl FnOnce() -> Result<T, Error>) -> Result<Arc<T>, Error> {
        if let Some(map) = self.0.get() {
            return Ok(map.clone());
        }
        let built = Arc::new(build()?);
        Ok(self.0.get_or_init(|| built).clone())
    }

    pub(crate) fn get_or_init(&self, build: impl FnOnce() -> T) -> Arc<T> {
        self.0.get_or_init(|| Arc::new(build())).clone()
    }
}
