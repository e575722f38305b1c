#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Upper bound on cache regions; a sweep never touches less than 1/16 of a
/// pool.
pub const MAX_CACHE_REGIONS: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CachePolicy {
    /// Fraction of a pool aged by one sweep (clamped to 1/16..=1).
    pub sweep_ratio: f32,
    /// Pages read ahead of a small request (0 disables prediction).
    pub predictive_read_pages: u32,
    /// Largest request, in pages, that still triggers predictive reads.
    pub predictive_read_threshold: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            sweep_ratio: 1.0 / 3.0,
            predictive_read_pages: 1,
            predictive_read_threshold: 1,
        }
    }
}

impl CachePolicy {
    pub fn clamp(self) -> Self {
        let min = 1.0 / MAX_CACHE_REGIONS as f32;
        let sweep_ratio = if self.sweep_ratio.is_finite() {
            self.sweep_ratio.clamp(min, 1.0)
        } else {
            Self::default().sweep_ratio
        };
        Self {
            sweep_ratio,
            predictive_read_pages: self.predictive_read_pages.min(16),
            predictive_read_threshold: self.predictive_read_threshold.min(16),
        }
    }

    /// Number of cache regions implied by the sweep ratio.
    pub fn regions(self) -> usize {
        let ratio = self.clamp().sweep_ratio;
        ((1.0 / ratio).round() as usize).clamp(1, MAX_CACHE_REGIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_sweeps_a_third() {
        assert_eq!(CachePolicy::default().regions(), 3);
    }

    #[test]
    fn nan_ratio_falls_back_to_default() {
        let policy = CachePolicy {
            sweep_ratio: f32::NAN,
            ..CachePolicy::default()
        };
        assert_eq!(policy.regions(), 3);
    }

    proptest! {
        #[test]
        fn regions_stay_in_bounds(ratio in -10.0f32..10.0) {
            let policy = CachePolicy { sweep_ratio: ratio, ..CachePolicy::default() };
            let regions = policy.regions();
            prop_assert!((1..=MAX_CACHE_REGIONS).contains(&regions));
        }
    }
}
