#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

/// Refresh scheduler cadence. Everything except `tick_period` is counted in
/// scheduler ticks, not wall-clock time.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Refresh {
    /// Background refresh on/off. Forced off for non-volatile devices.
    pub enabled: bool,

    /// Base tick period in milliseconds.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub tick_period: Duration,

    /// Validity window of the data page cache.
    pub mem_ticks: u64,

    /// Validity window of the page table (TLB) cache.
    pub tlb_ticks: u64,

    /// Partial process refresh period.
    pub fast_ticks: u64,

    /// Full process refresh period.
    pub medium_ticks: u64,

    /// Expensive subsystems (registry, users, services).
    pub slow_ticks: u64,
}

impl Default for Refresh {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_period: Duration::from_millis(100),
            mem_ticks: 5,
            tlb_ticks: 50,
            fast_ticks: 5,
            medium_ticks: 150,
            slow_ticks: 300,
        }
    }
}

impl Refresh {
    /// Zero periods make no sense for a modulo driven scheduler; bump them to
    /// one tick.
    pub fn normalize(self) -> Self {
        Self {
            tick_period: self.tick_period.max(Duration::from_millis(1)),
            mem_ticks: self.mem_ticks.max(1),
            tlb_ticks: self.tlb_ticks.max(1),
            fast_ticks: self.fast_ticks.max(1),
            medium_ticks: self.medium_ticks.max(1),
            slow_ticks: self.slow_ticks.max(1),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn normalize_never_yields_zero_periods(
            mem in 0u64..10, tlb in 0u64..10, fast in 0u64..10,
            medium in 0u64..10, slow in 0u64..10, period in 0u64..10,
        ) {
            let refresh = Refresh {
                enabled: true,
                tick_period: Duration::from_millis(period),
                mem_ticks: mem,
                tlb_ticks: tlb,
                fast_ticks: fast,
                medium_ticks: medium,
                slow_ticks: slow,
            }
            .normalize();
            prop_assert!(refresh.mem_ticks >= 1);
            prop_assert!(refresh.tlb_ticks >= 1);
            prop_assert!(refresh.fast_ticks >= 1);
            prop_assert!(refresh.medium_ticks >= 1);
            prop_assert!(refresh.slow_ticks >= 1);
            prop_assert!(refresh.tick_period >= Duration::from_millis(1));
        }
    }
}
