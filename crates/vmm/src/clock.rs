#![forbid(unsafe_code)]

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Source of refresh tick boundaries.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Resolve when the next tick of `period` is due. Dropping the future
    /// before it resolves must not shift later ticks.
    async fn next_tick(&self, period: Duration);
}

/// Ticks on the tokio timer. Cadence is kept across interruptions; a tick
/// that is more than one period late fires immediately and restarts the
/// cadence from there.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<Instant>>,
}

#[async_trait::async_trait]
impl Clock for SystemClock {
    async fn next_tick(&self, period: Duration) {
        let deadline = {
            let mut last = self.last.lock();
            let now = Instant::now();
            let deadline = *last.get_or_insert(now) + period;
            if deadline + period < now { now } else { deadline }
        };
        tokio::time::sleep_until(deadline).await;
        *self.last.lock() = Some(deadline);
    }
}

/// Ticks released by hand, for hosts that drive the engine from their own
/// loop. The period is ignored.
#[derive(Debug)]
pub struct ManualClock {
    pending: Semaphore,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            pending: Semaphore::new(0),
        }
    }
}

impl ManualClock {
    /// Release `ticks` more ticks.
    pub fn advance(&self, ticks: usize) {
        self.pending.add_permits(ticks);
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    async fn next_tick(&self, _period: Duration) {
        // the semaphore is never closed
        if let Ok(permit) = self.pending.acquire().await {
            permit.forget();
        }
    }
}
