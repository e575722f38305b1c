#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::vmm::{TickReport, Vmm};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Out-of-band requests to the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    RefreshAll,
    RefreshFast,
    RefreshMedium,
    RefreshSlow,
}

/// Drives [`Vmm::tick`] once per configured tick period while automatic
/// refresh is enabled.
pub struct RefreshScheduler {
    vmm: Arc<Vmm>,
    clock: Arc<dyn Clock>,
}

impl RefreshScheduler {
    pub fn new(vmm: Arc<Vmm>, clock: Arc<dyn Clock>) -> Self {
        Self { vmm, clock }
    }

    pub fn vmm(&self) -> &Arc<Vmm> {
        &self.vmm
    }

    pub fn tick(&self) -> TickReport {
        self.vmm.tick()
    }

    fn handle_control(&self, event: ControlEvent) {
        debug!(?event, "control event");
        match event {
            ControlEvent::RefreshAll => self.vmm.refresh_all(),
            ControlEvent::RefreshFast => {
                self.vmm.refresh_fast();
            }
            ControlEvent::RefreshMedium => {
                self.vmm.refresh_medium();
            }
            ControlEvent::RefreshSlow => {
                self.vmm.refresh_slow();
            }
        }
    }

    /// Tick until the cancellation token is triggered. With refresh
    /// disabled only control events are served.
    pub async fn run_until(
        &self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) {
        let mut control_open = true;
        loop {
            let (enabled, period) = {
                let config = self.vmm.config();
                (config.refresh.enabled, config.refresh.tick_period)
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("refresh scheduler stopped");
                    break;
                }
                event = control_rx.recv(), if control_open => match event {
                    Some(event) => self.handle_control(event),
                    None => control_open = false,
                },
                _ = self.clock.next_tick(period), if enabled => {
                    self.tick();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::provider::{StaticProvider, SystemInfo};
    use config::Config;
    use memory::BufferDevice;
    use std::time::Duration;

    fn vmm(config: Config) -> Arc<Vmm> {
        let device = Arc::new(BufferDevice::zeroed(0x10_0000));
        let provider = Arc::new(StaticProvider::single(SystemInfo::default(), 0, "System"));
        Arc::new(Vmm::initialize(device, provider, config).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let vmm = vmm(Config::default());
        let scheduler = RefreshScheduler::new(vmm.clone(), Arc::new(SystemClock::default()));
        let cancel = CancellationToken::new();
        let (_tx, rx) = mpsc::unbounded_channel();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run_until(cancel, rx).await })
        };
        tokio::time::sleep(Duration::from_millis(550)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(vmm.engine().now(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_refresh_still_serves_control_events() {
        let mut config = Config::default();
        config.refresh.enabled = false;
        let vmm = vmm(config);
        let scheduler = RefreshScheduler::new(vmm.clone(), Arc::new(SystemClock::default()));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = vmm.processes().generation;

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run_until(cancel, rx).await })
        };
        tx.send(ControlEvent::RefreshMedium).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(vmm.engine().now(), 0);
        assert_eq!(vmm.processes().generation, generation + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_clock_steps_ticks() {
        let vmm = vmm(Config::default());
        let clock = Arc::new(ManualClock::default());
        let scheduler = RefreshScheduler::new(vmm.clone(), clock.clone());
        let cancel = CancellationToken::new();
        let (_tx, rx) = mpsc::unbounded_channel();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run_until(cancel, rx).await })
        };
        clock.advance(3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(vmm.engine().now(), 3);
    }
}
