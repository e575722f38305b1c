use crate::error::Error;
use flume::Sender;
use tokio::signal::unix::{SignalKind, signal};
use tracing::debug;

/// What a received signal asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGUSR1: drop every cache and rebuild all snapshots.
    RefreshAll,
    /// SIGUSR2: log engine and cache state.
    DumpState,
    /// SIGINT or SIGTERM.
    Shutdown,
}

/// Forward signals as [`SignalEvent`]s until a shutdown request has been
/// sent.
pub async fn forward_signals(events: &Sender<SignalEvent>) -> Result<(), Error> {
    let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(Error::SignalHandler)?;
    let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(Error::SignalHandler)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::SignalHandler)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::SignalHandler)?;

    loop {
        let event = tokio::select! {
            _ = sigusr1.recv() => SignalEvent::RefreshAll,
            _ = sigusr2.recv() => SignalEvent::DumpState,
            _ = sigint.recv() => SignalEvent::Shutdown,
            _ = sigterm.recv() => SignalEvent::Shutdown,
        };
        debug!(?event, "signal received");
        events.send_async(event).await?;
        if event == SignalEvent::Shutdown {
            return Ok(());
        }
    }
}
