use crate::signals::SignalEvent;
use flume::SendError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("Failed to send signal event: {0}")]
    SendSignal(#[from] SendError<SignalEvent>),

    #[error("Failed to open device {path:?}: {source}")]
    OpenDevice {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Device {0:?} is empty")]
    EmptyDevice(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] vmm::Error),

    #[error("Failed to read {path}: {status:?}")]
    Read { path: String, status: vmm::VfsStatus },
}
