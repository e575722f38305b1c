#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::Error),

    #[error("memory error: {0}")]
    Memory(#[from] memory::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine not initialized")]
    NotInitialized,

    #[error("initialization failed: {0}")]
    Initialize(String),

    #[error("unknown process: {0}")]
    UnknownProcess(u32),

    #[error("no process named {0:?}")]
    ProcessNotFound(String),

    #[error("unknown module: {0:?}")]
    UnknownModule(String),

    #[error("unknown export: {0:?}")]
    UnknownExport(String),

    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    #[error("unknown option: {0:#018x}")]
    UnknownOption(u64),

    #[error("option is read only: {0:#018x}")]
    ReadOnlyOption(u64),

    #[error("option is write only: {0:#018x}")]
    WriteOnlyOption(u64),

    #[error("invalid value {value} for option {option:#018x}")]
    InvalidValue { option: u64, value: u64 },

    #[error("forensic mode unavailable: {0}")]
    Forensic(&'static str),

    #[error("plugins already initialized")]
    PluginsInitialized,
}
