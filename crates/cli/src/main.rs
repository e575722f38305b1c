use clap::Parser;
use config::Config;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_log::AsTrace;
use vmm::{StaticProvider, SystemInfo, Vmm};
use vmmfs::{
    cli::{Cli, Command},
    commands,
    device::DumpDevice,
};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.log_level_filter().as_trace())
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    debug!(config = ?cli);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        _ => Config::new(),
    };
    if cli.norefresh {
        config.refresh.enabled = false;
    }
    if let Some(mode) = cli.forensic {
        config.forensic.mode = mode;
    }
    if let Some(model) = cli.memorymodel {
        config.memory.model = model.into();
    }

    let device = DumpDevice::open(&cli.device)?;
    let provider = match cli.dtb {
        Some(dtb) => StaticProvider::single(SystemInfo::default(), dtb, "System"),
        None => StaticProvider::default(),
    };
    let vmm = Vmm::initialize(Arc::new(device), Arc::new(provider), config)?;
    let active = vmm.initialize_plugins()?;
    info!(active, "plugins initialized");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Ls { path } => commands::ls(&vmm, &path, &mut out)?,
        Command::Cat {
            path,
            offset,
            length,
        } => {
            commands::cat(&vmm, &path, offset, length, &mut out)?;
        }
        Command::Info => commands::info(&vmm, &mut out)?,
        Command::Serve => {
            drop(out);
            return Ok(commands::serve(Arc::new(vmm)).await?);
        }
    }
    out.flush()?;
    Ok(())
}
