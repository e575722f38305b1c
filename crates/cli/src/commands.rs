use crate::error::Error;
use crate::signals::{SignalEvent, forward_signals};
use memory::MemoryModel;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vmm::{ControlEvent, EntryKind, RefreshScheduler, SystemClock, VfsStatus, Vmm};

/// Largest chunk moved per `vfs_read` call, further capped by `vfs.read_limit`.
const CHUNK: usize = 1 << 20;

pub fn ls(vmm: &Vmm, path: &str, out: &mut impl Write) -> Result<(), Error> {
    let listing = vmm
        .vfs_list(path)
        .ok_or_else(|| Error::NotADirectory(path.to_owned()))?;
    for entry in listing {
        match entry.kind {
            EntryKind::Directory => writeln!(out, "{:>16}  {}/", "", entry.name)?,
            EntryKind::File { size } => writeln!(out, "{size:>16}  {}", entry.name)?,
        }
    }
    Ok(())
}

/// Copy `length` bytes (or up to end of file) starting at `offset`.
pub fn cat(
    vmm: &Vmm,
    path: &str,
    offset: u64,
    length: Option<u64>,
    out: &mut impl Write,
) -> Result<u64, Error> {
    let chunk = CHUNK.min(vmm.config().vfs.read_limit as usize).max(1) as u64;
    let mut buf = vec![0u8; chunk as usize];
    let mut done = 0u64;
    loop {
        let want = length.map_or(chunk, |length| (length - done).min(chunk));
        if want == 0 {
            break;
        }
        let want = want as usize;
        let (status, n) = vmm.vfs_read(path, &mut buf[..want], offset + done);
        match status {
            VfsStatus::Success => {}
            VfsStatus::EndOfFile => break,
            status => {
                return Err(Error::Read {
                    path: path.to_owned(),
                    status,
                });
            }
        }
        out.write_all(&buf[..n])?;
        done += n as u64;
        if n < want {
            break;
        }
    }
    debug!(path, offset, bytes = done, "file copied");
    Ok(done)
}

pub fn info(vmm: &Vmm, out: &mut impl Write) -> Result<(), Error> {
    let system = vmm.system();
    let engine = vmm.engine();
    writeln!(out, "memory model:  {}", engine.model())?;
    writeln!(out, "max address:   {:#x}", engine.max_address())?;
    writeln!(
        out,
        "system:        {:?} {}.{} build {}",
        system.system_type, system.version_major, system.version_minor, system.build
    )?;
    let processes = vmm.processes();
    writeln!(out, "processes:     {}", processes.len())?;
    for process in processes.iter() {
        writeln!(
            out,
            "  {:>7} {:<16} dtb {:#x}",
            process.pid,
            process.short_name(),
            process.info.dtb
        )?;
    }
    if engine.model() == MemoryModel::Na {
        writeln!(out, "(physical memory only)")?;
    }
    Ok(())
}

fn dump_state(vmm: &Vmm) {
    let stats = vmm.engine().stats();
    info!(
        tick = stats.tick,
        model = %stats.model,
        processes = vmm.processes().len(),
        scatter_calls = stats.scatter_calls,
        device_batches = stats.device_batches,
        device_pages = stats.device_pages,
        "engine state"
    );
    for pool in [&stats.data, &stats.tables, &stats.walks] {
        info!(
            pool = pool.name,
            entries = pool.entries,
            hits = pool.hits,
            misses = pool.misses,
            sweeps = pool.sweeps,
            "cache pool"
        );
    }
}

/// Run the refresh scheduler until SIGINT or SIGTERM.
pub async fn serve(vmm: Arc<Vmm>) -> Result<(), Error> {
    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let scheduler = RefreshScheduler::new(vmm.clone(), Arc::new(SystemClock::default()));
    let scheduler_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run_until(cancel, control_rx).await })
    };

    let (events_tx, events_rx) = flume::bounded(8);
    info!("serving, SIGUSR1 refreshes, SIGUSR2 dumps state");
    let result = loop {
        tokio::select! {
            res = forward_signals(&events_tx) => {
                if let Err(err) = res {
                    error!(error = ?err, "Error while waiting for signal");
                    break Err(err);
                }
            }
            event = events_rx.recv_async() => match event {
                Ok(SignalEvent::RefreshAll) => {
                    // scheduler gone means shutdown is under way
                    let _ = control_tx.send(ControlEvent::RefreshAll);
                }
                Ok(SignalEvent::DumpState) => dump_state(&vmm),
                Ok(SignalEvent::Shutdown) | Err(_) => break Ok(()),
            },
        }
    };

    cancel.cancel();
    if let Err(err) = scheduler_task.await {
        error!(%err, "refresh scheduler panicked");
    }
    vmm.close();
    result
}
