use super::{read_rendered, rendered_files};
use crate::options;
use crate::plugin::{Capabilities, Context, Module, Registrar, Registration, Scope};
use crate::vfs::{DirEntry, VfsStatus};
use crate::vfs_util::{write_bool, write_u64};
use crate::vmm::Vmm;
use humansize::{BINARY, format_size};
use memory::PAGE_SIZE;
use std::fmt::Write as _;
use tracing::debug;

/// (file, option key, writable, boolean)
const TUNABLES: [(&str, u64, bool, bool); 5] = [
    ("refresh_enabled.txt", options::CONFIG_IS_REFRESH_ENABLED, false, true),
    ("tick_period_ms.txt", options::CONFIG_TICK_PERIOD, true, false),
    ("cache_mem_ticks.txt", options::CONFIG_READCACHE_TICKS, true, false),
    ("cache_tlb_ticks.txt", options::CONFIG_TLBCACHE_TICKS, true, false),
    ("paging_enabled.txt", options::CONFIG_IS_PAGING_ENABLED, true, true),
];

const STATISTICS: &str = "statistics.txt";

pub fn register(registrar: &mut Registrar<'_>) {
    registrar.register(Registration::new("conf", Scope::ROOT, Box::new(Conf)));
}

struct Conf;

fn tunable(name: &str) -> Option<(u64, bool, bool)> {
    TUNABLES
        .iter()
        .find(|(file, ..)| file.eq_ignore_ascii_case(name))
        .map(|&(_, key, writable, boolean)| (key, writable, boolean))
}

fn render(vmm: &Vmm, name: &str) -> Option<String> {
    if name.eq_ignore_ascii_case(STATISTICS) {
        return Some(statistics(vmm));
    }
    let (key, _, _) = tunable(name)?;
    let value = vmm.config_get(key).ok()?;
    Some(format!("{value}\n"))
}

fn statistics(vmm: &Vmm) -> String {
    let stats = vmm.engine().stats();
    let mut out = String::new();
    let _ = writeln!(out, "tick:            {}", stats.tick);
    let _ = writeln!(out, "memory model:    {}", stats.model);
    let _ = writeln!(
        out,
        "scatter calls:   {} ({} of {} items satisfied)",
        stats.scatter_calls, stats.items_satisfied, stats.items_requested
    );
    let _ = writeln!(
        out,
        "device:          {} batches, {} read",
        stats.device_batches,
        format_size(stats.device_pages * PAGE_SIZE as u64, BINARY)
    );
    let _ = writeln!(
        out,
        "coalesced:       {}  predicted: {}  zero padded: {}  recovered: {}",
        stats.coalesced, stats.predicted_pages, stats.zero_padded, stats.recovered
    );
    let _ = writeln!(
        out,
        "\n{:<6} {:>10} {:>8} {:>8} {:>10} {:>10} {:>8} {:>10}",
        "POOL", "SIZE", "REGIONS", "TICKS", "HITS", "MISSES", "SWEEPS", "PREDICTED"
    );
    for pool in [&stats.data, &stats.tables, &stats.walks] {
        let _ = writeln!(
            out,
            "{:<6} {:>10} {:>8} {:>8} {:>10} {:>10} {:>8} {:>10}",
            pool.name,
            format_size(pool.entries * PAGE_SIZE, BINARY),
            pool.regions,
            pool.validity,
            pool.hits,
            pool.misses,
            pool.sweeps,
            pool.predictive_hits
        );
    }
    out.push('\n');
    out.push_str(&vmm.stats().render());
    out
}

impl Module for Conf {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ | Capabilities::WRITE
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        if !ctx.path.is_empty() {
            return None;
        }
        let mut names: Vec<&str> = TUNABLES.iter().map(|(file, ..)| *file).collect();
        names.push(STATISTICS);
        Some(rendered_files(&names, |name| render(ctx.vmm, name)))
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        read_rendered(render(ctx.vmm, ctx.path), buf, offset)
    }

    fn write(&mut self, ctx: &Context<'_>, data: &[u8], offset: u64) -> (VfsStatus, usize) {
        let Some((key, writable, boolean)) = tunable(ctx.path) else {
            return (VfsStatus::FileInvalid, 0);
        };
        if !writable {
            return (VfsStatus::Unsuccessful, 0);
        }
        let value = if boolean {
            write_bool(data, offset).map(u64::from)
        } else {
            write_u64(data, offset)
        };
        let Some(value) = value else {
            return (VfsStatus::Unsuccessful, 0);
        };
        match ctx.vmm.config_set(key, value) {
            Ok(()) => {
                debug!(file = ctx.path, value, "tunable written");
                (VfsStatus::Success, data.len())
            }
            Err(_) => (VfsStatus::Unsuccessful, 0),
        }
    }
}
