use super::{read_rendered, rendered_files};
use crate::maps::ThreadEntry;
use crate::plugin::{Capabilities, Context, Module, Registrar, Registration, Scope};
use crate::vfs::{DirEntry, VfsStatus};
use std::fmt::Write as _;

pub fn register(registrar: &mut Registrar<'_>) {
    registrar.register(Registration::new("threads", Scope::PROCESS, Box::new(Threads)));
}

struct Threads;

pub(crate) fn threads_text(entries: &[ThreadEntry]) -> String {
    let mut out = format!(
        "{:<6} {:>7} {:>7} {:<16} {:<16} {:<16} {:>4} {:>8}\n",
        "#", "PID", "TID", "ETHREAD", "TEB", "START", "PRI", "EXIT"
    );
    for (i, t) in entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:04x}   {:>7} {:>7} {:016x} {:016x} {:016x} {:>4} {:08x}",
            i, t.pid, t.tid, t.ethread, t.teb, t.start_address, t.priority, t.exit_status
        );
    }
    out
}

fn render(ctx: &Context<'_>, name: &str) -> Option<String> {
    if !name.eq_ignore_ascii_case("threads.txt") {
        return None;
    }
    let map = ctx.vmm.map_thread(ctx.pid()?).ok()?;
    Some(threads_text(&map))
}

impl Module for Threads {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        ctx.path
            .is_empty()
            .then(|| rendered_files(&["threads.txt"], |name| render(ctx, name)))
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        read_rendered(render(ctx, ctx.path), buf, offset)
    }
}
