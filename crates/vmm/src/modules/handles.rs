use super::{read_rendered, rendered_files};
use crate::maps::HandleEntry;
use crate::plugin::{Capabilities, Context, Module, Registrar, Registration, Scope};
use crate::vfs::{DirEntry, VfsStatus};
use std::fmt::Write as _;

pub fn register(registrar: &mut Registrar<'_>) {
    registrar.register(Registration::new("handles", Scope::PROCESS, Box::new(Handles)));
}

struct Handles;

pub(crate) fn handles_text(entries: &[HandleEntry]) -> String {
    let mut out = String::new();
    for (i, h) in entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:04x} {:>7} {:>8x} {:016x} {:08x} {:<16} {}",
            i, h.pid, h.handle, h.object_va, h.granted_access, h.type_name, h.text
        );
    }
    out
}

fn render(ctx: &Context<'_>, name: &str) -> Option<String> {
    if !name.eq_ignore_ascii_case("handles.txt") {
        return None;
    }
    let map = ctx.vmm.map_handle(ctx.pid()?).ok()?;
    Some(handles_text(&map))
}

impl Module for Handles {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        ctx.path
            .is_empty()
            .then(|| rendered_files(&["handles.txt"], |name| render(ctx, name)))
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        read_rendered(render(ctx, ctx.path), buf, offset)
    }
}
