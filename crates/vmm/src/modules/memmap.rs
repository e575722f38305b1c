use super::{read_rendered, rendered_files};
use crate::maps::{PteEntry, VadEntry};
use crate::plugin::{Capabilities, Context, Module, Registrar, Registration, Scope};
use crate::vfs::{DirEntry, VfsStatus};
use memory::MemoryModel;
use std::fmt::Write as _;

pub fn register(registrar: &mut Registrar<'_>) {
    if registrar.info().memory_model == MemoryModel::Na {
        return;
    }
    registrar.register(Registration::new("memmap", Scope::PROCESS, Box::new(MemMap)));
}

struct MemMap;

pub(crate) fn pte_text(pid: u32, entries: &[PteEntry]) -> String {
    let mut out = String::new();
    for (i, pte) in entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:04x} {:>7} {:016x}-{:016x} {:>8x} {} {}",
            i,
            pid,
            pte.va_base,
            pte.last(),
            pte.pages,
            pte.protection(),
            pte.text
        );
    }
    out
}

pub(crate) fn vad_text(pid: u32, entries: &[VadEntry]) -> String {
    let mut out = String::new();
    for (i, vad) in entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:04x} {:>7} {:016x}-{:016x} {:>8x} {:<7} {}",
            i,
            pid,
            vad.start,
            vad.end,
            vad.pages(),
            vad.kind(),
            vad.text
        );
    }
    out
}

fn render(ctx: &Context<'_>, name: &str) -> Option<String> {
    let pid = ctx.pid()?;
    match name.to_ascii_lowercase().as_str() {
        "pte.txt" => ctx.vmm.map_pte(pid).ok().map(|map| pte_text(pid, &map)),
        "vad.txt" => ctx.vmm.map_vad(pid).ok().map(|map| vad_text(pid, &map)),
        _ => None,
    }
}

impl Module for MemMap {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        if !ctx.path.is_empty() {
            return None;
        }
        Some(rendered_files(&["pte.txt", "vad.txt"], |name| render(ctx, name)))
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        read_rendered(render(ctx, ctx.path), buf, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pte_rows_show_inclusive_range() {
        let text = pte_text(
            4,
            &[PteEntry {
                va_base: 0x1000,
                pages: 2,
                user: true,
                nx: true,
                text: "ntdll.dll".into(),
                ..PteEntry::default()
            }],
        );
        assert_eq!(
            text,
            "0000       4 0000000000001000-0000000000002fff        2 -r-- ntdll.dll\n"
        );
    }
}
