use super::{read_rendered, rendered_files};
use crate::plugin::{Capabilities, Context, Module, Registrar, Registration, Scope};
use crate::process::ProcessTable;
use crate::vfs::{DirEntry, VfsStatus};
use std::collections::HashSet;
use std::fmt::Write as _;

const FILES: [&str; 3] = ["version.txt", "memorymodel.txt", "tick.txt"];

pub fn register(registrar: &mut Registrar<'_>) {
    registrar.register(Registration::new("sys", Scope::ROOT, Box::new(Sys)));
}

struct Sys;

impl Sys {
    fn render(ctx: &Context<'_>, path: &str) -> Option<String> {
        let vmm = ctx.vmm;
        match path.to_ascii_lowercase().as_str() {
            "version.txt" => {
                let system = vmm.system();
                Some(format!(
                    "{}.{}.{}\n",
                    system.version_major, system.version_minor, system.build
                ))
            }
            "memorymodel.txt" => Some(format!("{}\n", vmm.engine().model())),
            "tick.txt" => Some(format!("{}\n", vmm.engine().now())),
            "proc/proc.txt" => Some(process_tree(&vmm.processes())),
            _ => None,
        }
    }
}

impl Module for Sys {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        match ctx.path {
            "" => {
                let mut entries = rendered_files(&FILES, |name| Self::render(ctx, name));
                entries.push(DirEntry::dir("proc"));
                Some(entries)
            }
            "proc" => Some(rendered_files(&["proc.txt"], |name| {
                Self::render(ctx, &format!("proc/{name}"))
            })),
            _ => None,
        }
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        read_rendered(Self::render(ctx, ctx.path), buf, offset)
    }
}

/// Indented process tree. Processes whose parent is not in the snapshot
/// are roots.
pub(crate) fn process_tree(table: &ProcessTable) -> String {
    fn walk(table: &ProcessTable, pid: u32, depth: usize, seen: &mut HashSet<u32>, out: &mut String) {
        if !seen.insert(pid) {
            return;
        }
        let Some(process) = table.get(pid) else {
            return;
        };
        let _ = writeln!(
            out,
            "{:<8}{:<16}{:>7}{:>7}  {}",
            "-".repeat(depth + 1),
            process.short_name(),
            process.pid,
            process.info.ppid,
            process.info.state
        );
        for child in table.children(pid) {
            walk(table, child.pid, depth + 1, seen, out);
        }
    }

    let mut out = format!("{:<8}{:<16}{:>7}{:>7}  {}\n", "", "NAME", "PID", "PPID", "STATE");
    let mut seen = HashSet::new();
    let roots: Vec<u32> = table
        .iter()
        .filter(|p| p.info.ppid == p.pid || table.get(p.info.ppid).is_none())
        .map(|p| p.pid)
        .collect();
    for pid in roots {
        walk(table, pid, 0, &mut seen, &mut out);
    }
    // parent cycles leave processes without a root
    for pid in table.pids() {
        walk(table, pid, 0, &mut seen, &mut out);
    }
    out
}
