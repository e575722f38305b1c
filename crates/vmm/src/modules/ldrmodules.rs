use super::read_rendered;
use crate::maps::ModuleEntry;
use crate::plugin::{Capabilities, Context, Module, Registrar, Registration, Scope};
use crate::vfs::{DirEntry, VfsStatus};
use crate::vfs_util::{read_u32_hex, read_u64_hex};

const FILES: [&str; 4] = ["base.txt", "size.txt", "entry.txt", "fullname.txt"];

pub fn register(registrar: &mut Registrar<'_>) {
    registrar.register(Registration::new("modules", Scope::PROCESS, Box::new(LdrModules)));
}

struct LdrModules;

fn lookup(ctx: &Context<'_>, name: &str) -> Option<ModuleEntry> {
    let pid = ctx.pid()?;
    if name.is_empty() {
        return None;
    }
    ctx.vmm.map_module_from_name(pid, name).ok()
}

fn file_size(module: &ModuleEntry, file: &str) -> Option<u64> {
    match file {
        "base.txt" | "entry.txt" => Some(16),
        "size.txt" => Some(8),
        "fullname.txt" => Some(module.full_name.len() as u64),
        _ => None,
    }
}

impl Module for LdrModules {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        let mut segments = ctx.segments();
        match (segments.next(), segments.next()) {
            (None, _) => {
                let modules = ctx.vmm.map_module(ctx.pid()?).ok()?;
                Some(modules.iter().map(|m| DirEntry::dir(m.name.clone())).collect())
            }
            (Some(name), None) => {
                let module = lookup(ctx, name)?;
                Some(
                    FILES
                        .iter()
                        .filter_map(|file| file_size(&module, file).map(|size| DirEntry::file(*file, size)))
                        .collect(),
                )
            }
            _ => None,
        }
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        let Some((name, file)) = ctx.path.rsplit_once('/') else {
            return (VfsStatus::FileInvalid, 0);
        };
        let Some(module) = lookup(ctx, name) else {
            return (VfsStatus::FileInvalid, 0);
        };
        match file.to_ascii_lowercase().as_str() {
            "base.txt" => read_u64_hex(module.base, buf, offset),
            "entry.txt" => read_u64_hex(module.entry, buf, offset),
            "size.txt" => read_u32_hex(module.image_size, buf, offset),
            "fullname.txt" => read_rendered(Some(module.full_name), buf, offset),
            _ => (VfsStatus::FileInvalid, 0),
        }
    }
}
