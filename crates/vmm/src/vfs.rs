//! Virtual filesystem dispatcher.
//!
//! Paths are `/` (or `\`) separated. The root holds `memory.pmem`, the
//! `pid` and `name` process directories and every root module; a process
//! directory holds `memory.vmem` and every process module. Anything below
//! a module directory is handed to the module as its residual path.

use crate::plugin::{Capabilities, Context};
use crate::process::Process;
use crate::registry::{ModuleSlot, Registry};
use crate::vmm::Vmm;
use memory::{AddressSpace, ReadFlags};
use std::sync::Arc;
use tracing::{trace, warn};

/// Result of a VFS read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfsStatus {
    Success,
    EndOfFile,
    FileInvalid,
    Unsuccessful,
    /// Request larger than can be served atomically.
    FileSystemLimitation,
}

impl VfsStatus {
    /// NTSTATUS value.
    pub fn code(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::EndOfFile => 0xC000_0011,
            Self::FileInvalid => 0xC000_0098,
            Self::Unsuccessful => 0xC000_0001,
            Self::FileSystemLimitation => 0xC000_0427,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { size: u64 },
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File { size },
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn size(&self) -> Option<u64> {
        match self.kind {
            EntryKind::File { size } => Some(size),
            EntryKind::Directory => None,
        }
    }
}

/// Entries of one directory, produced in a single pass.
#[derive(Debug)]
pub struct Listing {
    entries: std::vec::IntoIter<DirEntry>,
}

impl Listing {
    fn new(entries: Vec<DirEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for Listing {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for Listing {}

pub(crate) const PMEM: &str = "memory.pmem";
pub(crate) const VMEM: &str = "memory.vmem";

enum Target<'p> {
    Root,
    Pmem,
    PidIndex,
    NameIndex,
    ProcessDir(Arc<Process>),
    Vmem(Arc<Process>),
    Module {
        name: &'p str,
        process: Option<Arc<Process>>,
        rest: &'p str,
    },
}

fn split_first(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((first, rest)) => (first, rest.trim_start_matches('/')),
        None => (path, ""),
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_owned()
}

/// `<name>-<pid>` as listed under `name/`.
fn name_dir_pid(segment: &str) -> Option<u32> {
    segment.rsplit_once('-')?.1.parse().ok()
}

fn resolve<'p>(vmm: &Vmm, path: &'p str) -> Option<Target<'p>> {
    if path.is_empty() {
        return Some(Target::Root);
    }
    let (first, rest) = split_first(path);
    let process = match first.to_ascii_lowercase().as_str() {
        PMEM if rest.is_empty() => return Some(Target::Pmem),
        "pid" | "name" if rest.is_empty() => {
            return Some(if first.eq_ignore_ascii_case("pid") {
                Target::PidIndex
            } else {
                Target::NameIndex
            });
        }
        "pid" => {
            let (segment, rest) = split_first(rest);
            let pid = segment.parse().ok()?;
            (vmm.processes().get(pid)?.clone(), rest)
        }
        "name" => {
            let (segment, rest) = split_first(rest);
            let pid = name_dir_pid(segment)?;
            let process = vmm.processes().get(pid)?.clone();
            let expected = format!("{}-{}", process.short_name(), pid);
            if !segment.eq_ignore_ascii_case(&expected) {
                return None;
            }
            (process, rest)
        }
        _ => {
            return Some(Target::Module {
                name: first,
                process: None,
                rest,
            });
        }
    };

    let (process, rest) = process;
    if rest.is_empty() {
        return Some(Target::ProcessDir(process));
    }
    let (first, rest) = split_first(rest);
    if first.eq_ignore_ascii_case(VMEM) && rest.is_empty() {
        return Some(Target::Vmem(process));
    }
    Some(Target::Module {
        name: first,
        process: Some(process),
        rest,
    })
}

fn find_module<'r>(
    registry: &'r Registry,
    name: &str,
    process: &Option<Arc<Process>>,
) -> Option<&'r ModuleSlot> {
    registry.find(name, process.is_some())
}

fn module_entries(vmm: &Vmm, registry: &Registry, process: Option<&Arc<Process>>) -> Vec<DirEntry> {
    registry
        .listed(process.is_some())
        .filter(|slot| {
            if !slot.has(Capabilities::VISIBLE) {
                return true;
            }
            let ctx = Context {
                vmm,
                process: process.cloned(),
                path: "",
            };
            slot.lock().visible(&ctx)
        })
        .map(|slot| DirEntry::dir(slot.name.clone()))
        .collect()
}

pub(crate) fn list(vmm: &Vmm, path: &str) -> Option<Listing> {
    let path = normalize(path);
    let entries = match resolve(vmm, &path)? {
        Target::Root => {
            let registry = vmm.registry();
            let mut entries = vec![
                DirEntry::file(PMEM, vmm.engine().max_address()),
                DirEntry::dir("name"),
                DirEntry::dir("pid"),
            ];
            entries.extend(module_entries(vmm, &registry, None));
            entries
        }
        Target::PidIndex => vmm
            .processes()
            .iter()
            .map(|p| DirEntry::dir(p.pid.to_string()))
            .collect(),
        Target::NameIndex => vmm
            .processes()
            .iter()
            .map(|p| DirEntry::dir(format!("{}-{}", p.short_name(), p.pid)))
            .collect(),
        Target::ProcessDir(process) => {
            let registry = vmm.registry();
            let mut entries = vec![DirEntry::file(
                VMEM,
                process.vmem_size(vmm.engine().model()),
            )];
            entries.extend(module_entries(vmm, &registry, Some(&process)));
            entries
        }
        Target::Module {
            name,
            process,
            rest,
        } => {
            let registry = vmm.registry();
            let slot = find_module(&registry, name, &process)?;
            if !slot.has(Capabilities::LIST) {
                return rest.is_empty().then(|| Listing::new(Vec::new()));
            }
            let ctx = Context {
                vmm,
                process,
                path: rest,
            };
            slot.lock().list(&ctx)?
        }
        Target::Pmem | Target::Vmem(_) => return None,
    };
    Some(Listing::new(entries))
}

/// Clamp a raw memory request against the file size.
fn clamp(len: usize, offset: u64, size: u64) -> Option<usize> {
    if offset >= size {
        return None;
    }
    let left = size - offset;
    Some(usize::try_from(left).map_or(len, |left| len.min(left)))
}

fn read_raw(vmm: &Vmm, space: AddressSpace, size: u64, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    let Some(len) = clamp(buf.len(), offset, size) else {
        return (VfsStatus::EndOfFile, 0);
    };
    let flags = if space.is_physical() {
        ReadFlags::ZEROPAD_ON_FAIL
    } else {
        ReadFlags::empty()
    };
    let (data, read) = vmm.engine().read_ex(space, offset, len, flags);
    trace!(%space, offset, len, read, "raw memory file read");
    // unreadable ranges read as zeros
    buf[..len].copy_from_slice(&data);
    (VfsStatus::Success, len)
}

fn write_raw(vmm: &Vmm, space: AddressSpace, size: u64, data: &[u8], offset: u64) -> (VfsStatus, usize) {
    let Some(len) = clamp(data.len(), offset, size) else {
        return (VfsStatus::EndOfFile, 0);
    };
    match vmm.engine().write(space, offset, &data[..len]) {
        Ok(()) => (VfsStatus::Success, len),
        Err(err) => {
            warn!(%space, offset, len, %err, "raw memory file write failed");
            (VfsStatus::Unsuccessful, 0)
        }
    }
}

pub(crate) fn read(vmm: &Vmm, path: &str, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    if buf.len() as u64 > vmm.config().vfs.read_limit {
        return (VfsStatus::FileSystemLimitation, 0);
    }
    let path = normalize(path);
    match resolve(vmm, &path) {
        Some(Target::Pmem) => {
            let size = vmm.engine().max_address();
            read_raw(vmm, AddressSpace::Physical, size, buf, offset)
        }
        Some(Target::Vmem(process)) => {
            let size = process.vmem_size(vmm.engine().model());
            read_raw(vmm, process.space(false), size, buf, offset)
        }
        Some(Target::Module {
            name,
            process,
            rest,
        }) => {
            let registry = vmm.registry();
            let Some(slot) = find_module(&registry, name, &process) else {
                return (VfsStatus::FileInvalid, 0);
            };
            if !slot.has(Capabilities::READ) {
                return (VfsStatus::FileInvalid, 0);
            }
            let ctx = Context {
                vmm,
                process,
                path: rest,
            };
            slot.lock().read(&ctx, buf, offset)
        }
        _ => (VfsStatus::FileInvalid, 0),
    }
}

pub(crate) fn write(vmm: &Vmm, path: &str, data: &[u8], offset: u64) -> (VfsStatus, usize) {
    if data.len() as u64 > vmm.config().vfs.read_limit {
        return (VfsStatus::FileSystemLimitation, 0);
    }
    let path = normalize(path);
    match resolve(vmm, &path) {
        Some(Target::Pmem) => {
            let size = vmm.engine().max_address();
            write_raw(vmm, AddressSpace::Physical, size, data, offset)
        }
        Some(Target::Vmem(process)) => {
            let size = process.vmem_size(vmm.engine().model());
            write_raw(vmm, process.space(false), size, data, offset)
        }
        Some(Target::Module {
            name,
            process,
            rest,
        }) => {
            let registry = vmm.registry();
            let Some(slot) = find_module(&registry, name, &process) else {
                return (VfsStatus::FileInvalid, 0);
            };
            if !slot.has(Capabilities::WRITE) {
                return (VfsStatus::FileInvalid, 0);
            }
            let ctx = Context {
                vmm,
                process,
                path: rest,
            };
            slot.lock().write(&ctx, data, offset)
        }
        _ => (VfsStatus::FileInvalid, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_residual_path() {
        assert_eq!(split_first("sys/proc/proc.txt"), ("sys", "proc/proc.txt"));
        assert_eq!(split_first("sys"), ("sys", ""));
        assert_eq!(normalize("\\pid\\4\\"), "pid/4");
    }

    #[test]
    fn name_directories_end_in_pid() {
        assert_eq!(name_dir_pid("svchost.exe-812"), Some(812));
        assert_eq!(name_dir_pid("a-b-c-9"), Some(9));
        assert_eq!(name_dir_pid("system"), None);
    }

    #[test]
    fn clamp_stops_at_file_size() {
        assert_eq!(clamp(16, 0, 8), Some(8));
        assert_eq!(clamp(4, 2, 8), Some(4));
        assert_eq!(clamp(4, 8, 8), None);
        assert_eq!(clamp(4, 0, u64::MAX), Some(4));
    }

    #[test]
    fn status_codes_are_ntstatus() {
        assert_eq!(VfsStatus::Success.code(), 0);
        assert_eq!(VfsStatus::EndOfFile.code(), 0xC000_0011);
        assert_eq!(VfsStatus::FileSystemLimitation.code(), 0xC000_0427);
    }
}
