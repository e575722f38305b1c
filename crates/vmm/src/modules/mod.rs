pub mod conf;
pub mod forensic;
pub mod handles;
pub mod ldrmodules;
pub mod memmap;
pub mod net;
pub mod sys;
pub mod threads;

use crate::plugin::PluginInit;
use crate::vfs::{DirEntry, VfsStatus};
use crate::vfs_util::read_text;

/// Candidates registered by `Vmm::initialize_plugins`.
pub const BUILTIN: &[PluginInit] = &[
    sys::register,
    conf::register,
    memmap::register,
    ldrmodules::register,
    threads::register,
    handles::register,
    net::register,
    forensic::register,
];

/// Serve a rendered text file, or `FileInvalid` if there is none.
pub(crate) fn read_rendered(text: Option<String>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    match text {
        Some(text) => read_text(&text, buf, offset),
        None => (VfsStatus::FileInvalid, 0),
    }
}

/// Directory entries for a fixed set of rendered files.
pub(crate) fn rendered_files<'a>(
    names: &[&'a str],
    mut render: impl FnMut(&'a str) -> Option<String>,
) -> Vec<DirEntry> {
    names
        .iter()
        .filter_map(|&name| render(name).map(|text| DirEntry::file(name, text.len() as u64)))
        .collect()
}
