use super::read_rendered;
use crate::forensic::{JsonLog, PhysBatch, Timeline, TimelineAction};
use crate::plugin::{Capabilities, Context, ForensicSession, Module, Registrar, Registration, Scope};
use crate::vfs::{DirEntry, VfsStatus};
use crate::vmm::Vmm;
use serde_json::json;
use tracing::{debug, warn};

pub fn register(registrar: &mut Registrar<'_>) {
    registrar.register(
        Registration::new("forensic", Scope::ROOT, Box::new(Forensic))
            .with_timeline("THREAD", "timeline_thread.txt"),
    );
}

struct Forensic;

fn render(vmm: &Vmm, path: &str) -> Option<String> {
    let store = vmm.forensic();
    match path.to_ascii_lowercase().as_str() {
        "progress_percent.txt" => Some(format!("{}\n", store.progress())),
        "json/general.json" => match store.json_lines() {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(%err, "forensic json unavailable");
                None
            }
        },
        "timeline/timeline.txt" => Some(store.timeline_text()),
        _ => None,
    }
}

fn file(vmm: &Vmm, path: &str, name: &str) -> Option<DirEntry> {
    render(vmm, path).map(|text| DirEntry::file(name, text.len() as u64))
}

impl Module for Forensic {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ | Capabilities::VISIBLE | Capabilities::FORENSIC
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        let vmm = ctx.vmm;
        match ctx.path.to_ascii_lowercase().as_str() {
            "" => Some(
                file(vmm, "progress_percent.txt", "progress_percent.txt")
                    .into_iter()
                    .chain([DirEntry::dir("json"), DirEntry::dir("timeline")])
                    .collect(),
            ),
            "json" => Some(file(vmm, "json/general.json", "general.json").into_iter().collect()),
            "timeline" => Some(
                file(vmm, "timeline/timeline.txt", "timeline.txt")
                    .into_iter()
                    .collect(),
            ),
            _ => None,
        }
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        read_rendered(render(ctx.vmm, ctx.path), buf, offset)
    }

    fn visible(&mut self, ctx: &Context<'_>) -> bool {
        ctx.vmm.forensic().mode() > 0
    }

    fn forensic_initialize(&mut self, ctx: &Context<'_>) -> Option<Box<dyn ForensicSession>> {
        let mut threads = Vec::new();
        for pid in ctx.vmm.pid_list() {
            if let Ok(map) = ctx.vmm.map_thread(pid) {
                threads.extend(
                    map.iter()
                        .filter(|t| t.create_time != 0)
                        .map(|t| (t.create_time, pid, t.tid, t.start_address)),
                );
            }
        }
        debug!(threads = threads.len(), "physical memory profile started");
        Some(Box::new(MemProfile {
            threads,
            ..MemProfile::default()
        }))
    }
}

#[derive(Debug, Default)]
struct MemProfile {
    zero_pages: u64,
    data_pages: u64,
    unreadable_pages: u64,
    /// (create time, pid, tid, start address)
    threads: Vec<(u64, u32, u32, u64)>,
}

impl ForensicSession for MemProfile {
    fn ingest_physmem(&mut self, batch: &PhysBatch) {
        let mut readable = 0;
        for (_, page) in batch.pages() {
            readable += 1;
            if page.iter().all(|&b| b == 0) {
                self.zero_pages += 1;
            } else {
                self.data_pages += 1;
            }
        }
        self.unreadable_pages += batch.page_count() as u64 - readable;
    }

    fn timeline(&mut self, timeline: &mut Timeline) {
        for &(time, pid, tid, start) in &self.threads {
            timeline.add(time, TimelineAction::Create, pid, start, format!("thread {tid}"));
        }
    }

    fn log_json(&mut self, log: &mut JsonLog) {
        log.record("physmem", "physical memory profile").data = json!({
            "zero_pages": self.zero_pages,
            "data_pages": self.data_pages,
            "unreadable_pages": self.unreadable_pages,
        });
        log.record("threads", "threads with a creation time").data = json!({
            "count": self.threads.len(),
        });
    }

    fn finalize(&mut self) {
        self.threads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::PAGE_SIZE;

    #[test]
    fn profile_counts_zero_data_and_unreadable_pages() {
        let mut data = vec![0u8; PAGE_SIZE * 3];
        data[PAGE_SIZE] = 0x90;
        let batch = PhysBatch {
            base: 0,
            data,
            valid: vec![true, true, false],
        };
        let mut profile = MemProfile::default();
        profile.ingest_physmem(&batch);
        assert_eq!(
            (profile.zero_pages, profile.data_pages, profile.unreadable_pages),
            (1, 1, 1)
        );
    }
}
