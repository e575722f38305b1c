use crate::error::Error;
use crate::options::Notification;
use crate::plugin::{Capabilities, Context, ForensicSession};
use crate::vmm::Vmm;
use memory::{AddressSpace, PAGE_SIZE, ReadFlags, ScatterItem};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info, info_span};

/// One structured finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRecord {
    pub module: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub va: Option<u64>,
    pub desc: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// JSON sink handed to one module.
#[derive(Debug)]
pub struct JsonLog {
    module: String,
    records: Vec<JsonRecord>,
}

impl JsonLog {
    pub(crate) fn new(module: &str) -> Self {
        Self {
            module: module.to_owned(),
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: &str, desc: impl Into<String>) -> &mut JsonRecord {
        self.records.push(JsonRecord {
            module: self.module.clone(),
            kind: kind.to_owned(),
            pid: None,
            va: None,
            desc: desc.into(),
            data: serde_json::Value::Null,
        });
        let last = self.records.len() - 1;
        &mut self.records[last]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineAction {
    Create,
    Modify,
    Read,
    Delete,
}

impl TimelineAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CRE",
            Self::Modify => "MOD",
            Self::Read => "RD",
            Self::Delete => "DEL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// FILETIME.
    pub time: u64,
    pub short_name: String,
    pub action: TimelineAction,
    pub pid: u32,
    pub va: u64,
    pub text: String,
}

/// Timeline sink handed to one module.
#[derive(Debug)]
pub struct Timeline {
    short_name: String,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub(crate) fn new(short_name: &str) -> Self {
        Self {
            short_name: short_name.to_owned(),
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, time: u64, action: TimelineAction, pid: u32, va: u64, text: impl Into<String>) {
        self.entries.push(TimelineEntry {
            time,
            short_name: self.short_name.clone(),
            action,
            pid,
            va,
            text: text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A run of physical pages read for ingestion.
#[derive(Debug)]
pub struct PhysBatch {
    pub base: u64,
    pub data: Vec<u8>,
    /// Per page: whether the device delivered it. Pages it did not are
    /// zero filled.
    pub valid: Vec<bool>,
}

impl PhysBatch {
    /// Readable pages with their physical address.
    pub fn pages(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.data
            .chunks(PAGE_SIZE)
            .zip(&self.valid)
            .enumerate()
            .filter(|(_, (_, valid))| **valid)
            .map(|(i, (page, _))| (self.base + (i * PAGE_SIZE) as u64, page))
    }

    pub fn page_count(&self) -> usize {
        self.valid.len()
    }
}

/// Results of the forensic pass shown by the `forensic` module.
#[derive(Debug, Default)]
pub struct ForensicStore {
    mode: AtomicU8,
    progress: AtomicU8,
    json: RwLock<Vec<JsonRecord>>,
    timeline: RwLock<Vec<TimelineEntry>>,
}

impl ForensicStore {
    pub fn mode(&self) -> u8 {
        self.mode.load(Ordering::Acquire)
    }

    pub(crate) fn set_mode(&self, mode: u8) {
        self.mode.store(mode, Ordering::Release);
    }

    /// Percent done of the running or last pass.
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    pub fn json_records(&self) -> Vec<JsonRecord> {
        self.json.read().clone()
    }

    /// Records as JSON lines.
    pub fn json_lines(&self) -> Result<String, Error> {
        let mut out = String::new();
        for record in self.json.read().iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.timeline.read().clone()
    }

    pub fn timeline_text(&self) -> String {
        let mut out = String::new();
        for entry in self.timeline.read().iter() {
            let _ = writeln!(
                out,
                "{:016x} {:<6} {:<3} {:>6} {:016x} {}",
                entry.time,
                entry.short_name,
                entry.action.as_str(),
                entry.pid,
                entry.va,
                entry.text
            );
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForensicReport {
    pub sessions: usize,
    pub batches: usize,
    pub pages: u64,
    pub json_records: usize,
    pub timeline_entries: usize,
}

struct Running {
    name: String,
    short_name: Option<String>,
    session: Box<dyn ForensicSession>,
}

/// Drive one forensic pass over every forensic capable module.
pub(crate) fn run(vmm: &Vmm) -> Result<ForensicReport, Error> {
    let span = info_span!("forensic", mode = vmm.forensic().mode());
    let _enter = span.enter();
    let store = vmm.forensic();
    store.progress.store(0, Ordering::Release);
    vmm.notify_all(Notification::ForensicInit);

    let registry = vmm.registry();
    let mut sessions: Vec<Running> = Vec::new();
    for slot in registry.with_capability(Capabilities::FORENSIC) {
        let ctx = Context {
            vmm,
            process: None,
            path: "",
        };
        if let Some(session) = slot.lock().forensic_initialize(&ctx) {
            sessions.push(Running {
                name: slot.name.clone(),
                short_name: slot.timeline.as_ref().map(|t| t.short_name.clone()),
                session,
            });
        }
    }
    drop(registry);
    debug!(sessions = sessions.len(), "forensic sessions initialized");

    let engine = vmm.engine();
    let max = engine.max_address();
    let batch_pages = u64::from(vmm.config().forensic.batch_pages.max(1));
    let batch_bytes = batch_pages * PAGE_SIZE as u64;
    let mut report = ForensicReport {
        sessions: sessions.len(),
        ..ForensicReport::default()
    };

    let mut base = 0;
    while base < max {
        let end = base.saturating_add(batch_bytes).min(max);
        let mut items: Vec<ScatterItem> = (base..end)
            .step_by(PAGE_SIZE)
            .map(ScatterItem::page)
            .collect();
        // zero padded by hand so device failures stay visible in `valid`
        engine.read_scatter(AddressSpace::Physical, &mut items, ReadFlags::NOCACHE);
        for item in items.iter_mut().filter(|item| !item.ok) {
            item.data.fill(0);
        }
        let batch = PhysBatch {
            base,
            valid: items.iter().map(|item| item.ok).collect(),
            data: items.into_iter().flat_map(|item| item.data).collect(),
        };
        sessions
            .par_iter_mut()
            .for_each(|running| running.session.ingest_physmem(&batch));

        report.batches += 1;
        report.pages += batch.page_count() as u64;
        let percent = (end.saturating_mul(100) / max.max(1)).min(99) as u8;
        store.progress.store(percent, Ordering::Release);
        base = end;
    }

    let mut json = Vec::new();
    let mut timeline = Vec::new();
    for running in &mut sessions {
        running.session.ingest_finalize();
    }
    for running in &mut sessions {
        if let Some(short_name) = &running.short_name {
            let mut sink = Timeline::new(short_name);
            running.session.timeline(&mut sink);
            timeline.extend(sink.entries);
        }
    }
    for running in &mut sessions {
        let mut log = JsonLog::new(&running.name);
        running.session.log_json(&mut log);
        json.extend(log.records);
    }
    for running in &mut sessions {
        running.session.finalize();
    }

    timeline.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| a.pid.cmp(&b.pid)));
    report.json_records = json.len();
    report.timeline_entries = timeline.len();
    *store.json.write() = json;
    *store.timeline.write() = timeline;
    store.progress.store(100, Ordering::Release);

    vmm.notify_all(Notification::ForensicInitComplete);
    info!(
        batches = report.batches,
        pages = report.pages,
        json = report.json_records,
        timeline = report.timeline_entries,
        "forensic pass complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn batch_pages_skip_unreadable() {
        let batch = PhysBatch {
            base: 0x10000,
            data: vec![0; PAGE_SIZE * 3],
            valid: vec![true, false, true],
        };
        let pas: Vec<u64> = batch.pages().map(|(pa, _)| pa).collect();
        assert_eq!(pas, [0x10000, 0x12000]);
    }

    #[test]
    fn json_records_serialize_without_empty_fields() {
        let mut log = JsonLog::new("memstat");
        log.record("summary", "zero pages").pid = Some(4);
        let line = serde_json::to_string(&log.records[0]).unwrap();
        assert_eq!(line, r#"{"module":"memstat","type":"summary","pid":4,"desc":"zero pages"}"#);
    }

    #[test]
    fn timeline_rows_are_fixed_width() {
        let store = ForensicStore::default();
        let mut sink = Timeline::new("THREAD");
        sink.add(0x01d9_0000_0000_0000, TimelineAction::Create, 4, 0xfffff800_0000_1000, "thread 8");
        *store.timeline.write() = sink.entries;
        assert_eq!(
            store.timeline_text(),
            "01d9000000000000 THREAD CRE      4 fffff80000001000 thread 8\n"
        );
    }
}
