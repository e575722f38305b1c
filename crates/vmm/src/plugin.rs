//! Module (plugin) interface.
//!
//! A module implements the subset of callbacks it supports and reports
//! them through [`Module::capabilities`]; the dispatcher never calls a
//! callback whose capability is absent. Calls into one module are
//! serialized, calls into different modules may run concurrently.

use crate::forensic::{JsonLog, PhysBatch, Timeline};
use crate::options::Notification;
use crate::process::Process;
use crate::provider::SystemType;
use crate::vfs::{DirEntry, VfsStatus};
use crate::vmm::Vmm;
use bitflags::bitflags;
use memory::MemoryModel;
use std::sync::Arc;

bitflags! {
    /// Where a module shows up in the filesystem.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Scope: u32 {
        const ROOT = 0x1;
        const PROCESS = 0x2;
        /// Reachable under the root but left out of its listing.
        const ROOT_HIDDEN = 0x4;
        const PROCESS_HIDDEN = 0x8;
    }
}

bitflags! {
    /// Callbacks a module implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const LIST = 0x01;
        const READ = 0x02;
        const WRITE = 0x04;
        const NOTIFY = 0x08;
        const CLOSE = 0x10;
        const VISIBLE = 0x20;
        const FORENSIC = 0x40;
    }
}

/// Call context handed to every module callback.
pub struct Context<'a> {
    pub vmm: &'a Vmm,
    /// Bound process for process scoped calls.
    pub process: Option<Arc<Process>>,
    /// Path below the module directory, `/` separated, no leading slash.
    pub path: &'a str,
}

impl Context<'_> {
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid)
    }

    /// Path segments below the module directory.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

pub trait Module: Send {
    fn capabilities(&self) -> Capabilities;

    /// Entries of the directory at `ctx.path`. `None` if there is no such
    /// directory.
    fn list(&mut self, _ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        None
    }

    fn read(&mut self, _ctx: &Context<'_>, _buf: &mut [u8], _offset: u64) -> (VfsStatus, usize) {
        (VfsStatus::FileInvalid, 0)
    }

    fn write(&mut self, _ctx: &Context<'_>, _data: &[u8], _offset: u64) -> (VfsStatus, usize) {
        (VfsStatus::FileInvalid, 0)
    }

    fn notify(&mut self, _ctx: &Context<'_>, _event: Notification) {}

    /// Whether the module directory shows up in the listing for this
    /// context.
    fn visible(&mut self, _ctx: &Context<'_>) -> bool {
        true
    }

    fn close(&mut self) {}

    /// Start a forensic pass. The returned session is owned by the module
    /// and driven by the forensic runner.
    fn forensic_initialize(&mut self, _ctx: &Context<'_>) -> Option<Box<dyn ForensicSession>> {
        None
    }
}

/// Per-module state of one forensic pass.
///
/// `ingest_physmem` of different sessions runs concurrently; every other
/// callback runs on a single thread in this order: ingest_finalize,
/// timeline, log_json, finalize.
pub trait ForensicSession: Send {
    fn ingest_physmem(&mut self, _batch: &PhysBatch) {}

    fn ingest_finalize(&mut self) {}

    fn timeline(&mut self, _timeline: &mut Timeline) {}

    fn log_json(&mut self, _log: &mut JsonLog) {}

    fn finalize(&mut self) {}
}

/// What a candidate module sees at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub memory_model: MemoryModel,
    pub system_type: SystemType,
    pub version_major: u32,
    pub version_minor: u32,
    pub build: u32,
}

/// Timeline produced by a forensic module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineInfo {
    /// Up to six characters, shown in every timeline row.
    pub short_name: String,
    pub file_name: String,
}

pub struct Registration {
    pub name: String,
    pub scope: Scope,
    pub timeline: Option<TimelineInfo>,
    pub module: Box<dyn Module>,
}

impl Registration {
    pub fn new(name: impl Into<String>, scope: Scope, module: Box<dyn Module>) -> Self {
        Self {
            name: name.into(),
            scope,
            timeline: None,
            module,
        }
    }

    pub fn with_timeline(mut self, short_name: &str, file_name: &str) -> Self {
        self.timeline = Some(TimelineInfo {
            short_name: short_name.chars().take(6).collect(),
            file_name: file_name.to_owned(),
        });
        self
    }
}

/// Collects the registrations of one candidate.
pub struct Registrar<'a> {
    info: &'a RegistrationInfo,
    pending: Vec<Registration>,
}

impl<'a> Registrar<'a> {
    pub(crate) fn new(info: &'a RegistrationInfo) -> Self {
        Self {
            info,
            pending: Vec::new(),
        }
    }

    pub fn info(&self) -> &RegistrationInfo {
        self.info
    }

    /// Queue a registration. Names must be a single non-empty path
    /// segment and the scope must place the module somewhere.
    pub fn register(&mut self, registration: Registration) -> bool {
        let name = registration.name.as_str();
        let valid = !name.is_empty()
            && !name.contains(['/', '\\'])
            && registration.scope.intersects(Scope::ROOT | Scope::PROCESS);
        if valid {
            self.pending.push(registration);
        }
        valid
    }

    pub(crate) fn into_pending(self) -> Vec<Registration> {
        self.pending
    }
}

/// A candidate module: invoked once during plugin initialization.
pub type PluginInit = fn(&mut Registrar<'_>);
