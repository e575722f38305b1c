use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    InitializePlugins,
    ConfigGet,
    ConfigSet,
    MemReadScatter,
    MemRead,
    MemReadEx,
    MemReadPage,
    MemWrite,
    MemPrefetch,
    MemVirtToPhys,
    MapPte,
    MapVad,
    MapVadEx,
    MapModule,
    MapModuleFromName,
    MapUnloadedModule,
    MapEat,
    MapIat,
    MapHeap,
    MapThread,
    MapHandle,
    MapNet,
    MapPhysMem,
    MapUser,
    MapService,
    MapPfn,
    PidList,
    PidFromName,
    ProcessInformation,
    ProcessString,
    ProcAddress,
    ModuleBase,
    VfsList,
    VfsRead,
    VfsWrite,
}

impl Call {
    pub const ALL: [Call; 35] = [
        Call::InitializePlugins,
        Call::ConfigGet,
        Call::ConfigSet,
        Call::MemReadScatter,
        Call::MemRead,
        Call::MemReadEx,
        Call::MemReadPage,
        Call::MemWrite,
        Call::MemPrefetch,
        Call::MemVirtToPhys,
        Call::MapPte,
        Call::MapVad,
        Call::MapVadEx,
        Call::MapModule,
        Call::MapModuleFromName,
        Call::MapUnloadedModule,
        Call::MapEat,
        Call::MapIat,
        Call::MapHeap,
        Call::MapThread,
        Call::MapHandle,
        Call::MapNet,
        Call::MapPhysMem,
        Call::MapUser,
        Call::MapService,
        Call::MapPfn,
        Call::PidList,
        Call::PidFromName,
        Call::ProcessInformation,
        Call::ProcessString,
        Call::ProcAddress,
        Call::ModuleBase,
        Call::VfsList,
        Call::VfsRead,
        Call::VfsWrite,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Call::InitializePlugins => "InitializePlugins",
            Call::ConfigGet => "ConfigGet",
            Call::ConfigSet => "ConfigSet",
            Call::MemReadScatter => "MemReadScatter",
            Call::MemRead => "MemRead",
            Call::MemReadEx => "MemReadEx",
            Call::MemReadPage => "MemReadPage",
            Call::MemWrite => "MemWrite",
            Call::MemPrefetch => "MemPrefetchPages",
            Call::MemVirtToPhys => "MemVirt2Phys",
            Call::MapPte => "Map_GetPte",
            Call::MapVad => "Map_GetVad",
            Call::MapVadEx => "Map_GetVadEx",
            Call::MapModule => "Map_GetModule",
            Call::MapModuleFromName => "Map_GetModuleFromName",
            Call::MapUnloadedModule => "Map_GetUnloadedModule",
            Call::MapEat => "Map_GetEAT",
            Call::MapIat => "Map_GetIAT",
            Call::MapHeap => "Map_GetHeap",
            Call::MapThread => "Map_GetThread",
            Call::MapHandle => "Map_GetHandle",
            Call::MapNet => "Map_GetNet",
            Call::MapPhysMem => "Map_GetPhysMem",
            Call::MapUser => "Map_GetUsers",
            Call::MapService => "Map_GetServices",
            Call::MapPfn => "Map_GetPfn",
            Call::PidList => "PidList",
            Call::PidFromName => "PidGetFromName",
            Call::ProcessInformation => "ProcessGetInformation",
            Call::ProcessString => "ProcessGetInformationString",
            Call::ProcAddress => "ProcessGetProcAddress",
            Call::ModuleBase => "ProcessGetModuleBase",
            Call::VfsList => "VfsList",
            Call::VfsRead => "VfsRead",
            Call::VfsWrite => "VfsWrite",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct Counter {
    calls: AtomicU64,
    nanos: AtomicU64,
}

#[derive(Debug)]
pub struct CallStats {
    enabled: AtomicBool,
    counters: Vec<Counter>,
}

impl Default for CallStats {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            counters: Call::ALL.iter().map(|_| Counter::default()).collect(),
        }
    }
}

/// Adds the elapsed time to its counter when dropped.
#[must_use]
pub struct CallTimer<'a> {
    counter: &'a Counter,
    start: Instant,
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        let nanos = u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.counter.calls.fetch_add(1, Ordering::Relaxed);
        self.counter.nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSummary {
    pub call: Call,
    pub calls: u64,
    pub total: Duration,
}

impl CallStats {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enabling resets the counters.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled && !self.is_enabled() {
            for counter in &self.counters {
                counter.calls.store(0, Ordering::Relaxed);
                counter.nanos.store(0, Ordering::Relaxed);
            }
        }
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn timer(&self, call: Call) -> Option<CallTimer<'_>> {
        if !self.is_enabled() {
            return None;
        }
        Some(CallTimer {
            counter: &self.counters[call.index()],
            start: Instant::now(),
        })
    }

    pub fn summary(&self) -> Vec<CallSummary> {
        Call::ALL
            .iter()
            .map(|&call| {
                let counter = &self.counters[call.index()];
                CallSummary {
                    call,
                    calls: counter.calls.load(Ordering::Relaxed),
                    total: Duration::from_nanos(counter.nanos.load(Ordering::Relaxed)),
                }
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.is_enabled() {
            out.push_str("function call statistics disabled\n");
            return out;
        }
        let _ = writeln!(out, "{:<28} {:>10} {:>14} {:>12}", "FUNCTION", "CALLS", "TOTAL_US", "AVG_US");
        for row in self.summary().into_iter().filter(|row| row.calls > 0) {
            let total = row.total.as_micros();
            let _ = writeln!(
                out,
                "{:<28} {:>10} {:>14} {:>12}",
                row.call.name(),
                row.calls,
                total,
                total / u128::from(row.calls)
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_indexed_by_discriminant() {
        for (i, call) in Call::ALL.iter().enumerate() {
            assert_eq!(call.index(), i);
        }
    }

    #[test]
    fn disabled_stats_do_not_count() {
        let stats = CallStats::default();
        assert!(stats.timer(Call::MemRead).is_none());
        stats.set_enabled(true);
        drop(stats.timer(Call::MemRead));
        drop(stats.timer(Call::MemRead));
        let row = stats
            .summary()
            .into_iter()
            .find(|row| row.call == Call::MemRead)
            .unwrap();
        assert_eq!(row.calls, 2);
        assert!(stats.render().contains("MemRead"));
    }
}
