#![forbid(unsafe_code)]

mod common;

use common::*;
use memory::PID_KERNEL_MEMORY;
use pretty_assertions::assert_eq;
use vmm::maps::BlobView;
use vmm::maps::wire::le_u64;
use vmm::{Error, MapQuery, ProcessString};

#[test]
fn two_call_convention_reports_size_then_fills() {
    let f = fixture();
    let query = MapQuery::Module { pid: EXPLORER };
    let size = f.vmm.map_blob(query, None).unwrap();

    let mut short = vec![0u8; size - 1];
    assert!(matches!(
        f.vmm.map_blob(query, Some(&mut short)),
        Err(Error::BufferTooSmall { required }) if required == size
    ));

    let mut buf = vec![0u8; size];
    assert_eq!(f.vmm.map_blob(query, Some(&mut buf)).unwrap(), size);
    let view = BlobView::parse(&buf).unwrap();
    assert_eq!(view.count(), 2);
    let bases: Vec<u64> = view.entries().map(|e| le_u64(e, 0)).collect();
    assert_eq!(bases, [VA, NTDLL_BASE]);
}

#[test]
fn pte_map_is_sorted_and_tagged_with_modules() {
    let f = fixture();
    let pte = f.vmm.map_pte(EXPLORER).unwrap();
    assert!(pte.windows(2).all(|w| w[0].va_base < w[1].va_base));
    let runs: Vec<(u64, u64, &str)> = pte
        .iter()
        .map(|e| (e.va_base, e.pages, e.text.as_str()))
        .collect();
    assert_eq!(
        runs,
        [(VA, 4, "explorer.exe"), (NTDLL_BASE, 4, "ntdll.dll")]
    );
    assert!(pte.iter().all(|e| e.user));
}

#[test]
fn kernel_view_includes_supervisor_pages() {
    let f = fixture();
    let user = f.vmm.map_pte(EXPLORER).unwrap();
    assert!(user.iter().all(|e| !e.contains(KERNEL_VA)));

    let system = f.vmm.map_pte(SYSTEM).unwrap();
    assert!(system.iter().any(|e| e.va_base == KERNEL_VA && !e.user));
}

#[test]
fn pte_runs_at_the_top_of_kernel_space() {
    const TOP: u64 = 0xffff_ffff_ffff_e000;
    let device = device();
    device.poke_u64(DTB + 511 * 8, 0x40003);
    device.poke_u64(0x40000 + 511 * 8, 0x41003);
    device.poke_u64(0x41000 + 511 * 8, 0x42003);
    device.poke_u64(0x42000 + 510 * 8, 0x43003);
    device.poke_u64(0x42000 + 511 * 8, 0x44003);
    let f = fixture_with(device, Default::default());
    f.vmm.initialize_plugins().unwrap();

    let pte = f.vmm.map_pte(SYSTEM).unwrap();
    let last = pte.last().unwrap();
    assert_eq!((last.va_base, last.pages), (TOP, 2));
    assert_eq!(last.last(), u64::MAX);

    let text = read_string(&f.vmm, "pid/4/memmap/pte.txt");
    assert!(
        text.lines().any(|l| l.contains("ffffffffffffe000-ffffffffffffffff")),
        "{text}"
    );
}

#[test]
fn maps_are_cached_until_full_refresh() {
    let f = fixture();
    let first = f.vmm.map_module(EXPLORER).unwrap();
    assert!(std::sync::Arc::ptr_eq(
        &first,
        &f.vmm.map_module(EXPLORER).unwrap()
    ));
    f.vmm.refresh_fast();
    assert!(std::sync::Arc::ptr_eq(
        &first,
        &f.vmm.map_module(EXPLORER).unwrap()
    ));
    f.vmm.refresh_medium();
    assert!(!std::sync::Arc::ptr_eq(
        &first,
        &f.vmm.map_module(EXPLORER).unwrap()
    ));
}

#[test]
fn vad_map_assigns_page_indices_in_address_order() {
    let f = fixture();
    let vads = f.vmm.map_vad(EXPLORER).unwrap();
    let starts: Vec<(u64, u32)> = vads.iter().map(|v| (v.start, v.vadex_pages_base)).collect();
    assert_eq!(starts, [(VA, 0), (NTDLL_BASE, 4)]);

    let all = f.vmm.map_vadex(EXPLORER, 0, u32::MAX).unwrap();
    assert_eq!(all.len(), 8);
    assert!(f.vmm.map_vadex(EXPLORER, 8, u32::MAX).unwrap().is_empty());
    let query = MapQuery::VadEx {
        pid: EXPLORER,
        offset: 0,
        count: u32::MAX,
    };
    let size = f.vmm.map_blob(query, None).unwrap();
    let mut buf = vec![0u8; size];
    assert_eq!(f.vmm.map_blob(query, Some(&mut buf)).unwrap(), size);
    assert_eq!(BlobView::parse(&buf).unwrap().count(), 8);

    let vadex = f.vmm.map_vadex(EXPLORER, 2, 4).unwrap();
    let vas: Vec<u64> = vadex.iter().map(|e| e.va).collect();
    assert_eq!(vas, [VA + 0x2000, VA + 0x3000, NTDLL_BASE, NTDLL_BASE + 0x1000]);
    assert_eq!(
        vadex[0].pa,
        f.vmm.mem_virt2phys(EXPLORER, VA + 0x2000).unwrap()
    );
}

#[test]
fn exports_sorted_by_ordinal_and_resolvable() {
    let f = fixture();
    let eat = f.vmm.map_eat(EXPLORER, "NTDLL.DLL").unwrap();
    let ordinals: Vec<u32> = eat.entries.iter().map(|e| e.ordinal).collect();
    assert_eq!(ordinals, [1, 2, 3]);
    assert_eq!(eat.module_base, NTDLL_BASE);

    assert_eq!(
        f.vmm.proc_address(EXPLORER, "ntdll.dll", "NtClose").unwrap(),
        NTDLL_BASE + 0x100
    );
    // export names compare case-sensitively
    assert!(matches!(
        f.vmm.proc_address(EXPLORER, "ntdll.dll", "ntclose"),
        Err(Error::UnknownExport(_))
    ));
    assert!(matches!(
        f.vmm.map_eat(EXPLORER, "kernel32.dll"),
        Err(Error::UnknownModule(_))
    ));
}

#[test]
fn module_lookup_by_name() {
    let f = fixture();
    assert_eq!(f.vmm.module_base(EXPLORER, "Explorer.EXE").unwrap(), VA);
    // empty name selects the first module
    assert_eq!(f.vmm.map_module_from_name(EXPLORER, "").unwrap().base, VA);
    let size = f
        .vmm
        .map_blob(
            MapQuery::ModuleFromName {
                pid: EXPLORER,
                name: "ntdll.dll",
            },
            None,
        )
        .unwrap();
    assert!(size > 0);
}

#[test]
fn global_maps_have_stable_order() {
    let f = fixture();
    let net: Vec<(u32, u64)> = f
        .vmm
        .map_net()
        .unwrap()
        .iter()
        .map(|e| (e.pid, e.object_va))
        .collect();
    assert_eq!(net, [(SYSTEM, 0x9000), (EXPLORER, 0x1000), (EXPLORER, 0x2000)]);

    let users: Vec<String> = f.vmm.map_user().unwrap().iter().map(|u| u.name.clone()).collect();
    assert_eq!(users, ["Alice", "bob"]);

    let services: Vec<u32> = f.vmm.map_service().unwrap().iter().map(|s| s.ordinal).collect();
    assert_eq!(services, [1, 2]);

    let physmem = f.vmm.map_physmem().unwrap();
    assert_eq!(physmem.len(), 1);
    assert_eq!((physmem[0].pa, physmem[0].size), (0, MEMORY as u64));

    let threads: Vec<u32> = f.vmm.map_thread(EXPLORER).unwrap().iter().map(|t| t.tid).collect();
    assert_eq!(threads, [10, 20, 30]);
}

#[test]
fn pfn_records_follow_request_order() {
    let f = fixture();
    let pfns = f.vmm.map_pfn(&[0x30, 0x20]);
    assert_eq!(pfns.len(), 2);
    assert_eq!((pfns[0].pfn, pfns[0].pid), (0x30, 0));
    assert_eq!((pfns[1].pfn, pfns[1].pid), (0x20, EXPLORER));
}

#[test]
fn kernel_memory_bit_is_ignored_by_maps() {
    let f = fixture();
    assert_eq!(
        f.vmm.map_module(EXPLORER | PID_KERNEL_MEMORY).unwrap(),
        f.vmm.map_module(EXPLORER).unwrap()
    );
}

#[test]
fn unknown_processes_are_reported() {
    let f = fixture();
    assert!(matches!(f.vmm.map_pte(31337), Err(Error::UnknownProcess(31337))));
    assert!(matches!(
        f.vmm.pid_from_name("lsass.exe"),
        Err(Error::ProcessNotFound(_))
    ));
}

#[test]
fn process_queries() {
    let f = fixture();
    assert_eq!(f.vmm.pid_list(), [SYSTEM, EXPLORER]);
    assert_eq!(f.vmm.pid_from_name("EXPLORER.EXE").unwrap(), EXPLORER);
    assert_eq!(
        f.vmm.process_string(EXPLORER, ProcessString::Cmdline).unwrap(),
        "C:\\Windows\\explorer.exe /factory"
    );

    let info = f.vmm.process_information(EXPLORER).unwrap();
    assert_eq!(info.record.ppid, SYSTEM);
    let size = f.vmm.process_information_blob(EXPLORER, None).unwrap();
    assert_eq!(size, vmm::ProcessInformation::SIZE);
}
