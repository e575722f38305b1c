#![allow(dead_code)]

use config::Config;
use memory::{BufferDevice, MemoryModel, PAGE_SIZE};
use std::collections::HashMap;
use std::sync::Arc;
use vmm::maps::{
    EatEntry, EatMap, ModuleEntry, NetEntry, PfnEntry, PhysMemEntry, ServiceEntry, ThreadEntry,
    UserEntry, VadEntry,
};
use vmm::provider::{ProcessObjects, StaticObjects};
use vmm::{ProcessRecord, StaticProvider, SystemInfo, SystemType, Vmm};

pub const MEMORY: usize = 0x10_0000;
pub const DTB: u64 = 0x1000;
pub const PT: u64 = 0x4000;
pub const DATA: u64 = 0x20000;
pub const MAPPED: u64 = 8;
pub const VA: u64 = 0x10000;
/// Supervisor only page, outside every user view.
pub const KERNEL_VA: u64 = 0x23000;
pub const KERNEL_PA: u64 = 0x31000;

pub const SYSTEM: u32 = 4;
pub const EXPLORER: u32 = 1000;
pub const NTDLL_BASE: u64 = 0x14000;

/// Content of the `i`th mapped virtual page.
pub fn fill(page: u64) -> Vec<u8> {
    (0..PAGE_SIZE)
        .map(|i| (page as usize * 31 + i) as u8)
        .collect()
}

/// x64 tables mapping `VA..VA + MAPPED pages` onto reversed data frames.
pub fn device() -> BufferDevice {
    let device = BufferDevice::zeroed(MEMORY);
    device.poke_u64(DTB, 0x2007);
    device.poke_u64(0x2000, 0x3007);
    device.poke_u64(0x3000, PT | 7);
    for i in 0..MAPPED {
        let frame = DATA + (MAPPED - 1 - i) * 0x1000;
        device.poke_u64(PT + (0x10 + i) * 8, frame | 7);
        device.poke(frame, &fill(i));
    }
    device.poke_u64(PT + 0x23 * 8, KERNEL_PA | 3);
    device.poke(KERNEL_PA, &[0xcc; 16]);
    device
}

fn module(name: &str, base: u64, size: u32) -> ModuleEntry {
    ModuleEntry {
        base,
        entry: base + 0x100,
        image_size: size,
        name: name.to_owned(),
        full_name: format!("C:\\Windows\\{name}"),
        ..ModuleEntry::default()
    }
}

fn export(name: &str, ordinal: u32, va: u64) -> EatEntry {
    EatEntry {
        function_va: va,
        ordinal,
        name: name.to_owned(),
        ..EatEntry::default()
    }
}

fn thread(pid: u32, tid: u32, create_time: u64) -> ThreadEntry {
    ThreadEntry {
        pid,
        tid,
        create_time,
        start_address: NTDLL_BASE + 0x200,
        ..ThreadEntry::default()
    }
}

/// Two processes sharing one set of tables. Every list is handed over
/// unsorted.
pub fn objects() -> StaticObjects {
    let system = ProcessRecord {
        pid: SYSTEM,
        name: "System".into(),
        long_name: "System".into(),
        dtb: DTB,
        ..ProcessRecord::default()
    };
    let explorer = ProcessRecord {
        pid: EXPLORER,
        ppid: SYSTEM,
        name: "explorer.exe".into(),
        long_name: "explorer.exe".into(),
        dtb: DTB,
        user_only: true,
        kernel_path: "\\Device\\HarddiskVolume2\\Windows\\explorer.exe".into(),
        user_path: "C:\\Windows\\explorer.exe".into(),
        cmdline: "C:\\Windows\\explorer.exe /factory".into(),
        ..ProcessRecord::default()
    };

    let eat = EatMap {
        ordinal_base: 1,
        names: 3,
        functions: 3,
        entries: vec![
            export("NtReadVirtualMemory", 3, NTDLL_BASE + 0x300),
            export("NtClose", 1, NTDLL_BASE + 0x100),
            export("NtOpenProcess", 2, NTDLL_BASE + 0x200),
        ],
        ..EatMap::default()
    };
    let explorer_objects = ProcessObjects {
        vads: vec![
            VadEntry {
                start: NTDLL_BASE,
                end: NTDLL_BASE + 0x3fff,
                image: true,
                text: "ntdll.dll".into(),
                ..VadEntry::default()
            },
            VadEntry {
                start: VA,
                end: VA + 0x3fff,
                image: true,
                text: "explorer.exe".into(),
                ..VadEntry::default()
            },
        ],
        modules: vec![
            module("ntdll.dll", NTDLL_BASE, 0x4000),
            module("explorer.exe", VA, 0x4000),
        ],
        eat: HashMap::from([(NTDLL_BASE, eat)]),
        threads: vec![
            thread(EXPLORER, 30, 1_300),
            thread(EXPLORER, 10, 1_100),
            thread(EXPLORER, 20, 1_200),
        ],
        ..ProcessObjects::default()
    };

    let net = |pid, object_va| NetEntry {
        pid,
        object_va,
        af: 2,
        ..NetEntry::default()
    };

    StaticObjects {
        system: SystemInfo {
            system_type: SystemType::WindowsX64,
            memory_model: MemoryModel::X64,
            version_major: 10,
            version_minor: 0,
            build: 19045,
            unique_id: 7,
        },
        processes: vec![explorer, system],
        objects: HashMap::from([(EXPLORER, explorer_objects)]),
        net: vec![net(EXPLORER, 0x2000), net(SYSTEM, 0x9000), net(EXPLORER, 0x1000)],
        users: vec![
            UserEntry {
                name: "bob".into(),
                ..UserEntry::default()
            },
            UserEntry {
                name: "Alice".into(),
                ..UserEntry::default()
            },
        ],
        services: vec![
            ServiceEntry {
                ordinal: 2,
                service_name: "Spooler".into(),
                ..ServiceEntry::default()
            },
            ServiceEntry {
                ordinal: 1,
                service_name: "EventLog".into(),
                ..ServiceEntry::default()
            },
        ],
        physmem: vec![
            PhysMemEntry {
                pa: 0x8_0000,
                size: 0x8_0000,
            },
            PhysMemEntry {
                pa: 0,
                size: 0x8_0000,
            },
        ],
        pfns: HashMap::from([(
            0x20,
            PfnEntry {
                pfn: 0x20,
                pid: EXPLORER,
                ..PfnEntry::default()
            },
        )]),
    }
}

pub struct Fixture {
    pub device: Arc<BufferDevice>,
    pub provider: Arc<StaticProvider>,
    pub vmm: Vmm,
}

pub fn fixture_with(device: BufferDevice, config: Config) -> Fixture {
    let device = Arc::new(device);
    let provider = Arc::new(StaticProvider::new(objects()));
    let vmm = Vmm::initialize(device.clone(), provider.clone(), config).expect("initialize");
    Fixture {
        device,
        provider,
        vmm,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(device(), Config::default())
}

/// Fixture with the built-in modules active.
pub fn with_plugins() -> Fixture {
    let fixture = fixture();
    fixture.vmm.initialize_plugins().expect("plugins");
    fixture
}

/// Whole file through `vfs_read`, in `chunk` sized reads.
pub fn read_file(vmm: &Vmm, path: &str, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let (status, n) = vmm.vfs_read(path, &mut buf, out.len() as u64);
        if !status.is_success() {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        if n < chunk {
            break;
        }
    }
    out
}

pub fn read_string(vmm: &Vmm, path: &str) -> String {
    String::from_utf8(read_file(vmm, path, 4096)).expect("utf8")
}
