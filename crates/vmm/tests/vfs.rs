#![forbid(unsafe_code)]

mod common;

use common::*;
use memory::PAGE_SIZE;
use pretty_assertions::assert_eq;
use vmm::VfsStatus;

fn names(vmm: &vmm::Vmm, path: &str) -> Vec<String> {
    vmm.vfs_list(path)
        .unwrap_or_else(|| panic!("{path} is not a directory"))
        .map(|e| e.name)
        .collect()
}

#[test]
fn root_lists_memory_process_indices_and_visible_modules() {
    let f = with_plugins();
    let root = names(&f.vmm, "/");
    for expected in ["memory.pmem", "name", "pid", "sys", "conf", "net"] {
        assert!(root.iter().any(|n| n == expected), "{expected} missing: {root:?}");
    }
    // forensic results only show up in forensic mode
    assert!(!root.iter().any(|n| n == "forensic"));

    let pmem = f.vmm.vfs_list("").unwrap().find(|e| e.name == "memory.pmem").unwrap();
    assert_eq!(pmem.size(), Some(MEMORY as u64));
}

#[test]
fn process_directories() {
    let f = with_plugins();
    assert_eq!(names(&f.vmm, "pid"), ["4", "1000"]);
    assert_eq!(names(&f.vmm, "name"), ["System-4", "explorer.exe-1000"]);

    let dir = names(&f.vmm, "\\name\\explorer.exe-1000\\");
    for expected in ["memory.vmem", "memmap", "modules", "threads", "handles"] {
        assert!(dir.iter().any(|n| n == expected), "{expected} missing: {dir:?}");
    }
    assert!(f.vmm.vfs_list("name/explorer.exe-4").is_none());
    assert!(f.vmm.vfs_list("pid/31337").is_none());
}

#[test]
fn vmem_reads_match_virtual_reads() {
    let f = with_plugins();
    let mut buf = vec![0u8; PAGE_SIZE + 0x10];
    let (status, n) = f.vmm.vfs_read("pid/1000/memory.vmem", &mut buf, VA + 0xff0);
    assert_eq!((status, n), (VfsStatus::Success, buf.len()));
    assert_eq!(buf, f.vmm.mem_read(EXPLORER, VA + 0xff0, buf.len()).unwrap());
}

#[test]
fn raw_memory_reads_zero_fill_and_stop_at_end() {
    let f = with_plugins();
    let mut buf = [0xffu8; 32];
    // unmapped virtual range reads as zeros
    let (status, n) = f.vmm.vfs_read("pid/1000/memory.vmem", &mut buf, 0x5000_0000);
    assert_eq!((status, n), (VfsStatus::Success, 32));
    assert_eq!(buf, [0u8; 32]);

    let end = MEMORY as u64;
    let (status, n) = f.vmm.vfs_read("memory.pmem", &mut buf, end - 8);
    assert_eq!((status, n), (VfsStatus::Success, 8));
    assert_eq!(f.vmm.vfs_read("memory.pmem", &mut buf, end), (VfsStatus::EndOfFile, 0));
}

#[test]
fn pmem_writes_reach_the_device() {
    let f = with_plugins();
    let (status, n) = f.vmm.vfs_write("memory.pmem", &[1, 2, 3], 0x9_0000);
    assert_eq!((status, n), (VfsStatus::Success, 3));
    assert_eq!(f.device.peek(0x9_0000, 3), [1, 2, 3]);
}

#[test]
fn module_files() {
    let f = with_plugins();
    assert_eq!(read_string(&f.vmm, "sys/memorymodel.txt").trim(), "X64");
    let tree = read_string(&f.vmm, "sys/proc/proc.txt");
    assert!(tree.contains("explorer.exe"), "{tree}");

    let base = read_string(&f.vmm, "pid/1000/modules/ntdll.dll/base.txt");
    assert_eq!(base, format!("{NTDLL_BASE:016x}"));

    let threads = read_string(&f.vmm, "pid/1000/threads/threads.txt");
    assert_eq!(threads.lines().count(), 4);

    let pte = read_string(&f.vmm, "pid/1000/memmap/pte.txt");
    assert!(pte.contains("ntdll.dll"), "{pte}");
}

#[test]
fn listing_sizes_match_reads() {
    let f = with_plugins();
    for entry in f.vmm.vfs_list("sys").unwrap().filter(|e| !e.is_dir()) {
        let path = format!("sys/{}", entry.name);
        let data = read_file(&f.vmm, &path, 7);
        assert_eq!(entry.size(), Some(data.len() as u64), "{path}");
    }
}

#[test]
fn chunked_reads_reassemble_the_file() {
    let f = with_plugins();
    let whole = read_file(&f.vmm, "pid/1000/threads/threads.txt", 4096);
    assert_eq!(read_file(&f.vmm, "pid/1000/threads/threads.txt", 5), whole);
    let mut buf = [0u8; 8];
    assert_eq!(
        f.vmm.vfs_read("pid/1000/threads/threads.txt", &mut buf, whole.len() as u64),
        (VfsStatus::EndOfFile, 0)
    );
}

#[test]
fn conf_tunables_round_trip_through_files() {
    let f = with_plugins();
    let (status, _) = f.vmm.vfs_write("conf/tick_period_ms.txt", b"250\n", 0);
    assert_eq!(status, VfsStatus::Success);
    assert_eq!(read_string(&f.vmm, "conf/tick_period_ms.txt"), "250\n");
    assert_eq!(
        f.vmm.config().refresh.tick_period,
        std::time::Duration::from_millis(250)
    );

    // zero periods are rejected
    assert_eq!(
        f.vmm.vfs_write("conf/tick_period_ms.txt", b"0", 0).0,
        VfsStatus::Unsuccessful
    );
    assert_eq!(
        f.vmm.vfs_write("conf/refresh_enabled.txt", b"0", 0).0,
        VfsStatus::Unsuccessful
    );
}

#[test]
fn oversized_requests_are_refused() {
    let mut config = config::Config::default();
    config.vfs.read_limit = 0x1000;
    let f = fixture_with(device(), config);
    f.vmm.initialize_plugins().unwrap();
    let mut buf = vec![0u8; 0x1001];
    assert_eq!(
        f.vmm.vfs_read("memory.pmem", &mut buf, 0),
        (VfsStatus::FileSystemLimitation, 0)
    );
    assert_eq!(
        f.vmm.vfs_read("memory.pmem", &mut buf[..0x1000], 0),
        (VfsStatus::Success, 0x1000)
    );
}

#[test]
fn unknown_paths_are_invalid() {
    let f = with_plugins();
    let mut buf = [0u8; 4];
    assert_eq!(f.vmm.vfs_read("nope/file.txt", &mut buf, 0), (VfsStatus::FileInvalid, 0));
    assert_eq!(f.vmm.vfs_read("sys", &mut buf, 0), (VfsStatus::FileInvalid, 0));
    assert!(f.vmm.vfs_list("memory.pmem").is_none());
}
