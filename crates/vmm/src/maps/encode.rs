use super::entries::*;
use super::wire::{FieldWriter, WireEntry, encode_map};

const PTE_FLAG_WRITE: u64 = 0x2;
const PTE_FLAG_NS: u64 = 0x4;
const PTE_FLAG_NX: u64 = 1 << 63;

impl WireEntry for PteEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 40;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        let mut flags = 0;
        if self.writable {
            flags |= PTE_FLAG_WRITE;
        }
        if self.user {
            flags |= PTE_FLAG_NS;
        }
        if self.nx {
            flags |= PTE_FLAG_NX;
        }
        w.u64(self.va_base)
            .u64(self.pages)
            .u64(flags)
            .flag(self.wow64)
            .text(&self.text)
            .u32(self.software_pages)
            .pad(4);
    }
}

impl VadEntry {
    /// First packed dword: type, protection and the kind bits.
    pub(crate) fn packed_flags(&self) -> u32 {
        let mut value = u32::from(self.vad_type & 0x7) | u32::from(self.protection & 0x1f) << 3;
        for (bit, set) in [
            (8, self.image),
            (9, self.file),
            (10, self.pagefile),
            (11, self.private_memory),
            (12, self.teb),
            (13, self.stack),
            (23, self.heap),
        ] {
            value |= u32::from(set) << bit;
        }
        value | u32::from(self.heap_num & 0x7f) << 16
    }

    pub(crate) fn packed_commit(&self) -> u32 {
        (self.commit_charge & 0x7fff_ffff) | u32::from(self.mem_commit) << 31
    }
}

impl WireEntry for VadEntry {
    const VERSION: u32 = 6;
    const SIZE: usize = 80;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.start)
            .u64(self.end)
            .u64(self.vad)
            .u32(self.packed_flags())
            .u32(self.packed_commit())
            .pad(4)
            .u32(self.prototype_pte_size)
            .u64(self.prototype_pte_va)
            .u64(self.subsection)
            .text(&self.text)
            .pad(4)
            .u64(self.file_object)
            .u32(self.vadex_pages)
            .u32(self.vadex_pages_base);
    }
}

impl WireEntry for VadExEntry {
    const VERSION: u32 = 3;
    const SIZE: usize = 64;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u32(pte_kind_code(self.kind))
            .u32(self.level)
            .u64(self.va)
            .u64(self.pa)
            .u64(self.pte)
            .u32(pte_kind_code(self.proto_kind))
            .pad(4)
            .u64(self.proto_pa)
            .u64(self.proto_pte)
            .u64(self.vad_base);
    }
}

impl WireEntry for ModuleEntry {
    const VERSION: u32 = 5;
    const SIZE: usize = 56;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.base)
            .u64(self.entry)
            .u32(self.image_size)
            .flag(self.wow64)
            .text(&self.name)
            .pad(4)
            .text(&self.full_name)
            .u32(self.module_type.code())
            .u32(self.file_size_raw)
            .u32(self.sections)
            .u32(self.eat_functions)
            .u32(self.iat_functions);
    }
}

impl WireEntry for UnloadedModuleEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 40;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.base)
            .u32(self.image_size)
            .flag(self.wow64)
            .text(&self.name)
            .u32(self.checksum)
            .u32(self.timestamp)
            .pad(4)
            .u64(self.unload_time);
    }
}

impl WireEntry for EatEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 24;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.function_va)
            .u32(self.ordinal)
            .u32(self.functions_index)
            .u32(self.names_index)
            .text(&self.name);
    }
}

impl WireEntry for IatEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 40;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.function_va)
            .text(&self.function)
            .text(&self.module)
            .flag(self.thunk.is32)
            .u16(self.thunk.hint)
            .pad(2)
            .u32(self.thunk.rva_first_thunk)
            .u32(self.thunk.rva_original_first_thunk)
            .u32(self.thunk.rva_name_module)
            .u32(self.thunk.rva_name_function);
    }
}

impl WireEntry for HeapEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 24;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.segment_va)
            .u32(self.pages)
            .u32(self.uncommitted_pages & 0x00ff_ffff)
            .u32(u32::from(self.heap_id & 0x7f))
            .flag(self.primary);
    }
}

impl WireEntry for ThreadEntry {
    const VERSION: u32 = 3;
    const SIZE: usize = 136;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.tid)
            .u32(self.pid)
            .u32(self.exit_status)
            .u8(self.state)
            .u8(self.running)
            .u8(self.priority)
            .u8(self.base_priority);
        for value in [
            self.ethread,
            self.teb,
            self.create_time,
            self.exit_time,
            self.start_address,
            self.stack_base_user,
            self.stack_limit_user,
            self.stack_base_kernel,
            self.stack_limit_kernel,
            self.trap_frame,
            self.rip,
            self.rsp,
            self.affinity,
        ] {
            w.u64(value);
        }
        w.u32(self.user_time)
            .u32(self.kernel_time)
            .u32(u32::from(self.suspend_count))
            .pad(4);
    }
}

impl WireEntry for HandleEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 72;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.object_va)
            .u32(self.handle)
            .u32(self.granted_access & 0x00ff_ffff)
            .u32(u32::from(self.type_index))
            .pad(4)
            .u64(self.handle_count)
            .u64(self.pointer_count)
            .u64(self.create_info_va)
            .u64(self.security_descriptor_va)
            .text(&self.text)
            .u32(self.pid)
            .u32(self.pool_tag)
            .text(&self.type_name);
    }
}

fn endpoint(w: &mut FieldWriter<'_>, ep: &NetEndpoint) {
    w.flag(ep.valid)
        .u32(u32::from(ep.port))
        .bytes(&ep.addr)
        .text(&ep.text)
        .pad(4);
}

impl WireEntry for NetEntry {
    const VERSION: u32 = 3;
    const SIZE: usize = 104;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u32(self.pid)
            .u32(self.state)
            .u32(u32::from(self.af))
            .pad(4);
        endpoint(w, &self.src);
        endpoint(w, &self.dst);
        w.u64(self.object_va)
            .u64(self.time)
            .u32(self.pool_tag)
            .text(&self.text);
    }
}

impl WireEntry for PhysMemEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 16;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.pa).u64(self.size);
    }
}

impl WireEntry for UserEntry {
    const VERSION: u32 = 2;
    const SIZE: usize = 16;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        w.text(&self.name).text(&self.sid).u64(self.hive_va);
    }
}

impl WireEntry for ServiceEntry {
    const VERSION: u32 = 3;
    const SIZE: usize = 80;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        let s = &self.status;
        w.u64(self.object_va)
            .u32(self.ordinal)
            .u32(self.start_type)
            .u32(s.service_type)
            .u32(s.current_state)
            .u32(s.controls_accepted)
            .u32(s.win32_exit_code)
            .u32(s.service_specific_exit_code)
            .u32(s.check_point)
            .u32(s.wait_hint)
            .pad(4)
            .text(&self.service_name)
            .text(&self.display_name)
            .text(&self.path)
            .text(&self.user_type)
            .text(&self.user_account)
            .text(&self.image_path)
            .u32(self.pid)
            .pad(4);
    }
}

impl WireEntry for PfnEntry {
    const VERSION: u32 = 1;
    const SIZE: usize = 56;

    fn encode(&self, w: &mut FieldWriter<'_>) {
        let flags = u32::from(self.modified) | u32::from(self.prototype) << 1;
        w.u32(self.pfn)
            .u32(self.location.code())
            .u32(self.extended.code())
            .u32(flags)
            .u32(self.pid)
            .u32(u32::from(self.priority))
            .u64(self.va)
            .u64(self.pte_va)
            .u64(self.original_pte)
            .u64(self.pte_frame);
    }
}

pub fn encode_entries<E: WireEntry>(entries: &[E]) -> Vec<u8> {
    encode_map(entries, |_| {})
}

/// VAD blob; the header carries the total page count used by VADEX
/// windows.
pub fn encode_vad(entries: &[VadEntry]) -> Vec<u8> {
    let pages: u64 = entries.iter().map(VadEntry::pages).sum();
    encode_map(entries, |w| {
        w.u32(u32::try_from(pages).unwrap_or(u32::MAX)).pad(4);
    })
}

pub fn encode_eat(map: &EatMap) -> Vec<u8> {
    encode_map(&map.entries, |w| {
        w.u32(map.ordinal_base)
            .u32(map.functions)
            .u32(map.names)
            .pad(4)
            .u64(map.module_base)
            .u64(map.functions_va)
            .u64(map.names_va);
    })
}

pub fn encode_iat(map: &IatMap) -> Vec<u8> {
    encode_map(&map.entries, |w| {
        w.u64(map.module_base);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::wire::{BlobView, le_u32, le_u64};
    use pretty_assertions::assert_eq;

    #[test]
    fn vad_bits_are_packed_at_the_boundary() {
        let vad = VadEntry {
            start: 0x10000,
            end: 0x1ffff,
            vad_type: 2,
            protection: 4,
            image: true,
            heap_num: 3,
            heap: true,
            commit_charge: 5,
            mem_commit: true,
            text: "ntdll.dll".into(),
            ..VadEntry::default()
        };
        let blob = encode_vad(std::slice::from_ref(&vad));
        let view = BlobView::parse(&blob).unwrap();
        assert_eq!(view.version(), 6);
        assert_eq!(le_u32(view.header(), 0), 16);
        let entry = view.entry(0).unwrap();
        assert_eq!(le_u32(entry, 24), 2 | 4 << 3 | 1 << 8 | 3 << 16 | 1 << 23);
        assert_eq!(le_u32(entry, 28), 5 | 1 << 31);
        assert_eq!(view.text(le_u32(entry, 56)), Some("ntdll.dll"));
    }

    #[test]
    fn pte_flags_use_wire_bits() {
        let entry = PteEntry {
            va_base: 0x1000,
            pages: 2,
            writable: true,
            nx: true,
            ..PteEntry::default()
        };
        let blob = encode_entries(&[entry]);
        let view = BlobView::parse(&blob).unwrap();
        assert_eq!(le_u64(view.entry(0).unwrap(), 16), 0x2 | 1 << 63);
    }

    #[test]
    fn eat_header_fields() {
        let map = EatMap {
            ordinal_base: 1,
            names: 2,
            functions: 3,
            module_base: 0x7ff0_0000,
            entries: vec![EatEntry {
                function_va: 0x7ff0_1000,
                ordinal: 1,
                name: "Foo".into(),
                ..EatEntry::default()
            }],
            ..EatMap::default()
        };
        let blob = encode_eat(&map);
        let view = BlobView::parse(&blob).unwrap();
        assert_eq!(view.header().len(), 40);
        assert_eq!(le_u32(view.header(), 4), 3);
        assert_eq!(le_u64(view.header(), 16), 0x7ff0_0000);
        assert_eq!(view.text(le_u32(view.entry(0).unwrap(), 20)), Some("Foo"));
    }
}
