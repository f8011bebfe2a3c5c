//! AArch64 architecture profile
//!
//! 4 KiB granule with 2 MiB large pages. Device memory is never executable,
//! so uncached mappings must not carry 'x'. seL4 can be built as a
//! hypervisor here, with a 40-bit guest physical address space.

use super::profile::{no_write_only, ArchProfile};
use once_cell::sync::Lazy;

/// AArch64 profile
pub static AARCH64_PROFILE: Lazy<ArchProfile> = Lazy::new(|| ArchProfile {
    id: "aarch64".to_string(),
    name: "AArch64".to_string(),
    description: "64-bit ARM (ARMv8-A), 4 KiB granule, EL2 hypervisor support".to_string(),
    page_sizes: vec![0x1000, 0x20_0000],
    pd_max_vaddr: 0x8000_0000_0000,
    vm_max_vaddr: 0x100_0000_0000,
    allowed_perms: no_write_only(),
    uncached_exec: false,
    hypervisor: true,
    max_priority: 255,
    max_channel_id: 61,
    elf_machine: Some(183), // EM_AARCH64
});
