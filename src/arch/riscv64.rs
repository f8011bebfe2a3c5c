//! RISC-V 64 architecture profile (Sv39)

use super::profile::{no_write_only, ArchProfile};
use once_cell::sync::Lazy;

/// RISC-V 64 profile
pub static RISCV64_PROFILE: Lazy<ArchProfile> = Lazy::new(|| ArchProfile {
    id: "riscv64".to_string(),
    name: "RISC-V 64".to_string(),
    description: "RV64 with Sv39 paging, 4 KiB and 2 MiB pages".to_string(),
    page_sizes: vec![0x1000, 0x20_0000],
    // Lower half of the 39-bit space
    pd_max_vaddr: 0x40_0000_0000,
    vm_max_vaddr: 0x40_0000_0000,
    // W without R is a reserved PTE encoding
    allowed_perms: no_write_only()
        .into_iter()
        .filter(|p| !(p.write() && !p.read()))
        .collect(),
    uncached_exec: true,
    hypervisor: false,
    max_priority: 255,
    max_channel_id: 61,
    elf_machine: Some(243), // EM_RISCV
});
