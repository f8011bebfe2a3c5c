//! x86-64 architecture profile

use super::profile::{no_write_only, ArchProfile};
use once_cell::sync::Lazy;

/// x86-64 profile
pub static X86_64_PROFILE: Lazy<ArchProfile> = Lazy::new(|| ArchProfile {
    id: "x86_64".to_string(),
    name: "x86-64".to_string(),
    description: "64-bit x86 with 4-level paging, 4 KiB and 2 MiB pages".to_string(),
    page_sizes: vec![0x1000, 0x20_0000],
    pd_max_vaddr: 0x7FFF_FFFF_F000,
    vm_max_vaddr: 0x7FFF_FFFF_F000,
    allowed_perms: no_write_only(),
    uncached_exec: true,
    hypervisor: false,
    max_priority: 255,
    max_channel_id: 61,
    elf_machine: Some(62), // EM_X86_64
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x86_64_profile() {
        let profile = &*X86_64_PROFILE;
        assert_eq!(profile.elf_machine, Some(62));
        assert_eq!(profile.min_page_size(), 0x1000);
        assert!(profile.uncached_exec);
    }
}
