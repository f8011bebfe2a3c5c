//! Generic architecture profile
//!
//! A permissive profile for targets without a dedicated one. Write-only
//! mappings and uncached code are accepted; page sizes cover 4 KiB, 2 MiB
//! and 1 GiB.

use super::profile::ArchProfile;
use crate::sdf::Perms;
use once_cell::sync::Lazy;

/// Generic profile
pub static GENERIC_PROFILE: Lazy<ArchProfile> = Lazy::new(|| ArchProfile {
    id: "generic".to_string(),
    name: "Generic".to_string(),
    description: "Permissive profile with no architecture-specific restrictions".to_string(),
    page_sizes: vec![0x1000, 0x20_0000, 0x4000_0000],
    pd_max_vaddr: 0xFFFF_FFFF_FFFF,
    vm_max_vaddr: 0xFFFF_FFFF_FFFF,
    allowed_perms: ["r", "w", "x", "rw", "rx", "wx", "rwx"]
        .iter()
        .filter_map(|p| Perms::parse(p))
        .collect(),
    uncached_exec: true,
    hypervisor: true,
    max_priority: 255,
    max_channel_id: 61,
    elf_machine: None,
});
