//! Architecture profile definitions
//!
//! Defines the target constraints a system description is checked against.

use crate::sdf::Perms;
use serde::{Deserialize, Serialize};

/// Minimum and maximum stack size of a protection domain
pub const STACK_SIZE_MIN: u64 = 0x1000;
pub const STACK_SIZE_MAX: u64 = 16 * 1024 * 1024;

/// Target architecture constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchProfile {
    /// Short identifier (e.g., "aarch64")
    pub id: String,
    /// Display name
    pub name: String,
    /// Profile description
    #[serde(default)]
    pub description: String,
    /// Supported page sizes in bytes, smallest first
    pub page_sizes: Vec<u64>,
    /// Exclusive upper bound of a protection domain's address space
    pub pd_max_vaddr: u64,
    /// Exclusive upper bound of a guest's address space
    pub vm_max_vaddr: u64,
    /// Permission combinations the kernel accepts for a mapping
    pub allowed_perms: Vec<Perms>,
    /// Whether executable mappings may be uncached
    #[serde(default)]
    pub uncached_exec: bool,
    /// Whether virtual machines can be hosted
    #[serde(default)]
    pub hypervisor: bool,
    /// Highest scheduling priority
    #[serde(default = "default_max_priority")]
    pub max_priority: u8,
    /// Highest channel/IRQ identifier within a domain
    #[serde(default = "default_max_channel_id")]
    pub max_channel_id: u64,
    /// Expected ELF `e_machine` of program images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elf_machine: Option<u16>,
}

fn default_max_priority() -> u8 {
    255
}

/// Event identifiers are badge bits; two bits are reserved
fn default_max_channel_id() -> u64 {
    61
}

/// Every combination except write-only and no access
pub(crate) fn no_write_only() -> Vec<Perms> {
    ["r", "x", "rw", "rx", "wx", "rwx"]
        .iter()
        .filter_map(|p| Perms::parse(p))
        .collect()
}

impl ArchProfile {
    /// Create a profile with 4 KiB pages and conservative defaults
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            page_sizes: vec![0x1000],
            pd_max_vaddr: 0x8000_0000_0000,
            vm_max_vaddr: 0x100_0000_0000,
            allowed_perms: no_write_only(),
            uncached_exec: false,
            hypervisor: false,
            max_priority: default_max_priority(),
            max_channel_id: default_max_channel_id(),
            elf_machine: None,
        }
    }

    pub fn min_page_size(&self) -> u64 {
        self.page_sizes.iter().copied().min().unwrap_or(0x1000)
    }

    pub fn supports_page_size(&self, page_size: u64) -> bool {
        self.page_sizes.contains(&page_size)
    }

    pub fn allows_perms(&self, perms: Perms) -> bool {
        self.allowed_perms.contains(&perms)
    }

    /// Highest address a domain mapping may reach: the stack sits directly
    /// below the top of the address space
    pub fn pd_map_limit(&self, stack_size: u64) -> u64 {
        self.pd_max_vaddr.saturating_sub(stack_size)
    }

    /// Check that the profile itself is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.page_sizes.is_empty() {
            return Err(format!("profile '{}' lists no page sizes", self.id));
        }
        if let Some(bad) = self.page_sizes.iter().find(|p| !p.is_power_of_two()) {
            return Err(format!(
                "profile '{}' page size 0x{:x} is not a power of two",
                self.id, bad
            ));
        }
        if self.allowed_perms.is_empty() {
            return Err(format!("profile '{}' allows no permissions", self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = ArchProfile::new("test", "Test Arch");
        assert_eq!(profile.min_page_size(), 0x1000);
        assert_eq!(profile.max_priority, 255);
        assert_eq!(profile.max_channel_id, 61);
        assert!(profile.allows_perms(Perms::RW));
        assert!(!profile.allows_perms(Perms::parse("w").unwrap()));
        assert!(!profile.allows_perms(Perms::parse("").unwrap()));
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_map_limit_reserves_stack() {
        let profile = ArchProfile::new("test", "Test Arch");
        assert_eq!(profile.pd_map_limit(0x2000), 0x8000_0000_0000 - 0x2000);
    }

    #[test]
    fn test_profile_validation() {
        let mut profile = ArchProfile::new("bad", "Bad");
        profile.page_sizes = vec![0x1000, 0x3000];
        assert!(profile.validate().unwrap_err().contains("0x3000"));

        profile.page_sizes.clear();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_profile_toml_defaults() {
        let profile: ArchProfile = toml::from_str(
            r#"
id = "board"
name = "Custom Board"
page_sizes = [4096]
pd_max_vaddr = 0x100000000
vm_max_vaddr = 0x100000000
allowed_perms = ["r", "rw", "w"]
"#,
        )
        .unwrap();

        assert_eq!(profile.max_priority, 255);
        assert!(!profile.hypervisor);
        assert!(profile.allows_perms(Perms::parse("w").unwrap()));
        assert_eq!(profile.elf_machine, None);
    }
}
