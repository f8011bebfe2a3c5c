//! Architecture profiles
//!
//! A profile carries everything the checker needs to know about the target:
//! supported page sizes, address-space limits, legal permission
//! combinations and whether virtual machines can be hosted. Built-in
//! profiles live in a static registry; custom ones are read from TOML.

pub mod profile;
pub mod aarch64;
pub mod riscv64;
pub mod x86_64;
pub mod generic;

pub use profile::ArchProfile;
pub use aarch64::AARCH64_PROFILE;
pub use riscv64::RISCV64_PROFILE;
pub use x86_64::X86_64_PROFILE;
pub use generic::GENERIC_PROFILE;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

/// Registry of built-in architecture profiles
pub static ARCH_PROFILES: Lazy<HashMap<&'static str, &'static ArchProfile>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("aarch64", &*AARCH64_PROFILE);
    m.insert("arm64", &*AARCH64_PROFILE);
    m.insert("riscv64", &*RISCV64_PROFILE);
    m.insert("riscv", &*RISCV64_PROFILE);
    m.insert("x86_64", &*X86_64_PROFILE);
    m.insert("x86-64", &*X86_64_PROFILE);
    m.insert("generic", &*GENERIC_PROFILE);
    m.insert("default", &*GENERIC_PROFILE);
    m
});

/// Get an architecture profile by name
pub fn get_profile(name: &str) -> Option<&'static ArchProfile> {
    ARCH_PROFILES.get(name.to_lowercase().as_str()).copied()
}

/// Get profile names only (deduplicated)
pub fn profile_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = vec!["aarch64", "riscv64", "x86_64", "generic"];
    names.sort();
    names
}

/// Load a custom profile from a TOML file
pub fn load_profile_file(path: &Path) -> Result<ArchProfile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read architecture profile: {}", path.display()))?;

    let profile: ArchProfile = toml::from_str(&content)
        .with_context(|| format!("Invalid architecture profile: {}", path.display()))?;

    profile.validate().map_err(anyhow::Error::msg)?;
    log::debug!("loaded architecture profile '{}' from {}", profile.id, path.display());

    Ok(profile)
}

/// Resolve the profile selected on the command line
pub fn select_profile(name: &str, file: Option<&Path>) -> Result<ArchProfile> {
    match file {
        Some(path) => load_profile_file(path),
        None => get_profile(name).cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown architecture: {}. Use 'sdf-check arch list' to see available profiles.",
                name
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(get_profile("AArch64").unwrap().id, "aarch64");
        assert_eq!(get_profile("arm64").unwrap().id, "aarch64");
        assert_eq!(get_profile("default").unwrap().id, "generic");
        assert!(get_profile("sparc").is_none());
    }

    #[test]
    fn test_profile_names_resolve() {
        for name in profile_names() {
            let profile = get_profile(name).unwrap();
            assert_eq!(profile.id, name);
            assert!(profile.validate().is_ok());
        }
    }

    #[test]
    fn test_load_profile_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.toml");
        fs::write(
            &path,
            r#"
id = "board"
name = "Custom Board"
page_sizes = [0x1000, 0x10000]
pd_max_vaddr = 0x80000000
vm_max_vaddr = 0x80000000
allowed_perms = ["r", "rx", "rw"]
hypervisor = false
max_priority = 200
"#,
        )
        .unwrap();

        let profile = select_profile("ignored", Some(&path)).unwrap();
        assert_eq!(profile.id, "board");
        assert_eq!(profile.max_priority, 200);
        assert!(profile.supports_page_size(0x10000));
    }

    #[test]
    fn test_load_profile_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "id = \"broken\"\n").unwrap();
        assert!(load_profile_file(&path).is_err());

        let path = dir.path().join("odd.toml");
        fs::write(
            &path,
            r#"
id = "odd"
name = "Odd"
page_sizes = [3000]
pd_max_vaddr = 0x80000000
vm_max_vaddr = 0x80000000
allowed_perms = ["r"]
"#,
        )
        .unwrap();
        let err = load_profile_file(&path).unwrap_err();
        assert!(err.to_string().contains("not a power of two"));

        assert!(load_profile_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_select_unknown_profile() {
        let err = select_profile("sparc", None).unwrap_err();
        assert!(err.to_string().contains("Unknown architecture: sparc"));
    }

    #[test]
    fn test_profile_toml_round_trip() {
        let text = toml::to_string(&*AARCH64_PROFILE).unwrap();
        let back: ArchProfile = toml::from_str(&text).unwrap();
        assert_eq!(&back, &*AARCH64_PROFILE);
    }
}
