//! Program image inspection
//!
//! Locates every domain's program image on the search paths and reports
//! anything that looks wrong. Findings are warnings; they never make a
//! description invalid.

pub mod program;

pub use program::ProgramImage;

use crate::arch::ArchProfile;
use crate::sdf::{SystemModel, Warning};
use std::path::PathBuf;

/// Inspect the program images named by `model`
pub fn inspect_images(
    model: &SystemModel,
    search_paths: &[PathBuf],
    profile: &ArchProfile,
) -> Vec<Warning> {
    let mut warnings = Vec::new();

    for (name, domain) in model.domains() {
        let Some(image_name) = &domain.program_image else {
            continue;
        };

        let Some(path) = program::find_image(image_name, search_paths) else {
            warnings.push(Warning::new(
                format!(
                    "program image '{}' of protection domain '{}' not found in search paths",
                    image_name, name
                ),
                None,
            ));
            continue;
        };

        match ProgramImage::analyze(&path) {
            Ok(image) => {
                if let Some(elf) = &image.elf {
                    log::debug!(
                        "program image {} ({} bytes): {} machine {} entry 0x{:x}",
                        path.display(),
                        image.size,
                        elf.class,
                        elf.machine,
                        elf.entry
                    );
                }
                for issue in image.issues(profile) {
                    warnings.push(Warning::new(
                        format!("protection domain '{}': {}", name, issue),
                        None,
                    ));
                }
            }
            Err(err) => warnings.push(Warning::new(
                format!("protection domain '{}': {:#}", name, err),
                None,
            )),
        }
    }

    for warning in &warnings {
        log::warn!("{}", warning);
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::program::tests::elf64;
    use super::*;
    use crate::arch::AARCH64_PROFILE;
    use crate::sdf::validate;
    use std::fs;
    use tempfile::tempdir;

    const SYSTEM: &str = r#"<system>
        <protection_domain name="ping" priority="1"><program_image path="ping.elf" /></protection_domain>
        <protection_domain name="pong" priority="1"><program_image path="pong.elf" /></protection_domain>
        <protection_domain name="bare" priority="1" />
    </system>"#;

    #[test]
    fn test_inspect_images() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ping.elf"), elf64(183, 0x200000)).unwrap();

        let model = validate(SYSTEM, &AARCH64_PROFILE).unwrap().model;
        let warnings = inspect_images(&model, &[dir.path().to_path_buf()], &AARCH64_PROFILE);

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("'pong.elf'"));
        assert!(warnings[0].message.contains("not found"));
    }

    #[test]
    fn test_machine_mismatch_is_a_warning() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ping.elf"), elf64(62, 0)).unwrap();
        fs::write(dir.path().join("pong.elf"), b"plain text").unwrap();

        let model = validate(SYSTEM, &AARCH64_PROFILE).unwrap().model;
        let warnings = inspect_images(&model, &[dir.path().to_path_buf()], &AARCH64_PROFILE);

        let messages: Vec<_> = warnings.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("protection domain 'ping'"));
        assert!(messages[0].contains("has machine 62"));
        assert!(messages[1].contains("is not an ELF file"));
    }
}
