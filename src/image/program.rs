//! Program image analysis
//!
//! Reads the ELF identification and header of a domain's program image and
//! compares it against the target architecture.

use crate::arch::ArchProfile;
use anyhow::{Context, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Bytes needed for a full 64-bit ELF header
const ELF64_HEADER_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl std::fmt::Display for ElfClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElfClass::Elf32 => write!(f, "ELF32"),
            ElfClass::Elf64 => write!(f, "ELF64"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Parsed identification of an ELF program image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub endian: Endian,
    /// `e_machine`
    pub machine: u16,
    pub entry: u64,
}

/// Program image as found on disk
#[derive(Debug)]
pub struct ProgramImage {
    pub path: PathBuf,
    pub size: u64,
    /// `None` if the file is not an ELF image
    pub elf: Option<ElfHeader>,
}

impl ProgramImage {
    /// Read and identify a program image
    pub fn analyze(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open program image: {}", path.display()))?;
        let size = file.metadata()?.len();

        let mut header = Vec::with_capacity(ELF64_HEADER_LEN);
        file.by_ref()
            .take(ELF64_HEADER_LEN as u64)
            .read_to_end(&mut header)
            .with_context(|| format!("Failed to read program image: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            size,
            elf: parse_elf_header(&header),
        })
    }

    /// Problems that would keep this image from running on `profile`
    pub fn issues(&self, profile: &ArchProfile) -> Vec<String> {
        let mut issues = Vec::new();

        let Some(elf) = &self.elf else {
            issues.push(format!("{} is not an ELF file", self.path.display()));
            return issues;
        };

        if elf.class != ElfClass::Elf64 {
            issues.push(format!(
                "{} is {}, expected ELF64",
                self.path.display(),
                elf.class
            ));
        }

        if let Some(expected) = profile.elf_machine {
            if elf.machine != expected {
                issues.push(format!(
                    "{} has machine {} but {} expects {}",
                    self.path.display(),
                    elf.machine,
                    profile.name,
                    expected
                ));
            }
        }

        issues
    }
}

/// Parse the ELF identification and the fields of the header we need
fn parse_elf_header(header: &[u8]) -> Option<ElfHeader> {
    if !header.starts_with(&ELF_MAGIC) || header.len() < 20 {
        return None;
    }

    let class = match header[4] {
        1 => ElfClass::Elf32,
        2 => ElfClass::Elf64,
        _ => return None,
    };
    let endian = match header[5] {
        1 => Endian::Little,
        2 => Endian::Big,
        _ => return None,
    };

    let read_u16 = |buf: &[u8]| match endian {
        Endian::Little => LittleEndian::read_u16(buf),
        Endian::Big => BigEndian::read_u16(buf),
    };
    let machine = read_u16(&header[18..20]);

    // e_entry follows e_version at offset 24
    let entry = match class {
        ElfClass::Elf64 if header.len() >= 32 => match endian {
            Endian::Little => LittleEndian::read_u64(&header[24..32]),
            Endian::Big => BigEndian::read_u64(&header[24..32]),
        },
        ElfClass::Elf32 if header.len() >= 28 => match endian {
            Endian::Little => LittleEndian::read_u32(&header[24..28]) as u64,
            Endian::Big => BigEndian::read_u32(&header[24..28]) as u64,
        },
        _ => return None,
    };

    Some(ElfHeader {
        class,
        endian,
        machine,
        entry,
    })
}

/// Look `name` up in each search path, first match wins
pub fn find_image(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    search_paths
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
