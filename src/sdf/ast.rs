//! Unresolved system description tree
//!
//! Produced by the parser. Every reference is still a plain name and every
//! node remembers where it was declared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a node in the description file (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Mapping permissions, a subset of {read, write, execute}
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Perms(u8);

impl Perms {
    pub const READ: u8 = 1;
    pub const WRITE: u8 = 2;
    pub const EXECUTE: u8 = 4;

    pub const RW: Perms = Perms(Self::READ | Self::WRITE);

    /// Parse a combination of 'r', 'w' and 'x'
    pub fn parse(s: &str) -> Option<Self> {
        let mut bits = 0;
        for c in s.chars() {
            match c {
                'r' => bits |= Self::READ,
                'w' => bits |= Self::WRITE,
                'x' => bits |= Self::EXECUTE,
                _ => return None,
            }
        }
        Some(Self(bits))
    }

    pub fn read(&self) -> bool {
        self.0 & Self::READ != 0
    }

    pub fn write(&self) -> bool {
        self.0 & Self::WRITE != 0
    }

    pub fn execute(&self) -> bool {
        self.0 & Self::EXECUTE != 0
    }

    pub fn is_write_only(&self) -> bool {
        self.0 == Self::WRITE
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read() {
            f.write_str("r")?;
        }
        if self.write() {
            f.write_str("w")?;
        }
        if self.execute() {
            f.write_str("x")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Perms {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Perms::parse(&value)
            .ok_or_else(|| format!("invalid permissions '{}', expected a combination of r, w, x", value))
    }
}

impl From<Perms> for String {
    fn from(perms: Perms) -> Self {
        perms.to_string()
    }
}

/// IRQ trigger mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Level,
    Edge,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Level => write!(f, "level"),
            Trigger::Edge => write!(f, "edge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDecl {
    pub name: String,
    pub size: u64,
    pub phys_addr: Option<u64>,
    /// `None` when the page size is left to the tool
    pub page_size: Option<u64>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDecl {
    pub mr: String,
    pub vaddr: u64,
    pub perms: Perms,
    pub cached: bool,
    pub setvar_vaddr: Option<String>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqDecl {
    pub irq: u64,
    pub id: u64,
    pub trigger: Trigger,
    pub setvar_id: Option<String>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcpuDecl {
    pub id: u64,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDecl {
    pub name: String,
    pub id: u64,
    pub priority: Option<u64>,
    pub budget: Option<u64>,
    pub period: Option<u64>,
    pub vcpus: Vec<VcpuDecl>,
    pub maps: Vec<MapDecl>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDecl {
    pub name: String,
    pub priority: u64,
    pub budget: Option<u64>,
    pub period: Option<u64>,
    pub passive: bool,
    /// Domain serves protected procedure calls
    pub pp: bool,
    pub stack_size: Option<u64>,
    pub program_image: Option<String>,
    pub maps: Vec<MapDecl>,
    pub irqs: Vec<IrqDecl>,
    pub virtual_machine: Option<VmDecl>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndDecl {
    pub pd: String,
    pub id: u64,
    /// This end may call into the other end
    pub pp: bool,
    pub notify: bool,
    pub setvar_id: Option<String>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDecl {
    pub ends: [EndDecl; 2],
    pub loc: SourceLoc,
}

/// Whole parsed description, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemDecl {
    pub regions: Vec<RegionDecl>,
    pub domains: Vec<DomainDecl>,
    pub channels: Vec<ChannelDecl>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perms_parse_and_display() {
        let perms = Perms::parse("xr").unwrap();
        assert!(perms.read());
        assert!(!perms.write());
        assert!(perms.execute());
        assert_eq!(perms.to_string(), "rx");

        assert!(Perms::parse("w").unwrap().is_write_only());
        assert!(Perms::parse("rwz").is_none());
        assert_eq!(Perms::parse("").unwrap().to_string(), "");
    }

    #[test]
    fn test_perms_string_conversion() {
        let perms = Perms::try_from("wr".to_string()).unwrap();
        assert_eq!(perms, Perms::RW);
        assert_eq!(String::from(perms), "rw");
        assert!(Perms::try_from("q".to_string()).is_err());
    }
}
