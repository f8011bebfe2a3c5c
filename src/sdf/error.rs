//! Validation diagnostics
//!
//! Every defect found in a system description is an [`SdfError`]. Syntax
//! errors abort parsing; everything found after that is collected into
//! [`Diagnostics`] so one run reports the complete set.

use super::ast::{Perms, SourceLoc};
use std::fmt;
use thiserror::Error;

/// Error category, used for summaries and exit reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Syntax,
    DuplicateName,
    UnresolvedReference,
    Overlap,
    DuplicateId,
    IdRange,
    InvalidSchedule,
    IllegalPermission,
    InvalidChannel,
    Misaligned,
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::DuplicateName => "DuplicateNameError",
            ErrorKind::UnresolvedReference => "UnresolvedReferenceError",
            ErrorKind::Overlap => "OverlapError",
            ErrorKind::DuplicateId => "DuplicateIdError",
            ErrorKind::IdRange => "IdRangeError",
            ErrorKind::InvalidSchedule => "InvalidScheduleError",
            ErrorKind::IllegalPermission => "IllegalPermissionError",
            ErrorKind::InvalidChannel => "InvalidChannelError",
            ErrorKind::Misaligned => "MisalignedError",
            ErrorKind::Unsupported => "UnsupportedError",
        };
        f.write_str(name)
    }
}

/// Name tables checked for duplicate declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    MemoryRegion,
    ProtectionDomain,
    VirtualMachine,
    /// Symbols bound inside one protection domain
    Symbol { domain: String },
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::MemoryRegion => write!(f, "memory region"),
            Namespace::ProtectionDomain => write!(f, "protection domain"),
            Namespace::VirtualMachine => write!(f, "virtual machine"),
            Namespace::Symbol { domain } => write!(f, "symbol in protection domain '{}'", domain),
        }
    }
}

/// Identifier spaces checked for collisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Channel and IRQ ids share one per-domain space
    Channel,
    IrqNumber,
    VirtualMachine,
    Vcpu,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::Channel => write!(f, "channel/irq id"),
            IdKind::IrqNumber => write!(f, "irq number"),
            IdKind::VirtualMachine => write!(f, "virtual machine id"),
            IdKind::Vcpu => write!(f, "vcpu id"),
        }
    }
}

/// Address space in which two ranges collided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpace {
    Domain(String),
    VirtualMachine(String),
    Physical,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Domain(name) => write!(f, "protection domain '{}'", name),
            AddressSpace::VirtualMachine(name) => write!(f, "virtual machine '{}'", name),
            AddressSpace::Physical => write!(f, "physical memory"),
        }
    }
}

/// One end of an overlap: the memory region and the half-open range it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSite {
    pub region: String,
    pub start: u64,
    pub end: u64,
    pub loc: SourceLoc,
}

impl fmt::Display for RangeSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' [0x{:x}..0x{:x}) at {}",
            self.region, self.start, self.end, self.loc
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdfError {
    #[error("{loc}: {message}")]
    Syntax { loc: SourceLoc, message: String },

    #[error("{loc}: duplicate {namespace} name '{name}' (first declared at {first})")]
    DuplicateName {
        namespace: Namespace,
        name: String,
        loc: SourceLoc,
        first: SourceLoc,
    },

    #[error("{loc}: {referrer} references unknown {target} '{name}'")]
    UnresolvedReference {
        target: Namespace,
        name: String,
        referrer: String,
        loc: SourceLoc,
    },

    #[error("{}: in {space}, {first} overlaps {second}", .second.loc)]
    Overlap {
        space: AddressSpace,
        first: RangeSite,
        second: RangeSite,
    },

    #[error("{loc}: duplicate {kind} {id} in {owner} (first used at {first})")]
    DuplicateId {
        kind: IdKind,
        id: u64,
        owner: String,
        loc: SourceLoc,
        first: SourceLoc,
    },

    #[error("{loc}: {kind} {id} in {owner} exceeds the maximum of {max}")]
    IdRange {
        kind: IdKind,
        id: u64,
        max: u64,
        owner: String,
        loc: SourceLoc,
    },

    #[error("{loc}: invalid schedule for {entity}: {reason}")]
    InvalidSchedule {
        entity: String,
        reason: String,
        loc: SourceLoc,
    },

    #[error("{loc}: illegal permissions '{perms}' on {entity}: {reason}")]
    IllegalPermission {
        entity: String,
        perms: Perms,
        reason: String,
        loc: SourceLoc,
    },

    #[error("{loc}: invalid {entity}: {reason}")]
    InvalidChannel {
        entity: String,
        reason: String,
        loc: SourceLoc,
    },

    #[error("{loc}: {entity}: {reason}")]
    Misaligned {
        entity: String,
        reason: String,
        loc: SourceLoc,
    },

    #[error("{loc}: {feature} is not supported on {arch}")]
    Unsupported {
        feature: String,
        arch: String,
        loc: SourceLoc,
    },
}

impl SdfError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SdfError::Syntax { .. } => ErrorKind::Syntax,
            SdfError::DuplicateName { .. } => ErrorKind::DuplicateName,
            SdfError::UnresolvedReference { .. } => ErrorKind::UnresolvedReference,
            SdfError::Overlap { .. } => ErrorKind::Overlap,
            SdfError::DuplicateId { .. } => ErrorKind::DuplicateId,
            SdfError::IdRange { .. } => ErrorKind::IdRange,
            SdfError::InvalidSchedule { .. } => ErrorKind::InvalidSchedule,
            SdfError::IllegalPermission { .. } => ErrorKind::IllegalPermission,
            SdfError::InvalidChannel { .. } => ErrorKind::InvalidChannel,
            SdfError::Misaligned { .. } => ErrorKind::Misaligned,
            SdfError::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// Primary location of the defect
    pub fn loc(&self) -> SourceLoc {
        match self {
            SdfError::Syntax { loc, .. }
            | SdfError::DuplicateName { loc, .. }
            | SdfError::UnresolvedReference { loc, .. }
            | SdfError::DuplicateId { loc, .. }
            | SdfError::IdRange { loc, .. }
            | SdfError::InvalidSchedule { loc, .. }
            | SdfError::IllegalPermission { loc, .. }
            | SdfError::InvalidChannel { loc, .. }
            | SdfError::Misaligned { loc, .. }
            | SdfError::Unsupported { loc, .. } => *loc,
            SdfError::Overlap { second, .. } => second.loc,
        }
    }

    /// Names of the entities involved
    pub fn entities(&self) -> Vec<&str> {
        match self {
            SdfError::Syntax { .. } => Vec::new(),
            SdfError::DuplicateName { name, .. } => vec![name.as_str()],
            SdfError::UnresolvedReference { name, referrer, .. } => {
                vec![name.as_str(), referrer.as_str()]
            }
            SdfError::Overlap { first, second, .. } => {
                vec![first.region.as_str(), second.region.as_str()]
            }
            SdfError::DuplicateId { owner, .. } | SdfError::IdRange { owner, .. } => {
                vec![owner.as_str()]
            }
            SdfError::InvalidSchedule { entity, .. }
            | SdfError::IllegalPermission { entity, .. }
            | SdfError::InvalidChannel { entity, .. }
            | SdfError::Misaligned { entity, .. } => vec![entity.as_str()],
            SdfError::Unsupported { feature, .. } => vec![feature.as_str()],
        }
    }
}

/// Aggregated validation errors, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{} validation error(s)", .errors.len())]
pub struct Diagnostics {
    errors: Vec<SdfError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: SdfError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[SdfError] {
        &self.errors
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind() == kind).count()
    }
}

impl From<SdfError> for Diagnostics {
    fn from(error: SdfError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

/// Non-fatal finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub loc: Option<SourceLoc>,
}

impl Warning {
    pub fn new(message: impl Into<String>, loc: Option<SourceLoc>) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {}", loc, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_message_names_both_sites() {
        let err = SdfError::Overlap {
            space: AddressSpace::Domain("ping".to_string()),
            first: RangeSite {
                region: "a".to_string(),
                start: 0x3000000,
                end: 0x3001000,
                loc: SourceLoc::new(4, 9),
            },
            second: RangeSite {
                region: "b".to_string(),
                start: 0x3000000,
                end: 0x3001000,
                loc: SourceLoc::new(5, 9),
            },
        };

        let message = err.to_string();
        assert!(message.starts_with("5:9:"));
        assert!(message.contains("protection domain 'ping'"));
        assert!(message.contains("'a' [0x3000000..0x3001000) at 4:9"));
        assert!(message.contains("'b'"));
        assert_eq!(err.kind(), ErrorKind::Overlap);
        assert_eq!(err.entities(), vec!["a", "b"]);
    }

    #[test]
    fn test_diagnostics_counts() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());

        diags.push(SdfError::InvalidSchedule {
            entity: "protection domain 'x'".to_string(),
            reason: "budget (300) must be less than, or equal to, period (160)".to_string(),
            loc: SourceLoc::new(2, 5),
        });
        diags.push(SdfError::Syntax {
            loc: SourceLoc::new(1, 1),
            message: "bad".to_string(),
        });

        assert_eq!(diags.len(), 2);
        assert_eq!(diags.count(ErrorKind::InvalidSchedule), 1);
        assert_eq!(diags.count(ErrorKind::Overlap), 0);
        assert_eq!(diags.to_string(), "2 validation error(s)");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::DuplicateId.to_string(), "DuplicateIdError");
        assert_eq!(ErrorKind::UnresolvedReference.to_string(), "UnresolvedReferenceError");
    }
}
