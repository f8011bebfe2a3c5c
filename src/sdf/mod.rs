//! System description validation
//!
//! Pipeline: parse -> resolve -> check -> build. A syntax error stops the
//! run at the parser. Resolution and checking both run to completion and
//! their errors are reported together; a model is only built when there
//! are none.

pub mod ast;
pub mod check;
pub mod emit;
pub mod error;
pub mod model;
pub mod parser;
pub mod resolve;

pub use ast::Perms;
pub use emit::to_sdf;
pub use error::{Diagnostics, ErrorKind, Warning};
pub use model::{BuildConfig, SystemModel, Transport};

use crate::arch::ArchProfile;

/// Successful validation
#[derive(Debug, Clone)]
pub struct Validation {
    pub model: SystemModel,
    pub warnings: Vec<Warning>,
}

/// Validate `source` against `profile` with default build options
pub fn validate(source: &str, profile: &ArchProfile) -> Result<Validation, Diagnostics> {
    validate_with(source, &BuildConfig::new(profile))
}

/// Validate `source` with explicit build options
pub fn validate_with(source: &str, config: &BuildConfig) -> Result<Validation, Diagnostics> {
    let decl = parser::parse(source)?;

    let mut diags = Diagnostics::new();
    let system = resolve::resolve(decl, &mut diags);

    let report = check::check(&system, config.profile);
    diags.extend(report.errors);

    if !diags.is_empty() {
        log::debug!("validation failed with {} error(s)", diags.len());
        return Err(diags);
    }

    Ok(Validation {
        model: model::build(&system, config),
        warnings: report.warnings,
    })
}
