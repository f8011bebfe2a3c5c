//! Terminal reports

use crate::arch::ArchProfile;
use crate::sdf::{Diagnostics, ErrorKind, Transport, Validation, Warning};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::Path;

/// Error count per kind, in kind order
pub fn kind_summary(diags: &Diagnostics) -> BTreeMap<ErrorKind, usize> {
    let mut summary = BTreeMap::new();
    for error in diags.errors() {
        *summary.entry(error.kind()).or_insert(0) += 1;
    }
    summary
}

fn print_warnings(warnings: &[Warning]) {
    if warnings.is_empty() {
        return;
    }
    println!("\n{}", "Warnings:".yellow().bold());
    for warning in warnings {
        println!("  {} {}", "[WARN]".yellow(), warning);
    }
}

/// Report for `sdf-check check`
pub fn print_check_report(
    path: &Path,
    profile: &ArchProfile,
    outcome: &Result<Validation, Diagnostics>,
    image_warnings: &[Warning],
) {
    println!("{}", "=".repeat(70));
    println!("{}", "System Description Check".cyan().bold());
    println!("{}", "=".repeat(70));

    println!("\n{}: {}", "File".white().bold(), path.display());
    println!("{}: {} ({})", "Architecture".white().bold(), profile.name, profile.id);

    let status = if outcome.is_ok() {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    println!("\n{}: {}", "Overall Status".white().bold(), status);

    match outcome {
        Ok(validation) => {
            let model = &validation.model;
            let calls = model
                .channels()
                .iter()
                .filter(|c| matches!(c, Transport::ProtectedCall { .. }))
                .count();
            let vms = model
                .domains()
                .values()
                .filter(|d| d.virtual_machine.is_some())
                .count();

            let fixed = model.regions().iter().filter(|r| !r.relocatable()).count();

            println!("\n{}", "System:".white().bold());
            println!("  {} memory region(s), {} at fixed addresses", model.regions().len(), fixed);
            println!("  {} protection domain(s), {} virtual machine(s)", model.domains().len(), vms);
            println!(
                "  {} channel(s), {} with protected calls",
                model.channels().len(),
                calls
            );

            println!("\n{}", "Protection Domains:".white().bold());
            for (name, domain) in model.domains() {
                let channels = model
                    .channels()
                    .iter()
                    .filter(|c| c.ends().iter().any(|end| &end.domain == name))
                    .count();
                println!(
                    "  {} {} priority {}, budget {}/{}us, {} mapping(s), {} channel(s){}",
                    "[PASS]".green(),
                    name.cyan(),
                    domain.priority,
                    domain.budget,
                    domain.period,
                    domain.mappings.len(),
                    channels,
                    if domain.passive { ", passive" } else { "" }
                );
            }

            let mut warnings = validation.warnings.clone();
            warnings.extend_from_slice(image_warnings);
            print_warnings(&warnings);
        }
        Err(diags) => {
            println!("\n{}", "Errors:".red().bold());
            for error in diags.errors() {
                println!("  {} {}: {}", "[FAIL]".red().bold(), error.kind(), error);
            }

            println!("\n{}", "Summary:".white().bold());
            for (kind, count) in kind_summary(diags) {
                println!("  {:>4} {}", count.to_string().red(), kind);
            }
        }
    }

    println!("\n{}", "=".repeat(70));
}

/// Diagnostics on stderr, for commands whose stdout carries output
pub fn print_diagnostics(path: &Path, diags: &Diagnostics) {
    for error in diags.errors() {
        eprintln!(
            "{} {}:{}: {}",
            "[FAIL]".red().bold(),
            path.display(),
            error.kind(),
            error
        );
    }
    eprintln!("{} {}", path.display(), diags.to_string().red());
}

pub fn print_profile_list(profiles: &[&ArchProfile]) {
    println!("{}", "=".repeat(60));
    println!("{}", "Architecture Profiles".cyan().bold());
    println!("{}", "=".repeat(60));

    for profile in profiles {
        println!("\n  {}: {}", profile.id.white().bold(), profile.description);
        println!("    Page sizes: {}", format_sizes(&profile.page_sizes));
        println!(
            "    Hypervisor: {}",
            if profile.hypervisor { "yes" } else { "no" }
        );
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "Use {} to see detailed profile information",
        "sdf-check arch show <arch>".cyan()
    );
}

pub fn print_profile(profile: &ArchProfile) {
    println!("{}", "=".repeat(70));
    println!("{}", format!("Architecture Profile: {}", profile.name).cyan().bold());
    println!("{}", "=".repeat(70));

    println!("\n{}", "Basic Information:".white().bold());
    println!("  ID: {}", profile.id);
    println!("  Description: {}", profile.description);
    if let Some(machine) = profile.elf_machine {
        println!("  ELF machine: {}", machine);
    }

    println!("\n{}", "Memory:".white().bold());
    println!("  Page sizes: {}", format_sizes(&profile.page_sizes));
    println!("  Domain address space: [0x0..0x{:x})", profile.pd_max_vaddr);
    println!("  Guest address space: [0x0..0x{:x})", profile.vm_max_vaddr);
    let perms: Vec<String> = profile.allowed_perms.iter().map(|p| p.to_string()).collect();
    println!("  Permissions: {}", perms.join(", "));
    println!(
        "  Uncached executable: {}",
        if profile.uncached_exec { "allowed" } else { "forbidden" }
    );

    println!("\n{}", "Scheduling and IDs:".white().bold());
    println!("  Priorities: 0..={}", profile.max_priority);
    println!("  Channel/IRQ ids: 0..={}", profile.max_channel_id);
    println!(
        "  Virtual machines: {}",
        if profile.hypervisor { "supported" } else { "not supported" }
    );

    println!("\n{}", "=".repeat(70));
}

fn format_sizes(sizes: &[u64]) -> String {
    sizes
        .iter()
        .map(|&size| match size {
            s if s >= 1 << 30 && s % (1 << 30) == 0 => format!("{} GiB", s >> 30),
            s if s >= 1 << 20 && s % (1 << 20) == 0 => format!("{} MiB", s >> 20),
            s if s >= 1 << 10 && s % (1 << 10) == 0 => format!("{} KiB", s >> 10),
            s => format!("{} B", s),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::AARCH64_PROFILE;
    use crate::sdf::validate;

    #[test]
    fn test_kind_summary() {
        let diags = validate(
            r#"<system>
                <memory_region name="a" size="0x1000" />
                <protection_domain name="x" priority="1" budget="300" period="160">
                    <map mr="a" vaddr="0x1000000" />
                    <map mr="a" vaddr="0x1000000" />
                    <map mr="b" vaddr="0x2000000" />
                </protection_domain>
            </system>"#,
            &AARCH64_PROFILE,
        )
        .unwrap_err();

        let summary: Vec<_> = kind_summary(&diags).into_iter().collect();
        assert_eq!(
            summary,
            vec![
                (ErrorKind::UnresolvedReference, 1),
                (ErrorKind::Overlap, 1),
                (ErrorKind::InvalidSchedule, 1),
            ]
        );
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(format_sizes(&[0x1000, 0x20_0000, 0x4000_0000]), "4 KiB, 2 MiB, 1 GiB");
        assert_eq!(format_sizes(&[0x1800]), "6 KiB");
        assert_eq!(format_sizes(&[100]), "100 B");
    }
}
