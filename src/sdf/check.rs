//! Constraint checker
//!
//! Walks the resolved description and enforces the system invariants:
//! address layout, identifier uniqueness, permission legality for the
//! target architecture and scheduling parameters. Every check runs to
//! completion; violations are collected, never returned early.

use super::ast::{Perms, SourceLoc};
use super::error::{AddressSpace, Diagnostics, IdKind, RangeSite, SdfError, Warning};
use super::resolve::{DomainId, RegionId, ResolvedDomain, ResolvedMap, ResolvedSystem};
use crate::arch::profile::{STACK_SIZE_MAX, STACK_SIZE_MIN};
use crate::arch::ArchProfile;
use std::collections::HashMap;

/// Budget used when a domain declares none, in microseconds
pub const BUDGET_DEFAULT: u64 = 1000;

/// Default stack size of a protection domain (8 KiB)
pub const STACK_SIZE_DEFAULT: u64 = 0x2000;

/// Outcome of a checker run
#[derive(Debug, Default)]
pub struct CheckReport {
    pub errors: Diagnostics,
    pub warnings: Vec<Warning>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Effective (budget, period) with defaults applied
pub fn effective_schedule(budget: Option<u64>, period: Option<u64>) -> (u64, u64) {
    let budget = budget.unwrap_or(BUDGET_DEFAULT);
    (budget, period.unwrap_or(budget))
}

/// Constraint checker over one resolved system
pub struct ConstraintChecker<'a> {
    system: &'a ResolvedSystem,
    profile: &'a ArchProfile,
    errors: Diagnostics,
    warnings: Vec<Warning>,
}

impl<'a> ConstraintChecker<'a> {
    pub fn new(system: &'a ResolvedSystem, profile: &'a ArchProfile) -> Self {
        Self {
            system,
            profile,
            errors: Diagnostics::new(),
            warnings: Vec::new(),
        }
    }

    /// Run all checks
    pub fn validate(mut self) -> CheckReport {
        self.check_regions();
        self.check_physical_overlap();

        for id in self.system.domain_ids() {
            let domain = self.system.domain(id);
            self.check_domain_schedule(domain);
            self.check_stack(domain);

            let space = AddressSpace::Domain(domain.name.clone());
            let limit = self.profile.pd_map_limit(domain.stack_size.unwrap_or(STACK_SIZE_DEFAULT));
            self.check_maps(&space, &domain.maps, limit);

            self.check_channel_ids(id);
        }

        self.check_irq_numbers();
        self.check_channels();
        self.check_virtual_machines();
        self.check_unused_regions();

        log::debug!(
            "checker finished: {} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        );

        CheckReport {
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    /// Page size the region will use, if that page size is legal
    fn page_size(&self, region: RegionId) -> Option<u64> {
        let region = self.system.region(region);
        let page_size = region.page_size.unwrap_or(self.profile.min_page_size());
        self.profile.supports_page_size(page_size).then_some(page_size)
    }

    fn misaligned(&mut self, entity: String, reason: String, loc: SourceLoc) {
        self.errors.push(SdfError::Misaligned { entity, reason, loc });
    }

    fn check_regions(&mut self) {
        for id in self.system.region_ids() {
            let region = self.system.region(id);
            let entity = format!("memory region '{}'", region.name);

            let Some(page_size) = self.page_size(id) else {
                let page_size = region.page_size.unwrap_or_default();
                self.misaligned(
                    entity,
                    format!(
                        "page size 0x{:x} is not supported on {}",
                        page_size, self.profile.name
                    ),
                    region.loc,
                );
                continue;
            };

            if region.size == 0 || region.size % page_size != 0 {
                self.misaligned(
                    entity.clone(),
                    format!(
                        "size 0x{:x} is not a positive multiple of the page size 0x{:x}",
                        region.size, page_size
                    ),
                    region.loc,
                );
            }

            if let Some(phys_addr) = region.phys_addr {
                if phys_addr % page_size != 0 {
                    self.misaligned(
                        entity.clone(),
                        format!(
                            "phys_addr 0x{:x} is not aligned to the page size 0x{:x}",
                            phys_addr, page_size
                        ),
                        region.loc,
                    );
                }
                if phys_addr.checked_add(region.size).is_none() {
                    self.misaligned(
                        entity,
                        "physical range wraps the address space".to_string(),
                        region.loc,
                    );
                }
            }
        }
    }

    /// Regions pinned to physical addresses must not share memory
    fn check_physical_overlap(&mut self) {
        let pinned: Vec<RangeSite> = self
            .system
            .regions
            .iter()
            .filter_map(|region| {
                let start = region.phys_addr?;
                let end = start.checked_add(region.size)?;
                Some(RangeSite {
                    region: region.name.clone(),
                    start,
                    end,
                    loc: region.loc,
                })
            })
            .collect();

        self.report_overlaps(AddressSpace::Physical, &pinned);
    }

    fn report_overlaps(&mut self, space: AddressSpace, sites: &[RangeSite]) {
        for (i, first) in sites.iter().enumerate() {
            for second in &sites[i + 1..] {
                if first.start < second.end && second.start < first.end {
                    self.errors.push(SdfError::Overlap {
                        space: space.clone(),
                        first: first.clone(),
                        second: second.clone(),
                    });
                }
            }
        }
    }

    fn check_maps(&mut self, space: &AddressSpace, maps: &[ResolvedMap], limit: u64) {
        let mut sites = Vec::with_capacity(maps.len());

        for map in maps {
            let region = self.system.region(map.region);
            let entity = format!("map of '{}' in {}", region.name, space);

            self.check_perms(&entity, map.perms, map.cached, map.loc);

            if let Some(page_size) = self.page_size(map.region) {
                if map.vaddr % page_size != 0 {
                    self.misaligned(
                        entity.clone(),
                        format!(
                            "vaddr 0x{:x} is not aligned to the page size 0x{:x}",
                            map.vaddr, page_size
                        ),
                        map.loc,
                    );
                }
            }

            let Some(end) = map.vaddr.checked_add(region.size) else {
                self.misaligned(entity, "virtual range wraps the address space".to_string(), map.loc);
                continue;
            };

            if end > limit {
                self.misaligned(
                    entity,
                    format!(
                        "range [0x{:x}..0x{:x}) exceeds the address space limit 0x{:x}",
                        map.vaddr, end, limit
                    ),
                    map.loc,
                );
            }

            sites.push(RangeSite {
                region: region.name.clone(),
                start: map.vaddr,
                end,
                loc: map.loc,
            });
        }

        self.report_overlaps(space.clone(), &sites);
    }

    fn check_perms(&mut self, entity: &str, perms: Perms, cached: bool, loc: SourceLoc) {
        if !self.profile.allows_perms(perms) {
            let reason = if perms.is_write_only() {
                format!("write-only mappings are not allowed on {}", self.profile.name)
            } else {
                format!("combination not allowed on {}", self.profile.name)
            };
            self.errors.push(SdfError::IllegalPermission {
                entity: entity.to_string(),
                perms,
                reason,
                loc,
            });
        }

        if perms.execute() && !cached && !self.profile.uncached_exec {
            self.errors.push(SdfError::IllegalPermission {
                entity: entity.to_string(),
                perms,
                reason: format!("uncached mappings cannot be executable on {}", self.profile.name),
                loc,
            });
        }
    }

    fn check_schedule(
        &mut self,
        entity: &str,
        priority: u64,
        budget: Option<u64>,
        period: Option<u64>,
        loc: SourceLoc,
    ) {
        let max_priority = self.profile.max_priority as u64;
        if priority > max_priority {
            self.invalid_schedule(
                entity,
                format!("priority {} must be between 0 and {}", priority, max_priority),
                loc,
            );
        }

        let (budget, period) = effective_schedule(budget, period);
        if budget == 0 {
            self.invalid_schedule(entity, "budget must be greater than zero".to_string(), loc);
        }
        if budget > period {
            self.invalid_schedule(
                entity,
                format!(
                    "budget ({}) must be less than, or equal to, period ({})",
                    budget, period
                ),
                loc,
            );
        }
    }

    fn invalid_schedule(&mut self, entity: &str, reason: String, loc: SourceLoc) {
        self.errors.push(SdfError::InvalidSchedule {
            entity: entity.to_string(),
            reason,
            loc,
        });
    }

    fn check_domain_schedule(&mut self, domain: &ResolvedDomain) {
        let entity = format!("protection domain '{}'", domain.name);
        self.check_schedule(&entity, domain.priority, domain.budget, domain.period, domain.loc);

        // A passive server runs on the scheduling context its callers lend it
        let declares_budget = domain.budget.is_some() || domain.period.is_some();
        if domain.passive && declares_budget && !domain.pp {
            self.invalid_schedule(
                &entity,
                "passive domain declares its own budget/period but serves no protected procedures"
                    .to_string(),
                domain.loc,
            );
        }
    }

    fn check_stack(&mut self, domain: &ResolvedDomain) {
        let Some(stack_size) = domain.stack_size else {
            return;
        };

        let entity = format!("protection domain '{}'", domain.name);
        if !(STACK_SIZE_MIN..=STACK_SIZE_MAX).contains(&stack_size) {
            self.misaligned(
                entity,
                format!(
                    "stack size must be between 0x{:x} and 0x{:x} bytes",
                    STACK_SIZE_MIN, STACK_SIZE_MAX
                ),
                domain.loc,
            );
        } else if stack_size % self.profile.min_page_size() != 0 {
            self.misaligned(
                entity,
                format!(
                    "stack size 0x{:x} is not aligned to the page size 0x{:x}",
                    stack_size,
                    self.profile.min_page_size()
                ),
                domain.loc,
            );
        }
    }

    /// IRQ ids and channel end ids share one namespace per domain
    fn check_channel_ids(&mut self, id: DomainId) {
        let domain = self.system.domain(id);
        let owner = format!("protection domain '{}'", domain.name);

        let ids = domain
            .irqs
            .iter()
            .map(|irq| (irq.id, irq.loc))
            .chain(self.system.ends_of(id).map(|end| (end.id, end.loc)));

        let mut seen: HashMap<u64, SourceLoc> = HashMap::new();
        for (value, loc) in ids {
            if value > self.profile.max_channel_id {
                self.errors.push(SdfError::IdRange {
                    kind: IdKind::Channel,
                    id: value,
                    max: self.profile.max_channel_id,
                    owner: owner.clone(),
                    loc,
                });
            }
            match seen.get(&value) {
                Some(first) => self.errors.push(SdfError::DuplicateId {
                    kind: IdKind::Channel,
                    id: value,
                    owner: owner.clone(),
                    loc,
                    first: *first,
                }),
                None => {
                    seen.insert(value, loc);
                }
            }
        }
    }

    /// A hardware IRQ can only be delivered to one place
    fn check_irq_numbers(&mut self) {
        let mut seen: HashMap<u64, SourceLoc> = HashMap::new();
        for domain in &self.system.domains {
            for irq in &domain.irqs {
                match seen.get(&irq.irq) {
                    Some(first) => self.errors.push(SdfError::DuplicateId {
                        kind: IdKind::IrqNumber,
                        id: irq.irq,
                        owner: format!("protection domain '{}'", domain.name),
                        loc: irq.loc,
                        first: *first,
                    }),
                    None => {
                        seen.insert(irq.irq, irq.loc);
                    }
                }
            }
        }
    }

    fn invalid_channel(&mut self, entity: String, reason: String, loc: SourceLoc) {
        self.errors.push(SdfError::InvalidChannel { entity, reason, loc });
    }

    fn check_channels(&mut self) {
        for channel in &self.system.channels {
            let [a, b] = &channel.ends;
            let pd_a = self.system.domain(a.domain);
            let pd_b = self.system.domain(b.domain);

            if a.domain == b.domain {
                self.invalid_channel(
                    format!("channel of '{}'", pd_a.name),
                    "both ends are in the same protection domain".to_string(),
                    channel.loc,
                );
                continue;
            }

            if a.pp && b.pp {
                self.invalid_channel(
                    format!("channel between '{}' and '{}'", pd_a.name, pd_b.name),
                    "protected procedure calls cannot go both ways".to_string(),
                    channel.loc,
                );
                continue;
            }

            let (caller, callee, end) = match (a.pp, b.pp) {
                (true, false) => (pd_a, pd_b, a),
                (false, true) => (pd_b, pd_a, b),
                _ => continue,
            };

            if !callee.pp {
                self.invalid_channel(
                    format!("channel end of '{}'", caller.name),
                    format!(
                        "protected procedure call into '{}', which does not serve protected procedures",
                        callee.name
                    ),
                    end.loc,
                );
            }

            if caller.priority >= callee.priority {
                self.invalid_schedule(
                    &format!("channel end of '{}'", caller.name),
                    format!(
                        "protected procedure calls must go to a strictly higher priority; '{}' ({}) calls '{}' ({})",
                        caller.name, caller.priority, callee.name, callee.priority
                    ),
                    end.loc,
                );
            }
        }
    }

    fn check_virtual_machines(&mut self) {
        let mut vm_ids: HashMap<u64, SourceLoc> = HashMap::new();

        for domain in &self.system.domains {
            let Some(vm) = &domain.virtual_machine else {
                continue;
            };
            let entity = format!("virtual machine '{}'", vm.name);

            if !self.profile.hypervisor {
                self.errors.push(SdfError::Unsupported {
                    feature: entity.clone(),
                    arch: self.profile.name.clone(),
                    loc: vm.loc,
                });
            }

            match vm_ids.get(&vm.id) {
                Some(first) => self.errors.push(SdfError::DuplicateId {
                    kind: IdKind::VirtualMachine,
                    id: vm.id,
                    owner: "system".to_string(),
                    loc: vm.loc,
                    first: *first,
                }),
                None => {
                    vm_ids.insert(vm.id, vm.loc);
                }
            }

            self.check_schedule(&entity, vm.priority.unwrap_or(0), vm.budget, vm.period, vm.loc);

            let mut vcpus: HashMap<u64, SourceLoc> = HashMap::new();
            for vcpu in &vm.vcpus {
                if vcpu.id > self.profile.max_channel_id {
                    self.errors.push(SdfError::IdRange {
                        kind: IdKind::Vcpu,
                        id: vcpu.id,
                        max: self.profile.max_channel_id,
                        owner: entity.clone(),
                        loc: vcpu.loc,
                    });
                }
                match vcpus.get(&vcpu.id) {
                    Some(first) => self.errors.push(SdfError::DuplicateId {
                        kind: IdKind::Vcpu,
                        id: vcpu.id,
                        owner: entity.clone(),
                        loc: vcpu.loc,
                        first: *first,
                    }),
                    None => {
                        vcpus.insert(vcpu.id, vcpu.loc);
                    }
                }
            }

            let space = AddressSpace::VirtualMachine(vm.name.clone());
            self.check_maps(&space, &vm.maps, self.profile.vm_max_vaddr);
        }
    }

    fn check_unused_regions(&mut self) {
        for id in self.system.region_ids() {
            let used = self.system.domains.iter().any(|domain| {
                domain.maps.iter().any(|map| map.region == id)
                    || domain
                        .virtual_machine
                        .as_ref()
                        .is_some_and(|vm| vm.maps.iter().any(|map| map.region == id))
            });

            if !used {
                let region = self.system.region(id);
                log::warn!("unused memory region '{}'", region.name);
                self.warnings.push(Warning::new(
                    format!("unused memory region '{}'", region.name),
                    Some(region.loc),
                ));
            }
        }
    }
}

/// Check a resolved system against `profile`
pub fn check(system: &ResolvedSystem, profile: &ArchProfile) -> CheckReport {
    ConstraintChecker::new(system, profile).validate()
}
