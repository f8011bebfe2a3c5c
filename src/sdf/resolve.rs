//! Symbol resolution
//!
//! Builds the per-namespace name tables and replaces every textual
//! reference with a handle into those tables. Duplicate declarations and
//! dangling references are collected, and the offending entities dropped,
//! so the checker can still run over everything that did resolve.

use super::ast::{
    ChannelDecl, DomainDecl, EndDecl, IrqDecl, MapDecl, Perms, RegionDecl, SourceLoc, SystemDecl,
    VcpuDecl, VmDecl,
};
use super::error::{Diagnostics, Namespace, SdfError};
use std::collections::HashMap;

/// Handle of a memory region in [`ResolvedSystem::regions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(usize);

/// Handle of a protection domain in [`ResolvedSystem::domains`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMap {
    pub region: RegionId,
    pub vaddr: u64,
    pub perms: Perms,
    pub cached: bool,
    pub setvar_vaddr: Option<String>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVm {
    pub name: String,
    pub id: u64,
    pub priority: Option<u64>,
    pub budget: Option<u64>,
    pub period: Option<u64>,
    pub vcpus: Vec<VcpuDecl>,
    pub maps: Vec<ResolvedMap>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDomain {
    pub name: String,
    pub priority: u64,
    pub budget: Option<u64>,
    pub period: Option<u64>,
    pub passive: bool,
    pub pp: bool,
    pub stack_size: Option<u64>,
    pub program_image: Option<String>,
    pub maps: Vec<ResolvedMap>,
    pub irqs: Vec<IrqDecl>,
    pub virtual_machine: Option<ResolvedVm>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnd {
    pub domain: DomainId,
    pub id: u64,
    pub pp: bool,
    pub notify: bool,
    pub setvar_id: Option<String>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub ends: [ResolvedEnd; 2],
    pub loc: SourceLoc,
}

/// Description with every reference turned into a handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSystem {
    pub regions: Vec<RegionDecl>,
    pub domains: Vec<ResolvedDomain>,
    pub channels: Vec<ResolvedChannel>,
}

impl ResolvedSystem {
    pub fn region(&self, id: RegionId) -> &RegionDecl {
        &self.regions[id.0]
    }

    pub fn domain(&self, id: DomainId) -> &ResolvedDomain {
        &self.domains[id.0]
    }

    pub fn domain_ids(&self) -> impl Iterator<Item = DomainId> {
        (0..self.domains.len()).map(DomainId)
    }

    pub fn region_ids(&self) -> impl Iterator<Item = RegionId> {
        (0..self.regions.len()).map(RegionId)
    }

    /// Channel ends attached to `domain`, in channel declaration order
    pub fn ends_of(&self, domain: DomainId) -> impl Iterator<Item = &ResolvedEnd> {
        self.channels
            .iter()
            .flat_map(|channel| channel.ends.iter())
            .filter(move |end| end.domain == domain)
    }
}

/// Name table for one namespace; the first declaration wins
struct SymbolTable {
    namespace: Namespace,
    entries: HashMap<String, (usize, SourceLoc)>,
}

impl SymbolTable {
    fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            entries: HashMap::new(),
        }
    }

    /// Declare `name`; reports and returns false if it already exists
    fn declare(&mut self, name: &str, index: usize, loc: SourceLoc, diags: &mut Diagnostics) -> bool {
        if let Some((_, first)) = self.entries.get(name) {
            diags.push(SdfError::DuplicateName {
                namespace: self.namespace.clone(),
                name: name.to_string(),
                loc,
                first: *first,
            });
            return false;
        }
        self.entries.insert(name.to_string(), (index, loc));
        true
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|(index, _)| *index)
    }
}

struct Resolver<'d> {
    regions: SymbolTable,
    domains: SymbolTable,
    diags: &'d mut Diagnostics,
}

/// Resolve every name reference in `system`
pub fn resolve(system: SystemDecl, diags: &mut Diagnostics) -> ResolvedSystem {
    let mut resolver = Resolver {
        regions: SymbolTable::new(Namespace::MemoryRegion),
        domains: SymbolTable::new(Namespace::ProtectionDomain),
        diags,
    };
    resolver.run(system)
}

impl<'d> Resolver<'d> {
    fn run(&mut self, system: SystemDecl) -> ResolvedSystem {
        let mut resolved = ResolvedSystem::default();

        for region in system.regions {
            let index = resolved.regions.len();
            if self.regions.declare(&region.name, index, region.loc, self.diags) {
                resolved.regions.push(region);
            }
        }

        // Domain names must all be known before channels are resolved
        let mut kept_domains = Vec::with_capacity(system.domains.len());
        for domain in system.domains {
            let index = kept_domains.len();
            if self.domains.declare(&domain.name, index, domain.loc, self.diags) {
                kept_domains.push(domain);
            }
        }

        let mut vms = SymbolTable::new(Namespace::VirtualMachine);
        for (index, domain) in kept_domains.into_iter().enumerate() {
            if let Some(vm) = &domain.virtual_machine {
                vms.declare(&vm.name, index, vm.loc, self.diags);
            }
            resolved.domains.push(self.domain(domain));
        }

        for channel in system.channels {
            if let Some(channel) = self.channel(channel) {
                resolved.channels.push(channel);
            }
        }

        self.check_symbols(&resolved);

        log::debug!(
            "resolved {} region(s), {} domain(s), {} channel(s)",
            resolved.regions.len(),
            resolved.domains.len(),
            resolved.channels.len()
        );

        resolved
    }

    fn domain(&mut self, domain: DomainDecl) -> ResolvedDomain {
        let referrer = format!("map in protection domain '{}'", domain.name);
        let maps = self.maps(domain.maps, &referrer);
        let virtual_machine = domain.virtual_machine.map(|vm| self.virtual_machine(vm));

        ResolvedDomain {
            name: domain.name,
            priority: domain.priority,
            budget: domain.budget,
            period: domain.period,
            passive: domain.passive,
            pp: domain.pp,
            stack_size: domain.stack_size,
            program_image: domain.program_image,
            maps,
            irqs: domain.irqs,
            virtual_machine,
            loc: domain.loc,
        }
    }

    fn virtual_machine(&mut self, vm: VmDecl) -> ResolvedVm {
        let referrer = format!("map in virtual machine '{}'", vm.name);
        let maps = self.maps(vm.maps, &referrer);

        ResolvedVm {
            name: vm.name,
            id: vm.id,
            priority: vm.priority,
            budget: vm.budget,
            period: vm.period,
            vcpus: vm.vcpus,
            maps,
            loc: vm.loc,
        }
    }

    fn maps(&mut self, maps: Vec<MapDecl>, referrer: &str) -> Vec<ResolvedMap> {
        maps.into_iter()
            .filter_map(|map| match self.regions.lookup(&map.mr) {
                Some(index) => Some(ResolvedMap {
                    region: RegionId(index),
                    vaddr: map.vaddr,
                    perms: map.perms,
                    cached: map.cached,
                    setvar_vaddr: map.setvar_vaddr,
                    loc: map.loc,
                }),
                None => {
                    self.diags.push(SdfError::UnresolvedReference {
                        target: Namespace::MemoryRegion,
                        name: map.mr,
                        referrer: referrer.to_string(),
                        loc: map.loc,
                    });
                    None
                }
            })
            .collect()
    }

    fn channel(&mut self, channel: ChannelDecl) -> Option<ResolvedChannel> {
        let [a, b] = channel.ends;
        // Resolve both ends before bailing so both get reported
        let a = self.end(a);
        let b = self.end(b);

        Some(ResolvedChannel {
            ends: [a?, b?],
            loc: channel.loc,
        })
    }

    fn end(&mut self, end: EndDecl) -> Option<ResolvedEnd> {
        match self.domains.lookup(&end.pd) {
            Some(index) => Some(ResolvedEnd {
                domain: DomainId(index),
                id: end.id,
                pp: end.pp,
                notify: end.notify,
                setvar_id: end.setvar_id,
                loc: end.loc,
            }),
            None => {
                self.diags.push(SdfError::UnresolvedReference {
                    target: Namespace::ProtectionDomain,
                    name: end.pd,
                    referrer: "channel end".to_string(),
                    loc: end.loc,
                });
                None
            }
        }
    }

    /// Symbols bound with setvar_* share one namespace per domain
    fn check_symbols(&mut self, system: &ResolvedSystem) {
        for id in system.domain_ids() {
            let domain = system.domain(id);
            let mut symbols = SymbolTable::new(Namespace::Symbol {
                domain: domain.name.clone(),
            });

            let map_symbols = domain
                .maps
                .iter()
                .filter_map(|map| map.setvar_vaddr.as_deref().map(|s| (s, map.loc)));
            let irq_symbols = domain
                .irqs
                .iter()
                .filter_map(|irq| irq.setvar_id.as_deref().map(|s| (s, irq.loc)));
            let end_symbols = system
                .ends_of(id)
                .filter_map(|end| end.setvar_id.as_deref().map(|s| (s, end.loc)));

            for (index, (symbol, loc)) in map_symbols.chain(irq_symbols).chain(end_symbols).enumerate() {
                symbols.declare(symbol, index, loc, self.diags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::error::ErrorKind;
    use crate::sdf::parser::parse;

    fn resolve_source(source: &str) -> (ResolvedSystem, Diagnostics) {
        let mut diags = Diagnostics::new();
        let system = resolve(parse(source).unwrap(), &mut diags);
        (system, diags)
    }

    #[test]
    fn test_references_become_handles() {
        let (system, diags) = resolve_source(
            r#"<system>
                <memory_region name="a" size="0x1000" />
                <memory_region name="b" size="0x1000" />
                <protection_domain name="ping" priority="1">
                    <map mr="b" vaddr="0x1000" />
                </protection_domain>
                <protection_domain name="pong" priority="1" />
                <channel><end pd="pong" id="0" /><end pd="ping" id="1" /></channel>
            </system>"#,
        );

        assert!(diags.is_empty());
        let map = &system.domains[0].maps[0];
        assert_eq!(system.region(map.region).name, "b");

        let channel = &system.channels[0];
        assert_eq!(system.domain(channel.ends[0].domain).name, "pong");
        assert_eq!(system.domain(channel.ends[1].domain).name, "ping");

        let ping = system.domain_ids().next().unwrap();
        let ends: Vec<_> = system.ends_of(ping).map(|end| end.id).collect();
        assert_eq!(ends, vec![1]);
    }

    #[test]
    fn test_duplicate_names_are_reported() {
        let (system, diags) = resolve_source(
            r#"<system>
                <memory_region name="a" size="0x1000" />
                <memory_region name="a" size="0x2000" />
                <protection_domain name="x" priority="1" />
                <protection_domain name="x" priority="2" />
            </system>"#,
        );

        assert_eq!(diags.count(ErrorKind::DuplicateName), 2);
        assert_eq!(system.regions.len(), 1);
        assert_eq!(system.regions[0].size, 0x1000);
        assert_eq!(system.domains.len(), 1);
        assert_eq!(system.domains[0].priority, 1);

        match &diags.errors()[0] {
            SdfError::DuplicateName { name, loc, first, .. } => {
                assert_eq!(name, "a");
                assert_eq!(first.line, 2);
                assert_eq!(loc.line, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_references_accumulate() {
        let (system, diags) = resolve_source(
            r#"<system>
                <memory_region name="a" size="0x1000" />
                <protection_domain name="ping" priority="1">
                    <map mr="missing" vaddr="0x1000" />
                    <map mr="a" vaddr="0x2000" />
                </protection_domain>
                <channel><end pd="ping" id="0" /><end pd="ghost" id="0" /></channel>
                <channel><end pd="nobody" id="1" /><end pd="ghost" id="1" /></channel>
            </system>"#,
        );

        assert_eq!(diags.count(ErrorKind::UnresolvedReference), 4);
        assert_eq!(system.domains[0].maps.len(), 1);
        assert!(system.channels.is_empty());

        let names: Vec<_> = diags
            .errors()
            .iter()
            .map(|e| e.entities()[0].to_string())
            .collect();
        assert_eq!(names, vec!["missing", "ghost", "nobody", "ghost"]);
    }

    #[test]
    fn test_duplicate_vm_names() {
        let (_, diags) = resolve_source(
            r#"<system>
                <protection_domain name="vmm1" priority="1">
                    <virtual_machine name="guest" id="0"><vcpu id="0" /></virtual_machine>
                </protection_domain>
                <protection_domain name="vmm2" priority="1">
                    <virtual_machine name="guest" id="1"><vcpu id="0" /></virtual_machine>
                </protection_domain>
            </system>"#,
        );

        assert_eq!(diags.count(ErrorKind::DuplicateName), 1);
    }

    #[test]
    fn test_duplicate_symbols_within_domain() {
        let (_, diags) = resolve_source(
            r#"<system>
                <memory_region name="a" size="0x1000" />
                <protection_domain name="ping" priority="1">
                    <map mr="a" vaddr="0x1000" setvar_vaddr="shared" />
                    <irq irq="40" id="3" setvar_id="shared" />
                </protection_domain>
                <protection_domain name="pong" priority="1">
                    <map mr="a" vaddr="0x1000" setvar_vaddr="shared" />
                </protection_domain>
            </system>"#,
        );

        assert_eq!(diags.len(), 1);
        match &diags.errors()[0] {
            SdfError::DuplicateName { namespace, name, .. } => {
                assert_eq!(
                    namespace,
                    &Namespace::Symbol {
                        domain: "ping".to_string()
                    }
                );
                assert_eq!(name, "shared");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
