//! Validated system model
//!
//! The output of the pipeline. Built only from a description that passed
//! every check, so construction cannot fail. All defaults are applied,
//! page sizes are final and symbol bindings are explicit tables.

use super::ast::{Perms, Trigger};
use super::check::{effective_schedule, STACK_SIZE_DEFAULT};
use super::resolve::{DomainId, RegionId, ResolvedEnd, ResolvedMap, ResolvedSystem};
use crate::arch::ArchProfile;
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Build options, passed explicitly to the builder
#[derive(Debug, Clone, Copy)]
pub struct BuildConfig<'a> {
    pub profile: &'a ArchProfile,
    /// Promote regions without an explicit page size to the largest page
    /// size their layout allows
    pub promote_page_sizes: bool,
}

impl<'a> BuildConfig<'a> {
    pub fn new(profile: &'a ArchProfile) -> Self {
        Self {
            profile,
            promote_page_sizes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheAttr {
    Cached,
    Uncached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionModel {
    pub name: String,
    pub size: u64,
    pub page_size: u64,
    pub page_count: u64,
    /// `None` if the region may be placed anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phys_addr: Option<u64>,
}

impl RegionModel {
    pub fn relocatable(&self) -> bool {
        self.phys_addr.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingModel {
    pub region: String,
    pub vaddr: u64,
    pub size: u64,
    pub perms: Perms,
    pub cache: CacheAttr,
    /// Symbol patched with `vaddr`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqModel {
    pub irq: u64,
    pub id: u64,
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineModel {
    pub name: String,
    pub id: u64,
    pub priority: u8,
    pub budget: u64,
    pub period: u64,
    pub vcpus: Vec<u64>,
    pub mappings: Vec<MappingModel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainModel {
    pub priority: u8,
    pub budget: u64,
    pub period: u64,
    pub passive: bool,
    pub pp: bool,
    pub stack_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_image: Option<String>,
    pub mappings: Vec<MappingModel>,
    pub irqs: Vec<IrqModel>,
    /// Symbol name -> value patched into the program image
    pub symbols: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_machine: Option<VirtualMachineModel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEnd {
    pub domain: String,
    pub id: u64,
    pub notify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// How a channel carries events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transport {
    /// Either end may signal the other
    Notification { a: ChannelEnd, b: ChannelEnd },
    /// `client` may call into `server` synchronously
    ProtectedCall { client: ChannelEnd, server: ChannelEnd },
}

impl Transport {
    pub fn ends(&self) -> [&ChannelEnd; 2] {
        match self {
            Transport::Notification { a, b } => [a, b],
            Transport::ProtectedCall { client, server } => [client, server],
        }
    }
}

/// Validated, fully resolved system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemModel {
    arch: String,
    regions: Vec<RegionModel>,
    domains: BTreeMap<String, DomainModel>,
    channels: Vec<Transport>,
}

impl SystemModel {
    /// Identifier of the profile the model was checked against
    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn regions(&self) -> &[RegionModel] {
        &self.regions
    }

    pub fn region(&self, name: &str) -> Option<&RegionModel> {
        self.regions.iter().find(|region| region.name == name)
    }

    pub fn domains(&self) -> &BTreeMap<String, DomainModel> {
        &self.domains
    }

    pub fn domain(&self, name: &str) -> Option<&DomainModel> {
        self.domains.get(name)
    }

    pub fn channels(&self) -> &[Transport] {
        &self.channels
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// CRC-32 of the serialised model
    pub fn fingerprint(&self) -> Result<u32, toml::ser::Error> {
        Ok(CRC32.checksum(self.to_toml()?.as_bytes()))
    }
}

/// Build the model of a checked system
pub fn build(system: &ResolvedSystem, config: &BuildConfig) -> SystemModel {
    let regions = system
        .region_ids()
        .map(|id| region_model(system, id, config))
        .collect::<Vec<_>>();

    let mut domains = BTreeMap::new();
    for id in system.domain_ids() {
        let domain = system.domain(id);
        domains.insert(domain.name.clone(), domain_model(system, id));
    }

    let channels = system
        .channels
        .iter()
        .map(|channel| {
            let [a, b] = &channel.ends;
            match (a.pp, b.pp) {
                (false, true) => Transport::ProtectedCall {
                    client: channel_end(system, b),
                    server: channel_end(system, a),
                },
                (true, _) => Transport::ProtectedCall {
                    client: channel_end(system, a),
                    server: channel_end(system, b),
                },
                (false, false) => Transport::Notification {
                    a: channel_end(system, a),
                    b: channel_end(system, b),
                },
            }
        })
        .collect();

    log::debug!(
        "built model: {} region(s), {} domain(s), {} channel(s)",
        regions.len(),
        domains.len(),
        system.channels.len()
    );

    SystemModel {
        arch: config.profile.id.clone(),
        regions,
        domains,
        channels,
    }
}

/// Every map of `region`, in domains and guests alike
fn mappings_of(system: &ResolvedSystem, region: RegionId) -> impl Iterator<Item = &ResolvedMap> {
    system
        .domains
        .iter()
        .flat_map(|domain| {
            domain
                .maps
                .iter()
                .chain(domain.virtual_machine.iter().flat_map(|vm| vm.maps.iter()))
        })
        .filter(move |map| map.region == region)
}

fn region_model(system: &ResolvedSystem, id: RegionId, config: &BuildConfig) -> RegionModel {
    let region = system.region(id);
    let profile = config.profile;

    let page_size = match region.page_size {
        Some(page_size) => page_size,
        None if config.promote_page_sizes => profile
            .page_sizes
            .iter()
            .copied()
            .filter(|&candidate| {
                region.size % candidate == 0
                    && region.phys_addr.map_or(true, |addr| addr % candidate == 0)
                    && mappings_of(system, id).all(|map| map.vaddr % candidate == 0)
            })
            .max()
            .unwrap_or(profile.min_page_size()),
        None => profile.min_page_size(),
    };

    if region.page_size.is_none() && page_size != profile.min_page_size() {
        log::debug!(
            "memory region '{}' promoted to page size 0x{:x}",
            region.name,
            page_size
        );
    }

    RegionModel {
        name: region.name.clone(),
        size: region.size,
        page_size,
        page_count: region.size / page_size,
        phys_addr: region.phys_addr,
    }
}

fn mapping_model(system: &ResolvedSystem, map: &ResolvedMap) -> MappingModel {
    let region = system.region(map.region);
    MappingModel {
        region: region.name.clone(),
        vaddr: map.vaddr,
        size: region.size,
        perms: map.perms,
        cache: if map.cached {
            CacheAttr::Cached
        } else {
            CacheAttr::Uncached
        },
        symbol: map.setvar_vaddr.clone(),
    }
}

fn domain_model(system: &ResolvedSystem, id: DomainId) -> DomainModel {
    let domain = system.domain(id);
    let (budget, period) = effective_schedule(domain.budget, domain.period);

    let mappings: Vec<MappingModel> = domain
        .maps
        .iter()
        .map(|map| mapping_model(system, map))
        .collect();

    let irqs: Vec<IrqModel> = domain
        .irqs
        .iter()
        .map(|irq| IrqModel {
            irq: irq.irq,
            id: irq.id,
            trigger: irq.trigger,
            symbol: irq.setvar_id.clone(),
        })
        .collect();

    let mut symbols = BTreeMap::new();
    for mapping in &mappings {
        if let Some(symbol) = &mapping.symbol {
            symbols.insert(symbol.clone(), mapping.vaddr);
        }
    }
    for irq in &irqs {
        if let Some(symbol) = &irq.symbol {
            symbols.insert(symbol.clone(), irq.id);
        }
    }
    for end in system.ends_of(id) {
        if let Some(symbol) = &end.setvar_id {
            symbols.insert(symbol.clone(), end.id);
        }
    }

    let virtual_machine = domain.virtual_machine.as_ref().map(|vm| {
        let (budget, period) = effective_schedule(vm.budget, vm.period);
        VirtualMachineModel {
            name: vm.name.clone(),
            id: vm.id,
            priority: clamp_priority(vm.priority.unwrap_or(0)),
            budget,
            period,
            vcpus: vm.vcpus.iter().map(|vcpu| vcpu.id).collect(),
            mappings: vm.maps.iter().map(|map| mapping_model(system, map)).collect(),
        }
    });

    DomainModel {
        priority: clamp_priority(domain.priority),
        budget,
        period,
        passive: domain.passive,
        pp: domain.pp,
        stack_size: domain.stack_size.unwrap_or(STACK_SIZE_DEFAULT),
        program_image: domain.program_image.clone(),
        mappings,
        irqs,
        symbols,
        virtual_machine,
    }
}

/// Priorities were range-checked already
fn clamp_priority(priority: u64) -> u8 {
    u8::try_from(priority).unwrap_or(u8::MAX)
}

fn channel_end(system: &ResolvedSystem, end: &ResolvedEnd) -> ChannelEnd {
    ChannelEnd {
        domain: system.domain(end.domain).name.clone(),
        id: end.id,
        notify: end.notify,
        symbol: end.setvar_id.clone(),
    }
}
