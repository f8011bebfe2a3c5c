//! SDF emitter
//!
//! Writes a validated model back out as a system description. Every value
//! the builder derived (page sizes, budgets) is written explicitly, so the
//! emitted text validates to the same model it came from.

use super::check::STACK_SIZE_DEFAULT;
use super::model::{
    CacheAttr, ChannelEnd, DomainModel, IrqModel, MappingModel, RegionModel, SystemModel,
    Transport, VirtualMachineModel,
};

const INDENT: &str = "    ";

/// Escape a string for use inside a double-quoted attribute
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Attribute value normalisation would turn these into spaces
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    out
}

/// Element under construction
struct Element {
    tag: &'static str,
    attrs: Vec<(&'static str, String)>,
    children: Vec<Element>,
}

impl Element {
    fn new(tag: &'static str) -> Self {
        Self {
            tag,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    fn attr(mut self, name: &'static str, value: impl ToString) -> Self {
        self.attrs.push((name, value.to_string()));
        self
    }

    fn hex(self, name: &'static str, value: u64) -> Self {
        self.attr(name, format!("0x{:x}", value))
    }

    fn attr_opt(self, name: &'static str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    fn flag(self, name: &'static str, value: bool, default: bool) -> Self {
        if value == default {
            self
        } else {
            self.attr(name, value)
        }
    }

    fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    fn write(&self, out: &mut String, depth: usize) {
        out.push_str(&INDENT.repeat(depth));
        out.push('<');
        out.push_str(self.tag);
        for (name, value) in &self.attrs {
            out.push_str(&format!(" {}=\"{}\"", name, escape(value)));
        }

        if self.children.is_empty() {
            out.push_str(" />\n");
            return;
        }

        out.push_str(">\n");
        for child in &self.children {
            child.write(out, depth + 1);
        }
        out.push_str(&INDENT.repeat(depth));
        out.push_str(&format!("</{}>\n", self.tag));
    }
}

fn region(region: &RegionModel) -> Element {
    let element = Element::new("memory_region")
        .attr("name", &region.name)
        .hex("size", region.size)
        .hex("page_size", region.page_size);
    match region.phys_addr {
        Some(addr) => element.hex("phys_addr", addr),
        None => element,
    }
}

fn map(mapping: &MappingModel) -> Element {
    Element::new("map")
        .attr("mr", &mapping.region)
        .hex("vaddr", mapping.vaddr)
        .attr("perms", mapping.perms)
        .flag("cached", mapping.cache == CacheAttr::Cached, true)
        .attr_opt("setvar_vaddr", mapping.symbol.as_deref())
}

fn irq(irq: &IrqModel) -> Element {
    Element::new("irq")
        .attr("irq", irq.irq)
        .attr("id", irq.id)
        .attr("trigger", irq.trigger)
        .attr_opt("setvar_id", irq.symbol.as_deref())
}

fn virtual_machine(vm: &VirtualMachineModel) -> Element {
    let mut element = Element::new("virtual_machine")
        .attr("name", &vm.name)
        .attr("id", vm.id)
        .attr("priority", vm.priority)
        .attr("budget", vm.budget)
        .attr("period", vm.period);
    for vcpu in &vm.vcpus {
        element = element.child(Element::new("vcpu").attr("id", vcpu));
    }
    for mapping in &vm.mappings {
        element = element.child(map(mapping));
    }
    element
}

fn domain(name: &str, domain: &DomainModel) -> Element {
    let mut element = Element::new("protection_domain")
        .attr("name", name)
        .attr("priority", domain.priority);

    // A passive domain only owns a budget when it serves calls
    if !domain.passive || domain.pp {
        element = element
            .attr("budget", domain.budget)
            .attr("period", domain.period);
    }

    element = element
        .flag("passive", domain.passive, false)
        .flag("pp", domain.pp, false);

    if domain.stack_size != STACK_SIZE_DEFAULT {
        element = element.hex("stack_size", domain.stack_size);
    }

    if let Some(path) = &domain.program_image {
        element = element.child(Element::new("program_image").attr("path", path));
    }
    for mapping in &domain.mappings {
        element = element.child(map(mapping));
    }
    for entry in &domain.irqs {
        element = element.child(irq(entry));
    }
    if let Some(vm) = &domain.virtual_machine {
        element = element.child(virtual_machine(vm));
    }
    element
}

fn end(end: &ChannelEnd, pp: bool) -> Element {
    Element::new("end")
        .attr("pd", &end.domain)
        .attr("id", end.id)
        .flag("pp", pp, false)
        .flag("notify", end.notify, true)
        .attr_opt("setvar_id", end.symbol.as_deref())
}

fn channel(transport: &Transport) -> Element {
    let (a, b) = match transport {
        Transport::Notification { a, b } => (end(a, false), end(b, false)),
        Transport::ProtectedCall { client, server } => (end(client, true), end(server, false)),
    };
    Element::new("channel").child(a).child(b)
}

/// Render `model` as SDF text
pub fn to_sdf(model: &SystemModel) -> String {
    let mut system = Element::new("system");
    for entry in model.regions() {
        system = system.child(region(entry));
    }
    for (name, entry) in model.domains() {
        system = system.child(domain(name, entry));
    }
    for transport in model.channels() {
        system = system.child(channel(transport));
    }

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    system.write(&mut out, 0);
    out
}
