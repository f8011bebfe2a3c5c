//! System description parser
//!
//! Turns SDF text (XML) into the unresolved [`SystemDecl`] tree. Only the
//! structure is checked here: element nesting, attribute names, required
//! attributes and literal syntax. Names are not looked up and no semantic
//! rule is enforced; the first problem aborts the parse.
//!
//! roxmltree is used instead of a serde-based reader because it exposes the
//! source position of every node, which every diagnostic needs.

use super::ast::{
    ChannelDecl, DomainDecl, EndDecl, IrqDecl, MapDecl, Perms, RegionDecl, SourceLoc, SystemDecl,
    Trigger, VcpuDecl, VmDecl,
};
use super::error::SdfError;
use roxmltree::{Document, Node};

type Result<T> = std::result::Result<T, SdfError>;

/// Parse a system description
pub fn parse(source: &str) -> Result<SystemDecl> {
    let doc = Document::parse(source).map_err(|err| {
        let pos = err.pos();
        SdfError::Syntax {
            loc: SourceLoc::new(pos.row, pos.col),
            message: format!("malformed XML: {}", err),
        }
    })?;

    let xml = XmlSdf { doc: &doc };
    let system = doc.root_element();
    if system.tag_name().name() != "system" {
        return Err(xml.error(
            &system,
            format!(
                "root element must be 'system', found '{}'",
                system.tag_name().name()
            ),
        ));
    }
    xml.check_attributes(&system, &[])?;

    let mut decl = SystemDecl::default();

    for child in xml.elements(&system)? {
        match child.tag_name().name() {
            "memory_region" => decl.regions.push(xml.memory_region(&child)?),
            "protection_domain" => decl.domains.push(xml.protection_domain(&child)?),
            "channel" => decl.channels.push(xml.channel(&child)?),
            "virtual_machine" => {
                return Err(xml.error(
                    &child,
                    "virtual machine must be a child of a protection domain".to_string(),
                ))
            }
            other => {
                return Err(xml.error(&child, format!("invalid element '{}'", other)));
            }
        }
    }

    log::debug!(
        "parsed {} region(s), {} domain(s), {} channel(s)",
        decl.regions.len(),
        decl.domains.len(),
        decl.channels.len()
    );

    Ok(decl)
}

/// Parse a number in decimal or `0x` hex, ignoring `_` separators
pub fn parse_number(s: &str) -> Option<u64> {
    let mut digits = s.trim().to_string();
    digits.retain(|c| c != '_');

    let (digits, radix) = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => (hex.to_string(), 16),
        None => (digits.clone(), 10),
    };

    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(&digits, radix).ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

struct XmlSdf<'a, 'input> {
    doc: &'a Document<'input>,
}

impl<'a, 'input> XmlSdf<'a, 'input> {
    fn loc(&self, node: &Node) -> SourceLoc {
        let pos = self.doc.text_pos_at(node.range().start);
        SourceLoc::new(pos.row, pos.col)
    }

    fn error(&self, node: &Node, message: String) -> SdfError {
        SdfError::Syntax {
            loc: self.loc(node),
            message: format!("{} on element '{}'", message, node.tag_name().name()),
        }
    }

    /// Element children of `node`; any non-whitespace text is rejected
    fn elements(&self, node: &Node<'a, 'input>) -> Result<Vec<Node<'a, 'input>>> {
        let mut elements = Vec::new();
        for child in node.children() {
            if child.is_element() {
                elements.push(child);
            } else if child.is_text() {
                if let Some(text) = child.text() {
                    if !text.trim().is_empty() {
                        return Err(SdfError::Syntax {
                            loc: self.loc(&child),
                            message: format!(
                                "unexpected text '{}' inside element '{}'",
                                text.trim(),
                                node.tag_name().name()
                            ),
                        });
                    }
                }
            }
        }
        Ok(elements)
    }

    fn check_attributes(&self, node: &Node, allowed: &[&str]) -> Result<()> {
        for attribute in node.attributes() {
            if !allowed.contains(&attribute.name()) {
                return Err(self.error(node, format!("invalid attribute '{}'", attribute.name())));
            }
        }
        Ok(())
    }

    fn required(&self, node: &Node<'a, 'input>, attribute: &str) -> Result<&'a str> {
        node.attribute(attribute).ok_or_else(|| {
            self.error(node, format!("missing required attribute '{}'", attribute))
        })
    }

    fn number(&self, node: &Node, attribute: &str, value: &str) -> Result<u64> {
        parse_number(value).ok_or_else(|| {
            self.error(
                node,
                format!("failed to parse integer '{}' for attribute '{}'", value, attribute),
            )
        })
    }

    fn required_number(&self, node: &Node<'a, 'input>, attribute: &str) -> Result<u64> {
        let value = self.required(node, attribute)?;
        self.number(node, attribute, value)
    }

    fn optional_number(&self, node: &Node, attribute: &str) -> Result<Option<u64>> {
        node.attribute(attribute)
            .map(|value| self.number(node, attribute, value))
            .transpose()
    }

    fn boolean(&self, node: &Node, attribute: &str, default: bool) -> Result<bool> {
        match node.attribute(attribute) {
            Some(value) => parse_bool(value).ok_or_else(|| {
                self.error(node, format!("{} must be 'true' or 'false'", attribute))
            }),
            None => Ok(default),
        }
    }

    fn optional_string(&self, node: &Node, attribute: &str) -> Option<String> {
        node.attribute(attribute).map(ToOwned::to_owned)
    }

    fn memory_region(&self, node: &Node<'a, 'input>) -> Result<RegionDecl> {
        self.check_attributes(node, &["name", "size", "phys_addr", "page_size"])?;
        self.no_children(node)?;

        Ok(RegionDecl {
            name: self.required(node, "name")?.to_string(),
            size: self.required_number(node, "size")?,
            phys_addr: self.optional_number(node, "phys_addr")?,
            page_size: self.optional_number(node, "page_size")?,
            loc: self.loc(node),
        })
    }

    fn map(&self, node: &Node<'a, 'input>, allow_setvar: bool) -> Result<MapDecl> {
        let mut attrs = vec!["mr", "vaddr", "perms", "cached"];
        if allow_setvar {
            attrs.push("setvar_vaddr");
        }
        self.check_attributes(node, &attrs)?;
        self.no_children(node)?;

        let perms = match node.attribute("perms") {
            Some(value) => Perms::parse(value).ok_or_else(|| {
                self.error(
                    node,
                    "perms must only be a combination of 'r', 'w', and 'x'".to_string(),
                )
            })?,
            // Default to read-write
            None => Perms::RW,
        };

        Ok(MapDecl {
            mr: self.required(node, "mr")?.to_string(),
            vaddr: self.required_number(node, "vaddr")?,
            perms,
            cached: self.boolean(node, "cached", true)?,
            setvar_vaddr: self.optional_string(node, "setvar_vaddr"),
            loc: self.loc(node),
        })
    }

    fn irq(&self, node: &Node<'a, 'input>) -> Result<IrqDecl> {
        self.check_attributes(node, &["irq", "id", "trigger", "setvar_id"])?;
        self.no_children(node)?;

        let trigger = match node.attribute("trigger") {
            Some("level") | None => Trigger::Level,
            Some("edge") => Trigger::Edge,
            Some(_) => {
                return Err(self.error(
                    node,
                    "trigger must be either 'level' or 'edge'".to_string(),
                ))
            }
        };

        Ok(IrqDecl {
            irq: self.required_number(node, "irq")?,
            id: self.required_number(node, "id")?,
            trigger,
            setvar_id: self.optional_string(node, "setvar_id"),
            loc: self.loc(node),
        })
    }

    fn protection_domain(&self, node: &Node<'a, 'input>) -> Result<DomainDecl> {
        self.check_attributes(
            node,
            &["name", "priority", "budget", "period", "passive", "pp", "stack_size"],
        )?;

        let mut domain = DomainDecl {
            name: self.required(node, "name")?.to_string(),
            priority: self.required_number(node, "priority")?,
            budget: self.optional_number(node, "budget")?,
            period: self.optional_number(node, "period")?,
            passive: self.boolean(node, "passive", false)?,
            pp: self.boolean(node, "pp", false)?,
            stack_size: self.optional_number(node, "stack_size")?,
            program_image: None,
            maps: Vec::new(),
            irqs: Vec::new(),
            virtual_machine: None,
            loc: self.loc(node),
        };

        for child in self.elements(node)? {
            match child.tag_name().name() {
                "program_image" => {
                    self.check_attributes(&child, &["path"])?;
                    self.no_children(&child)?;
                    if domain.program_image.is_some() {
                        return Err(self.error(
                            &child,
                            "program_image must only be specified once".to_string(),
                        ));
                    }
                    domain.program_image = Some(self.required(&child, "path")?.to_string());
                }
                "map" => domain.maps.push(self.map(&child, true)?),
                "irq" => domain.irqs.push(self.irq(&child)?),
                "virtual_machine" => {
                    if domain.virtual_machine.is_some() {
                        return Err(self.error(
                            &child,
                            "virtual_machine must only be specified once".to_string(),
                        ));
                    }
                    domain.virtual_machine = Some(self.virtual_machine(&child)?);
                }
                other => {
                    return Err(self.error(&child, format!("invalid element '{}'", other)));
                }
            }
        }

        Ok(domain)
    }

    fn virtual_machine(&self, node: &Node<'a, 'input>) -> Result<VmDecl> {
        self.check_attributes(node, &["name", "id", "priority", "budget", "period"])?;

        let mut vm = VmDecl {
            name: self.required(node, "name")?.to_string(),
            id: self.required_number(node, "id")?,
            priority: self.optional_number(node, "priority")?,
            budget: self.optional_number(node, "budget")?,
            period: self.optional_number(node, "period")?,
            vcpus: Vec::new(),
            maps: Vec::new(),
            loc: self.loc(node),
        };

        for child in self.elements(node)? {
            match child.tag_name().name() {
                "vcpu" => {
                    self.check_attributes(&child, &["id"])?;
                    self.no_children(&child)?;
                    vm.vcpus.push(VcpuDecl {
                        id: self.required_number(&child, "id")?,
                        loc: self.loc(&child),
                    });
                }
                // Guests have no program image to patch, so no setvar_vaddr
                "map" => vm.maps.push(self.map(&child, false)?),
                other => {
                    return Err(self.error(&child, format!("invalid element '{}'", other)));
                }
            }
        }

        if vm.vcpus.is_empty() {
            return Err(self.error(node, format!("missing 'vcpu' element in '{}'", vm.name)));
        }

        Ok(vm)
    }

    fn channel(&self, node: &Node<'a, 'input>) -> Result<ChannelDecl> {
        self.check_attributes(node, &[])?;

        let mut ends = Vec::with_capacity(2);
        for child in self.elements(node)? {
            if child.tag_name().name() != "end" {
                return Err(self.error(
                    &child,
                    format!("invalid element '{}'", child.tag_name().name()),
                ));
            }
            ends.push(self.channel_end(&child)?);
        }

        let ends: [EndDecl; 2] = ends.try_into().map_err(|_| {
            self.error(node, "exactly two end elements must be specified".to_string())
        })?;

        Ok(ChannelDecl {
            ends,
            loc: self.loc(node),
        })
    }

    fn channel_end(&self, node: &Node<'a, 'input>) -> Result<EndDecl> {
        self.check_attributes(node, &["pd", "id", "pp", "notify", "setvar_id"])?;
        self.no_children(node)?;

        Ok(EndDecl {
            pd: self.required(node, "pd")?.to_string(),
            id: self.required_number(node, "id")?,
            pp: self.boolean(node, "pp", false)?,
            notify: self.boolean(node, "notify", true)?,
            setvar_id: self.optional_string(node, "setvar_id"),
            loc: self.loc(node),
        })
    }

    fn no_children(&self, node: &Node<'a, 'input>) -> Result<()> {
        if let Some(child) = self.elements(node)?.first() {
            return Err(self.error(
                child,
                format!("unexpected child of '{}'", node.tag_name().name()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_PONG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<system>
    <memory_region name="buf_a" size="0x1000" />
    <memory_region name="buf_b" size="0x1_000" phys_addr="0x4000_0000" page_size="0x1000" />

    <!-- client -->
    <protection_domain name="ping" priority="42" budget="300" period="1000">
        <program_image path="ping.elf" />
        <map mr="buf_a" vaddr="0x2000000" perms="rw" setvar_vaddr="buf_a_vaddr" />
        <irq irq="33" id="5" trigger="edge" />
    </protection_domain>

    <protection_domain name="pong" priority="42" passive="true" pp="true">
        <map mr="buf_b" vaddr="0x2000000" perms="r" cached="false" />
    </protection_domain>

    <channel>
        <end pd="ping" id="0" pp="true" />
        <end pd="pong" id="0" notify="false" />
    </channel>
</system>
"#;

    fn syntax_message(source: &str) -> String {
        match parse(source) {
            Err(SdfError::Syntax { message, .. }) => message,
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ping_pong() {
        let system = parse(PING_PONG).unwrap();

        assert_eq!(system.regions.len(), 2);
        assert_eq!(system.regions[0].size, 0x1000);
        assert_eq!(system.regions[0].page_size, None);
        assert_eq!(system.regions[1].phys_addr, Some(0x4000_0000));
        assert_eq!(system.regions[1].page_size, Some(0x1000));

        let ping = &system.domains[0];
        assert_eq!(ping.name, "ping");
        assert_eq!(ping.priority, 42);
        assert_eq!(ping.budget, Some(300));
        assert_eq!(ping.period, Some(1000));
        assert!(!ping.passive);
        assert_eq!(ping.program_image.as_deref(), Some("ping.elf"));
        assert_eq!(ping.maps[0].mr, "buf_a");
        assert_eq!(ping.maps[0].perms, Perms::RW);
        assert!(ping.maps[0].cached);
        assert_eq!(ping.maps[0].setvar_vaddr.as_deref(), Some("buf_a_vaddr"));
        assert_eq!(ping.irqs[0].irq, 33);
        assert_eq!(ping.irqs[0].trigger, Trigger::Edge);

        let pong = &system.domains[1];
        assert!(pong.passive);
        assert!(pong.pp);
        assert!(!pong.maps[0].cached);
        assert_eq!(pong.maps[0].perms.to_string(), "r");

        let channel = &system.channels[0];
        assert!(channel.ends[0].pp);
        assert!(channel.ends[0].notify);
        assert!(!channel.ends[1].notify);
    }

    #[test]
    fn test_locations_are_recorded() {
        let system = parse(PING_PONG).unwrap();
        assert_eq!(system.regions[0].loc, SourceLoc::new(3, 5));
        assert_eq!(system.domains[0].loc.line, 7);
        assert_eq!(system.domains[0].maps[0].loc.line, 9);
    }

    #[test]
    fn test_parse_number_formats() {
        assert_eq!(parse_number("4096"), Some(4096));
        assert_eq!(parse_number("0x1000"), Some(0x1000));
        assert_eq!(parse_number("0x3_000_000"), Some(0x3000000));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("12ab"), None);
        assert_eq!(parse_number("-1"), None);
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse("<system><memory_region name=\"a\"</system>").unwrap_err();
        match err {
            SdfError::Syntax { loc, message } => {
                assert_eq!(loc.line, 1);
                assert!(message.starts_with("malformed XML"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wrong_root() {
        let message = syntax_message("<sys></sys>");
        assert!(message.contains("root element must be 'system'"));
    }

    #[test]
    fn test_unknown_attribute_and_element() {
        let message = syntax_message(
            r#"<system><memory_region name="a" size="0x1000" colour="red" /></system>"#,
        );
        assert!(message.contains("invalid attribute 'colour'"));

        let message = syntax_message(r#"<system><thread name="a" /></system>"#);
        assert!(message.contains("invalid element 'thread'"));
    }

    #[test]
    fn test_missing_required_attribute() {
        let message = syntax_message(r#"<system><protection_domain name="a" /></system>"#);
        assert!(message.contains("missing required attribute 'priority'"));
    }

    #[test]
    fn test_bad_literals() {
        let message = syntax_message(r#"<system><memory_region name="a" size="big" /></system>"#);
        assert!(message.contains("failed to parse integer 'big'"));

        let message = syntax_message(
            r#"<system><protection_domain name="a" priority="1" passive="yes" /></system>"#,
        );
        assert!(message.contains("passive must be 'true' or 'false'"));

        let message = syntax_message(
            r#"<system><protection_domain name="a" priority="1"><map mr="m" vaddr="0x1000" perms="rwz" /></protection_domain></system>"#,
        );
        assert!(message.contains("perms must only be a combination"));
    }

    #[test]
    fn test_stray_text_rejected() {
        let message = syntax_message(r#"<system>hello<memory_region name="a" size="1" /></system>"#);
        assert!(message.contains("unexpected text 'hello'"));
    }

    #[test]
    fn test_channel_needs_two_ends() {
        let message = syntax_message(
            r#"<system><channel><end pd="a" id="0" /></channel></system>"#,
        );
        assert!(message.contains("exactly two end elements"));
    }

    #[test]
    fn test_virtual_machine_placement() {
        let message = syntax_message(
            r#"<system><virtual_machine name="vm" id="0"><vcpu id="0" /></virtual_machine></system>"#,
        );
        assert!(message.contains("must be a child of a protection domain"));

        let message = syntax_message(
            r#"<system><protection_domain name="vmm" priority="1"><virtual_machine name="vm" id="0" /></protection_domain></system>"#,
        );
        assert!(message.contains("missing 'vcpu' element"));
    }

    #[test]
    fn test_virtual_machine_maps_have_no_setvar() {
        let message = syntax_message(
            r#"<system><protection_domain name="vmm" priority="1">
                <virtual_machine name="vm" id="1">
                    <vcpu id="0" />
                    <map mr="ram" vaddr="0x40000000" setvar_vaddr="guest" />
                </virtual_machine>
            </protection_domain></system>"#,
        );
        assert!(message.contains("invalid attribute 'setvar_vaddr'"));
    }

    #[test]
    fn test_single_program_image() {
        let message = syntax_message(
            r#"<system><protection_domain name="a" priority="1">
                <program_image path="a.elf" />
                <program_image path="b.elf" />
            </protection_domain></system>"#,
        );
        assert!(message.contains("program_image must only be specified once"));
    }
}
