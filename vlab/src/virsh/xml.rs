// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Libvirt network and domain definitions.

use super::libvirt_name;
use crate::net::Network;
use crate::topology::{DiskBus, DiskDevice, Interface, Node, Volume};
use oxnet::Ipv4Net;
use std::fmt::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

/// Host side tap device for an interface, built from every octet after the
/// fixed `52:54` prefix so distinct MACs give distinct devices.
pub fn target_dev(mac: &str) -> String {
    let tail: String = mac
        .split(':')
        .skip(2)
        .collect::<Vec<_>>()
        .concat()
        .to_lowercase();
    format!("vl{tail}")
}

/// Network definition for `network`. With DHCP on, each interface on the
/// network gets a fixed `<host>` lease and the dynamic range starts past the
/// highest of them.
pub fn network_xml(env: &str, network: &Network, nodes: &[Node]) -> String {
    let mut xml = String::new();
    let _ = writeln!(xml, "<network>");
    let _ = writeln!(
        xml,
        "  <name>{}</name>",
        escape(&libvirt_name(env, &network.name))
    );
    if let Some(mode) = network.forward {
        let _ = writeln!(xml, "  <forward mode='{}'/>", mode.as_str());
    }
    let _ = writeln!(
        xml,
        "  <ip address='{}' netmask='{}'>",
        network.router(),
        network.netmask()
    );
    if network.has_dhcp_server {
        let reserved: Vec<&Interface> = nodes
            .iter()
            .flat_map(|n| &n.interfaces)
            .filter(|i| i.network == network.name)
            .collect();
        let highest = reserved.iter().map(|i| u32::from(i.address)).max();
        let first_free = match highest {
            Some(highest) => highest.checked_add(1).map(Ipv4Addr::from),
            None => network.host(2),
        };
        let _ = writeln!(xml, "    <dhcp>");
        if let (Some(start), Some(end)) = (first_free, network.last_host()) {
            if start <= end {
                let _ = writeln!(
                    xml,
                    "      <range start='{start}' end='{end}'/>"
                );
            }
        }
        for interface in reserved {
            let _ = writeln!(
                xml,
                "      <host mac='{}' ip='{}'/>",
                escape(&interface.mac),
                interface.address
            );
        }
        let _ = writeln!(xml, "    </dhcp>");
    }
    let _ = writeln!(xml, "  </ip>");
    let _ = writeln!(xml, "</network>");
    xml
}

/// A node volume together with the image file backing it.
pub struct Disk<'a> {
    pub volume: &'a Volume,
    pub path: PathBuf,
}

fn disk_target(bus: DiskBus, index: usize) -> String {
    let prefix = match bus {
        DiskBus::Virtio => "vd",
        DiskBus::Ide => "hd",
    };
    let letter = (b'a' + (index % 26) as u8) as char;
    format!("{prefix}{letter}")
}

pub fn domain_xml(env: &str, node: &Node, disks: &[Disk<'_>]) -> String {
    let mut xml = String::new();
    let _ = writeln!(xml, "<domain type='kvm'>");
    let _ = writeln!(
        xml,
        "  <name>{}</name>",
        escape(&libvirt_name(env, &node.name))
    );
    let _ = writeln!(xml, "  <memory unit='MiB'>{}</memory>", node.memory);
    let _ = writeln!(xml, "  <vcpu>{}</vcpu>", node.vcpu);
    let _ = writeln!(xml, "  <os>");
    let _ = writeln!(xml, "    <type arch='x86_64'>hvm</type>");
    for dev in &node.boot {
        let _ = writeln!(xml, "    <boot dev='{dev}'/>");
    }
    let _ = writeln!(xml, "  </os>");
    let _ = writeln!(xml, "  <features><acpi/><apic/></features>");
    let _ = writeln!(xml, "  <devices>");

    let (mut virtio, mut ide) = (0, 0);
    for disk in disks {
        let index = match disk.volume.bus {
            DiskBus::Virtio => &mut virtio,
            DiskBus::Ide => &mut ide,
        };
        let target = disk_target(disk.volume.bus, *index);
        *index += 1;
        let device = match disk.volume.device {
            DiskDevice::Disk => "disk",
            DiskDevice::Cdrom => "cdrom",
        };
        let bus = match disk.volume.bus {
            DiskBus::Virtio => "virtio",
            DiskBus::Ide => "ide",
        };
        let _ = writeln!(xml, "    <disk type='file' device='{device}'>");
        let _ = writeln!(
            xml,
            "      <driver name='qemu' type='{}'/>",
            disk.volume.format.as_str()
        );
        let _ = writeln!(
            xml,
            "      <source file='{}'/>",
            escape(&disk.path.display().to_string())
        );
        let _ = writeln!(xml, "      <target dev='{target}' bus='{bus}'/>");
        if disk.volume.device == DiskDevice::Cdrom {
            let _ = writeln!(xml, "      <readonly/>");
        }
        let _ = writeln!(xml, "    </disk>");
    }

    for iface in &node.interfaces {
        let _ = writeln!(xml, "    <interface type='network'>");
        let _ = writeln!(xml, "      <mac address='{}'/>", iface.mac);
        let _ = writeln!(
            xml,
            "      <source network='{}'/>",
            escape(&libvirt_name(env, &iface.network))
        );
        if let Some(dev) = &iface.target_dev {
            let _ = writeln!(xml, "      <target dev='{}'/>", escape(dev));
        }
        let _ = writeln!(xml, "      <model type='virtio'/>");
        let _ = writeln!(xml, "    </interface>");
    }

    let _ = writeln!(xml, "    <serial type='pty'/>");
    let _ = writeln!(
        xml,
        "    <graphics type='vnc' listen='0.0.0.0' autoport='yes'/>"
    );
    let _ = writeln!(xml, "  </devices>");
    let _ = writeln!(xml, "</domain>");
    xml
}

fn attribute<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let start = element.find(&format!("{name}="))? + name.len() + 1;
    let quote = element[start..].chars().next()?;
    let value = &element[start + 1..];
    let end = value.find(quote)?;
    Some(&value[..end])
}

/// Address ranges of the `<ip>` elements in a dumped network definition.
pub fn network_ranges(xml: &str) -> Vec<Ipv4Net> {
    let mut ranges = Vec::new();
    for chunk in xml.split("<ip ").skip(1) {
        let element = chunk.split('>').next().unwrap_or_default();
        let Some(addr) = attribute(element, "address")
            .and_then(|a| a.parse::<Ipv4Addr>().ok())
        else {
            continue;
        };
        let prefix = attribute(element, "prefix");
        let width = match (prefix, attribute(element, "netmask")) {
            (Some(prefix), _) => prefix.parse::<u8>().ok(),
            (None, Some(mask)) => mask
                .parse::<Ipv4Addr>()
                .ok()
                .map(|m| u32::from(m).count_ones() as u8),
            (None, None) => None,
        };
        let Some(net) = width.and_then(|w| Ipv4Net::new(addr, w).ok()) else {
            continue;
        };
        let base = u32::from(addr) & crate::net::mask_bits(net.width());
        if let Ok(net) = Ipv4Net::new(Ipv4Addr::from(base), net.width()) {
            ranges.push(net);
        }
    }
    ranges
}

/// MAC column of `virsh domiflist` output.
pub fn domiflist_macs(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|l| l.split_whitespace().last())
        .map(str::to_lowercase)
        .collect()
}
