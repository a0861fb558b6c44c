// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node, interface and volume descriptions for one lab environment.

use crate::config::LabSettings;
use crate::error::Error;
use crate::net::Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const GIB: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_VOLUME_CAPACITY: u64 = 20 * GIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Admin,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    Hd,
    Cdrom,
    Network,
}

impl fmt::Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootDevice::Hd => write!(f, "hd"),
            BootDevice::Cdrom => write!(f, "cdrom"),
            BootDevice::Network => write!(f, "network"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevice {
    Disk,
    Cdrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    Virtio,
    Ide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFormat {
    Qcow2,
    Raw,
}

impl VolumeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeFormat::Qcow2 => "qcow2",
            VolumeFormat::Raw => "raw",
        }
    }
}

/// Capacity is in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub capacity: u64,
    pub format: VolumeFormat,
    pub device: DiskDevice,
    pub bus: DiskBus,
}

impl Volume {
    /// A blank 20 GiB qcow2 virtio disk.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: DEFAULT_VOLUME_CAPACITY,
            format: VolumeFormat::Qcow2,
            device: DiskDevice::Disk,
            bus: DiskBus::Virtio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub network: String,
    pub mac: String,
    pub address: Ipv4Addr,
    /// Host side device name, assigned when the environment is defined.
    #[serde(default)]
    pub target_dev: Option<String>,
}

/// Memory is in MiB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub role: NodeRole,
    pub memory: u64,
    pub vcpu: u32,
    pub boot: Vec<BootDevice>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Node {
    pub fn ip_address_by_network_name(
        &self,
        network: &str,
    ) -> Option<Ipv4Addr> {
        self.interfaces
            .iter()
            .find(|i| i.network == network)
            .map(|i| i.address)
    }

    pub fn volume_by_device(&self, device: DiskDevice) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.device == device)
    }
}

/// Names of the nodes that make up a lab, by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRoles {
    pub admin_names: Vec<String>,
    pub other_names: Vec<String>,
}

impl NodeRoles {
    /// One `admin` node plus `slave-01` .. `slave-<count>`.
    pub fn with_slaves(count: usize) -> Self {
        Self {
            admin_names: vec!["admin".into()],
            other_names: (1..=count).map(|i| format!("slave-{i:02}")).collect(),
        }
    }
}

impl Default for NodeRoles {
    fn default() -> Self {
        Self::with_slaves(9)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub networks: Vec<Network>,
    pub nodes: Vec<Node>,
}

impl Topology {
    /// Fail if any planned interface reuses a MAC from `in_use`.
    pub fn check_macs(&self, in_use: &[String]) -> Result<(), Error> {
        for node in &self.nodes {
            for iface in &node.interfaces {
                if in_use.iter().any(|m| m.eq_ignore_ascii_case(&iface.mac)) {
                    return Err(Error::Topology(format!(
                        "MAC {} of {} on {} is already in use",
                        iface.mac, node.name, iface.network
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Two byte tag identifying an environment in its interface MACs.
pub fn env_tag(env: &str) -> u16 {
    env.bytes().fold(0u16, |acc, b| {
        acc.wrapping_mul(31).wrapping_add(u16::from(b))
    })
}

/// Deterministic MAC for interface `net` of node `node` in environment
/// `env`, `52:54:<tag>:<node>:<net>`. Indices must fit in one octet.
pub fn mac_address(
    env: &str,
    node: usize,
    net: usize,
) -> Result<String, Error> {
    let octet = |what: &str, i: usize| {
        u8::try_from(i).map_err(|_| {
            Error::Topology(format!("{what} index {i} does not fit in a MAC"))
        })
    };
    let node = octet("node", node)?;
    let net = octet("network", net)?;
    let [t0, t1] = env_tag(env).to_be_bytes();
    Ok(format!("52:54:{t0:02x}:{t1:02x}:{node:02x}:{net:02x}"))
}

/// Builds the node descriptions for an environment from its planned
/// networks. Nothing here touches the virtualization manager.
pub struct TopologyBuilder<'a> {
    settings: &'a LabSettings,
    roles: &'a NodeRoles,
    iso_size: u64,
}

impl<'a> TopologyBuilder<'a> {
    /// `iso_size` is the byte size of the install media, used for the admin
    /// node's optical volume.
    pub fn new(
        settings: &'a LabSettings,
        roles: &'a NodeRoles,
        iso_size: u64,
    ) -> Self {
        Self {
            settings,
            roles,
            iso_size,
        }
    }

    pub fn build(&self, networks: Vec<Network>) -> Result<Topology, Error> {
        let mut nodes = Vec::new();
        for name in &self.roles.admin_names {
            let interfaces = self.interfaces(nodes.len(), &networks)?;
            nodes.push(self.admin_node(name, interfaces));
        }
        for name in &self.roles.other_names {
            let interfaces = self.interfaces(nodes.len(), &networks)?;
            nodes.push(self.empty_node(name, interfaces));
        }
        Ok(Topology { networks, nodes })
    }

    fn admin_node(&self, name: &str, interfaces: Vec<Interface>) -> Node {
        Node {
            name: name.into(),
            role: NodeRole::Admin,
            memory: self.settings.hardware.admin_node_memory,
            vcpu: self.settings.hardware.admin_node_cpu,
            boot: vec![BootDevice::Hd, BootDevice::Cdrom],
            interfaces,
            volumes: vec![
                Volume::empty(format!("{name}-system")),
                Volume {
                    name: format!("{name}-iso"),
                    capacity: self.iso_size,
                    format: VolumeFormat::Raw,
                    device: DiskDevice::Cdrom,
                    bus: DiskBus::Ide,
                },
            ],
        }
    }

    fn empty_node(&self, name: &str, interfaces: Vec<Interface>) -> Node {
        let mut volumes = vec![Volume::empty(format!("{name}-system"))];
        if self.settings.use_all_disks {
            volumes.push(Volume::empty(format!("{name}-cinder")));
            volumes.push(Volume::empty(format!("{name}-swift")));
        }
        Node {
            name: name.into(),
            role: NodeRole::Other,
            memory: self.settings.hardware.slave_node_memory,
            vcpu: self.settings.hardware.slave_node_cpu,
            boot: vec![BootDevice::Network, BootDevice::Hd],
            interfaces,
            volumes,
        }
    }

    // Node addresses start after the router at net[2].
    fn interfaces(
        &self,
        index: usize,
        networks: &[Network],
    ) -> Result<Vec<Interface>, Error> {
        networks
            .iter()
            .enumerate()
            .map(|(n, network)| {
                let address = u32::try_from(index + 2)
                    .ok()
                    .and_then(|i| network.host(i))
                    .ok_or_else(|| {
                        Error::Topology(format!(
                            "network {} ({}) has no address for node {index}",
                            network.name, network.ip_network,
                        ))
                    })?;
                Ok(Interface {
                    network: network.name.clone(),
                    mac: mac_address(&self.settings.env_name, index, n)?,
                    address,
                    target_dev: None,
                })
            })
            .collect()
    }
}
