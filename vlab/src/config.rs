// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POOL: &str = "10.108.0.0/16";
pub const DEFAULT_POOL_PREFIX: u8 = 24;

/// How a virtual network reaches the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    Nat,
    Route,
}

impl ForwardMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardMode::Nat => "nat",
            ForwardMode::Route => "route",
        }
    }
}

/// Candidate address ranges for one network and the prefix length of the
/// subnet carved out of them. `networks` is a comma separated CIDR list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolConfig {
    pub networks: String,
    pub prefix: u8,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            networks: DEFAULT_POOL.into(),
            prefix: DEFAULT_POOL_PREFIX,
        }
    }
}

/// Memory is in MiB.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Hardware {
    pub admin_node_memory: u64,
    pub admin_node_cpu: u32,
    pub slave_node_memory: u64,
    pub slave_node_cpu: u32,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            admin_node_memory: 1024,
            admin_node_cpu: 1,
            slave_node_memory: 1024,
            slave_node_cpu: 1,
        }
    }
}

/// Everything a lab session needs to know about the environment it drives.
/// Timeouts and intervals are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LabSettings {
    pub env_name: String,
    pub iso_path: PathBuf,
    pub state_dir: PathBuf,
    pub libvirt_uri: String,
    pub nailgun_port: u16,
    pub interface_order: Vec<String>,
    pub pools: BTreeMap<String, PoolConfig>,
    pub forwarding: BTreeMap<String, ForwardMode>,
    pub dhcp: BTreeMap<String, bool>,
    /// Guest interface name per network, `admin` doubles as the NAT
    /// interface handed to the installer.
    pub interfaces: BTreeMap<String, String>,
    pub hardware: Hardware,
    pub use_all_disks: bool,
    pub slave_count: usize,
    pub dns: String,
    pub hostname: String,
    pub domain: String,
    pub admin_net: String,
    pub root_login: String,
    pub root_password: String,
    pub admin_node_setup_timeout: u64,
    pub admin_boot_timeout: u64,
    pub admin_boot_poll_interval: u64,
    pub puppet_timeout: u64,
    pub bootstrap_poll_interval: u64,
    pub post_bootstrap_settle: u64,
    pub node_poll_interval: u64,
}

impl Default for LabSettings {
    fn default() -> Self {
        let interface_order: Vec<String> =
            ["admin", "public", "management", "private", "storage"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        let pools = interface_order
            .iter()
            .map(|name| (name.clone(), PoolConfig::default()))
            .collect();
        let forwarding = [
            ("admin".to_string(), ForwardMode::Nat),
            ("public".to_string(), ForwardMode::Nat),
        ]
        .into_iter()
        .collect();
        let dhcp = interface_order
            .iter()
            .map(|name| (name.clone(), false))
            .collect();
        let interfaces = interface_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), format!("eth{i}")))
            .collect();

        Self {
            env_name: "fuel_system_test".into(),
            iso_path: PathBuf::from("fuel.iso"),
            state_dir: PathBuf::from(".vlab"),
            libvirt_uri: "qemu:///system".into(),
            nailgun_port: 8000,
            interface_order,
            pools,
            forwarding,
            dhcp,
            interfaces,
            hardware: Hardware::default(),
            use_all_disks: true,
            slave_count: 9,
            dns: "8.8.8.8".into(),
            hostname: "nailgun".into(),
            domain: "test.domain.local".into(),
            admin_net: "admin".into(),
            root_login: "root".into(),
            root_password: "r00tme".into(),
            admin_node_setup_timeout: 30,
            admin_boot_timeout: 10 * 60,
            admin_boot_poll_interval: 5,
            puppet_timeout: 1000,
            bootstrap_poll_interval: 5,
            post_bootstrap_settle: 10,
            node_poll_interval: 15,
        }
    }
}

impl LabSettings {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let f = File::open(path)?;
        serde_json::from_reader(BufReader::new(f)).map_err(|e| {
            Error::Settings(format!("parse {}: {e}", path.display()))
        })
    }

    pub fn pool(&self, network: &str) -> Result<&PoolConfig, Error> {
        self.pools.get(network).ok_or_else(|| Error::Pool {
            network: network.into(),
            reason: "no pool configured".into(),
        })
    }

    pub fn forward(&self, network: &str) -> Option<ForwardMode> {
        self.forwarding.get(network).copied()
    }

    pub fn has_dhcp_server(&self, network: &str) -> bool {
        self.dhcp.get(network).copied().unwrap_or(false)
    }

    pub fn nat_interface(&self) -> Result<&str, Error> {
        self.interfaces
            .get(&self.admin_net)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::Settings(format!(
                    "no guest interface configured for {}",
                    self.admin_net
                ))
            })
    }

    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.hostname, self.domain)
    }

    pub fn admin_node_setup_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_node_setup_timeout)
    }

    pub fn admin_boot_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_boot_timeout)
    }

    pub fn admin_boot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.admin_boot_poll_interval)
    }

    pub fn puppet_timeout(&self) -> Duration {
        Duration::from_secs(self.puppet_timeout)
    }

    pub fn bootstrap_poll_interval(&self) -> Duration {
        Duration::from_secs(self.bootstrap_poll_interval)
    }

    pub fn post_bootstrap_settle(&self) -> Duration {
        Duration::from_secs(self.post_bootstrap_settle)
    }

    pub fn node_poll_interval(&self) -> Duration {
        Duration::from_secs(self.node_poll_interval)
    }
}
