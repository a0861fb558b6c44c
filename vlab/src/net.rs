// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network pools and per-network subnet allocation.

use crate::config::{ForwardMode, LabSettings, PoolConfig};
use crate::error::Error;
use oxnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Longest prefix a pool may hand out. Anything narrower leaves no room for
/// a router plus hosts.
pub const MAX_POOL_PREFIX: u8 = 30;

pub fn mask_bits(width: u8) -> u32 {
    match width {
        0 => 0,
        w => u32::MAX << (32 - u32::from(w.min(32))),
    }
}

pub fn netmask(width: u8) -> Ipv4Addr {
    Ipv4Addr::from(mask_bits(width))
}

fn base(net: &Ipv4Net) -> u32 {
    u32::from(net.addr()) & mask_bits(net.width())
}

pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    let mask = mask_bits(a.width().min(b.width()));
    base(a) & mask == base(b) & mask
}

/// A set of candidate address ranges and the prefix length of the subnets
/// carved out of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPool {
    ranges: Vec<Ipv4Net>,
    prefix: u8,
}

impl NetworkPool {
    pub fn new(ranges: Vec<Ipv4Net>, prefix: u8) -> Result<Self, String> {
        if ranges.is_empty() {
            return Err("no candidate ranges".into());
        }
        if prefix > MAX_POOL_PREFIX {
            return Err(format!(
                "prefix /{prefix} is longer than /{MAX_POOL_PREFIX}"
            ));
        }
        if let Some(r) = ranges.iter().find(|r| r.width() > prefix) {
            return Err(format!("range {r} is narrower than prefix /{prefix}"));
        }
        Ok(Self { ranges, prefix })
    }

    pub fn parse(network: &str, cfg: &PoolConfig) -> Result<Self, Error> {
        let pool_err = |reason: String| Error::Pool {
            network: network.into(),
            reason,
        };
        let ranges = cfg
            .networks
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<Ipv4Net>()
                    .map_err(|e| pool_err(format!("bad range {s}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ranges, cfg.prefix).map_err(pool_err)
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn ranges(&self) -> &[Ipv4Net] {
        &self.ranges
    }

    /// Every subnet of the pool prefix, in range order.
    pub fn subnets(&self) -> impl Iterator<Item = Ipv4Net> + '_ {
        let prefix = self.prefix;
        let step = 1u64 << (32 - u32::from(prefix));
        self.ranges.iter().flat_map(move |range| {
            let start = u64::from(base(range));
            let span = 1u64 << (32 - u32::from(range.width()));
            (0..span).step_by(step as usize).filter_map(move |offset| {
                Ipv4Net::new(Ipv4Addr::from((start + offset) as u32), prefix)
                    .ok()
            })
        })
    }

    /// First subnet that does not overlap anything in `taken`.
    pub fn allocate(&self, taken: &[Ipv4Net]) -> Option<Ipv4Net> {
        self.subnets()
            .find(|candidate| !taken.iter().any(|t| overlaps(candidate, t)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub ip_network: Ipv4Net,
    pub forward: Option<ForwardMode>,
    pub has_dhcp_server: bool,
}

impl Network {
    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(base(&self.ip_network))
    }

    pub fn netmask(&self) -> Ipv4Addr {
        netmask(self.ip_network.width())
    }

    fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.ip_network.width()))
    }

    /// The `n`th host address, excluding the network and broadcast
    /// addresses.
    pub fn host(&self, n: u32) -> Option<Ipv4Addr> {
        if n == 0 || u64::from(n) >= self.size().saturating_sub(1) {
            return None;
        }
        Some(Ipv4Addr::from(base(&self.ip_network) + n))
    }

    pub fn last_host(&self) -> Option<Ipv4Addr> {
        let n = self.size().checked_sub(2)?;
        self.host(u32::try_from(n).ok()?)
    }

    /// Gateway of the network, its first host address.
    pub fn router(&self) -> Ipv4Addr {
        self.host(1).unwrap_or_else(|| self.network_address())
    }
}

/// Allocates one network per distinct name in the configured interface
/// order.
pub struct NetworkPlanner<'a> {
    settings: &'a LabSettings,
}

impl<'a> NetworkPlanner<'a> {
    pub fn new(settings: &'a LabSettings) -> Self {
        Self { settings }
    }

    /// Plan networks while avoiding anything in `in_use`.
    pub fn plan(&self, in_use: &[Ipv4Net]) -> Result<Vec<Network>, Error> {
        let mut taken = in_use.to_vec();
        let mut seen = BTreeSet::new();
        let mut networks = Vec::new();

        for name in &self.settings.interface_order {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let pool = NetworkPool::parse(name, self.settings.pool(name)?)?;
            let ip_network =
                pool.allocate(&taken).ok_or_else(|| Error::Pool {
                    network: name.clone(),
                    reason: "pool exhausted".into(),
                })?;
            taken.push(ip_network);
            networks.push(Network {
                name: name.clone(),
                ip_network,
                forward: self.settings.forward(name),
                has_dhcp_server: self.settings.has_dhcp_server(name),
            });
        }

        Ok(networks)
    }
}
