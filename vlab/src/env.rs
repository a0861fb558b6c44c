// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::net::Network;
use crate::topology::{Node, NodeRoles};
use serde::{Deserialize, Serialize};

/// Description of an environment as recorded by the virtualization manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub networks: Vec<Network>,
    pub nodes: Vec<Node>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            networks: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn network_by_name(&self, name: &str) -> Result<&Network, Error> {
        self.networks
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| {
                Error::NotFound(format!("network {name} in {}", self.name))
            })
    }

    pub fn node_by_name(&self, name: &str) -> Result<&Node, Error> {
        self.nodes.iter().find(|n| n.name == name).ok_or_else(|| {
            Error::NotFound(format!("node {name} in {}", self.name))
        })
    }

    pub fn nodes<'a>(&'a self, roles: &NodeRoles) -> Result<Nodes<'a>, Error> {
        let lookup = |names: &[String]| {
            names
                .iter()
                .map(|n| self.node_by_name(n))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Nodes {
            admins: lookup(&roles.admin_names)?,
            others: lookup(&roles.other_names)?,
        })
    }
}

/// The nodes of an environment grouped by role.
#[derive(Debug)]
pub struct Nodes<'a> {
    pub admins: Vec<&'a Node>,
    pub others: Vec<&'a Node>,
}

impl<'a> Nodes<'a> {
    /// The admin node. Exactly one admin must exist.
    pub fn admin(&self) -> Result<&'a Node, Error> {
        match self.admins.as_slice() {
            [admin] => Ok(*admin),
            admins => Err(Error::Topology(format!(
                "expected exactly one admin node, found {}",
                admins.len()
            ))),
        }
    }

    pub fn slaves(&self) -> &[&'a Node] {
        &self.others
    }

    /// Slaves first, then admins.
    pub fn all(&self) -> impl Iterator<Item = &'a Node> + '_ {
        self.others.iter().chain(self.admins.iter()).copied()
    }
}
