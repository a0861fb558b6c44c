// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::ClusterError;
use crate::topology::Node;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A node as registered with the cluster management service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterNode {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub mac: String,
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub cluster: Option<u64>,
}

impl ClusterNode {
    /// True when this record belongs to the virtual `node`, matched on any
    /// of its interface MACs.
    pub fn matches(&self, node: &Node) -> bool {
        node.interfaces
            .iter()
            .any(|i| i.mac.eq_ignore_ascii_case(&self.mac))
    }
}

/// Interface to the cluster management service running on the admin node.
pub trait ClusterClient: Send + Sync {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError>;

    fn add_syslog_server(
        &self,
        cluster_id: u64,
        host: Ipv4Addr,
        port: u16,
    ) -> Result<(), ClusterError>;

    fn cluster_vlans(&self, cluster_id: u64) -> Result<Vec<u16>, ClusterError>;

    fn node_by_devops_node(
        &self,
        node: &Node,
    ) -> Result<Option<ClusterNode>, ClusterError> {
        Ok(self.list_nodes()?.into_iter().find(|c| c.matches(node)))
    }

    fn node_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ClusterNode>, ClusterError> {
        Ok(self.list_nodes()?.into_iter().find(|c| c.name == name))
    }
}
