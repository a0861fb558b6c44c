// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The lab session: one environment, its collaborators and cached state.

use crate::cluster::{ClusterClient, ClusterNode};
use crate::config::LabSettings;
use crate::env::{Environment, Nodes};
use crate::error::Error;
use crate::manager::VirtManager;
use crate::remote::{KeyBundle, RemoteConnector};
use crate::topology::{Node, NodeRoles};
use oxnet::Ipv4Net;
use slog::Logger;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const DEFAULT_SYSLOG_PORT: u16 = 5514;

/// Session context for a single test run. The environment record and the
/// private key bundle are cached here between `initialize` and `reset`.
pub struct Lab {
    pub settings: LabSettings,
    pub log: Logger,
    pub(crate) roles: NodeRoles,
    pub(crate) manager: Arc<dyn VirtManager>,
    pub(crate) connector: Arc<dyn RemoteConnector>,
    pub(crate) cluster: Option<Arc<dyn ClusterClient>>,
    pub(crate) environment: Option<Environment>,
    pub(crate) keys: Option<KeyBundle>,
}

impl Lab {
    pub fn new(
        settings: LabSettings,
        manager: Arc<dyn VirtManager>,
        connector: Arc<dyn RemoteConnector>,
        log: Logger,
    ) -> Self {
        let roles = NodeRoles::with_slaves(settings.slave_count);
        Self {
            settings,
            log,
            roles,
            manager,
            connector,
            cluster: None,
            environment: None,
            keys: None,
        }
    }

    pub fn with_roles(mut self, roles: NodeRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn roles(&self) -> &NodeRoles {
        &self.roles
    }

    /// Fetch or create the environment and cache it for the session.
    pub fn initialize(&mut self) -> Result<&Environment, Error> {
        self.get_or_create()
    }

    /// Forget the cached environment and keys. The next access fetches them
    /// again.
    pub fn reset(&mut self) {
        self.environment = None;
        self.keys = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.environment.is_some()
    }

    pub fn attach_cluster(&mut self, client: Arc<dyn ClusterClient>) {
        self.cluster = Some(client);
    }

    pub fn cluster(&self) -> Result<&dyn ClusterClient, Error> {
        self.cluster.as_deref().ok_or(Error::NoClusterClient)
    }

    pub fn environment(&mut self) -> Result<&Environment, Error> {
        self.get_or_create()
    }

    pub fn nodes(&mut self) -> Result<Nodes<'_>, Error> {
        let roles = self.roles.clone();
        self.environment()?.nodes(&roles)
    }

    pub fn admin_node(&mut self) -> Result<Node, Error> {
        Ok(self.nodes()?.admin()?.clone())
    }

    pub fn nodes_by_names<S: AsRef<str>>(
        &mut self,
        names: &[S],
    ) -> Result<Vec<Node>, Error> {
        let env = self.environment()?;
        names
            .iter()
            .map(|n| env.node_by_name(n.as_ref()).cloned())
            .collect()
    }

    pub fn admin_node_ip(&mut self) -> Result<Ipv4Addr, Error> {
        let admin_net = self.settings.admin_net.clone();
        let admin = self.admin_node()?;
        admin.ip_address_by_network_name(&admin_net).ok_or_else(|| {
            Error::NotFound(format!("{} address on {admin_net}", admin.name))
        })
    }

    /// Gateway of `net`, the admin network when `None`.
    pub fn router(&mut self, net: Option<&str>) -> Result<Ipv4Addr, Error> {
        let net = net.unwrap_or(self.settings.admin_net.as_str()).to_owned();
        Ok(self.environment()?.network_by_name(&net)?.router())
    }

    pub fn network(&mut self, net: &str) -> Result<Ipv4Net, Error> {
        Ok(self.environment()?.network_by_name(net)?.ip_network)
    }

    pub fn net_mask(&mut self, net: &str) -> Result<Ipv4Addr, Error> {
        Ok(self.environment()?.network_by_name(net)?.netmask())
    }

    /// Address of the host as seen from the admin network.
    pub fn host_node_ip(&mut self) -> Result<Ipv4Addr, Error> {
        self.router(None)
    }

    /// Host side tap devices of `nodes`.
    pub fn target_devs(nodes: &[Node]) -> Vec<String> {
        nodes
            .iter()
            .flat_map(|n| n.interfaces.iter())
            .filter_map(|i| i.target_dev.clone())
            .collect()
    }

    pub fn add_syslog_server(
        &mut self,
        cluster_id: u64,
        port: u16,
    ) -> Result<(), Error> {
        let host = self.host_node_ip()?;
        self.cluster()?.add_syslog_server(cluster_id, host, port)?;
        Ok(())
    }

    pub fn cluster_vlans(&self, cluster_id: u64) -> Result<Vec<u16>, Error> {
        Ok(self.cluster()?.cluster_vlans(cluster_id)?)
    }

    /// Cluster record of the virtual node called `name`.
    pub fn cluster_node_by_name(
        &mut self,
        name: &str,
    ) -> Result<ClusterNode, Error> {
        let node = self.environment()?.node_by_name(name)?.clone();
        self.cluster()?.node_by_devops_node(&node)?.ok_or_else(|| {
            Error::NotFound(format!("cluster record for node {name}"))
        })
    }
}
