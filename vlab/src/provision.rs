// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Realizing the planned topology and bringing worker nodes into the
//! cluster.

use crate::cluster::ClusterNode;
use crate::env::Environment;
use crate::error::{Error, ManagerError};
use crate::lab::Lab;
use crate::log::lab_log;
use crate::net::NetworkPlanner;
use crate::remote::RemoteShell;
use crate::topology::{Node, TopologyBuilder};
use crate::UNIT_PROVISION;
use std::time::Duration;
use vlab_common::wait::wait_until;

/// Commands that step the node clock from NTP and write it back to the
/// hardware clock.
pub const TIME_SYNC_COMMANDS: [&str; 3] = [
    "hwclock --hctosys >/dev/null 2>&1 0<&1",
    "ntpd -g -u ntp:ntp >/dev/null 2>&1",
    "hwclock -w >/dev/null 2>&1",
];

pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(600);

impl Lab {
    /// Fetch the environment named in the settings, creating it when the
    /// manager does not know it. Only a not-found answer leads to creation.
    pub fn get_or_create(&mut self) -> Result<&Environment, Error> {
        let env = match self.environment.take() {
            Some(env) => env,
            None => self.fetch_or_create()?,
        };
        Ok(self.environment.insert(env))
    }

    fn fetch_or_create(&self) -> Result<Environment, Error> {
        let name = &self.settings.env_name;
        match self.manager.environment_get(name) {
            Ok(env) => {
                lab_log!(self.log, info, UNIT_PROVISION,
                    "using existing environment {}", name);
                Ok(env)
            }
            Err(ManagerError::NotFound(_)) => {
                lab_log!(self.log, info, UNIT_PROVISION,
                    "environment {} not found, creating it", name);
                self.describe_environment()
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Plan, create and define a fresh environment. A failure part way
    /// through leaves whatever was already created in place.
    pub fn describe_environment(&self) -> Result<Environment, Error> {
        let name = self.settings.env_name.as_str();
        let in_use = self.manager.networks_in_use()?;
        let networks = NetworkPlanner::new(&self.settings).plan(&in_use)?;
        let iso_size = std::fs::metadata(&self.settings.iso_path)
            .map_err(|e| {
                Error::Settings(format!(
                    "install media {}: {e}",
                    self.settings.iso_path.display()
                ))
            })?
            .len();
        let topology =
            TopologyBuilder::new(&self.settings, &self.roles, iso_size)
                .build(networks)?;
        topology.check_macs(&self.manager.macs_in_use()?)?;

        self.manager.environment_create(name)?;
        for network in &topology.networks {
            lab_log!(self.log, debug, UNIT_PROVISION, "creating network";
                "network" => &network.name,
                "cidr" => network.ip_network.to_string());
            self.manager.network_create(name, network)?;
        }
        for node in &topology.nodes {
            lab_log!(self.log, debug, UNIT_PROVISION, "creating node";
                "node" => &node.name);
            self.manager.node_create(name, node)?;
            for interface in &node.interfaces {
                self.manager.interface_create(name, &node.name, interface)?;
            }
            for volume in &node.volumes {
                self.manager.volume_create(name, &node.name, volume)?;
            }
        }

        let env = self.manager.environment_define(name)?;
        lab_log!(self.log, info, UNIT_PROVISION,
            "defined environment {} with {} nodes", name, env.nodes.len());
        Ok(env)
    }

    /// Start `nodes` and wait until every one of them is registered with
    /// the cluster, then sync their clocks. Returns the cluster records in
    /// the order of `nodes`.
    pub fn bootstrap_nodes(
        &mut self,
        nodes: &[Node],
        timeout: Duration,
    ) -> Result<Vec<ClusterNode>, Error> {
        let env = self.environment()?.name.clone();
        for node in nodes {
            lab_log!(self.log, info, UNIT_PROVISION, "starting node";
                "node" => &node.name);
            self.manager.node_start(&env, &node.name)?;
        }

        let records = {
            let cluster = self.cluster()?;
            let log = &self.log;
            wait_until(
                "nodes to register with the cluster",
                self.settings.node_poll_interval(),
                timeout,
                || {
                    let listed = match cluster.list_nodes() {
                        Ok(listed) => listed,
                        Err(e) => {
                            lab_log!(log, debug, UNIT_PROVISION,
                                "listing cluster nodes: {}", e);
                            return None;
                        }
                    };
                    nodes
                        .iter()
                        .map(|n| listed.iter().find(|c| c.matches(n)).cloned())
                        .collect::<Option<Vec<_>>>()
                },
            )?
        };

        for record in &records {
            let ip = record.ip.ok_or_else(|| {
                Error::NotFound(format!(
                    "address of cluster node {}",
                    record.id
                ))
            })?;
            let remote = self.ssh_to_remote(ip)?;
            self.sync_node_time(remote.as_ref())?;
        }

        Ok(records)
    }

    pub fn sync_node_time(
        &self,
        remote: &dyn RemoteShell,
    ) -> Result<(), Error> {
        for command in TIME_SYNC_COMMANDS {
            let result = remote.execute(command)?;
            if !result.success() {
                lab_log!(self.log, warn, UNIT_PROVISION,
                    "time sync step failed";
                    "command" => command,
                    "exit_code" => result.exit_code);
            }
        }
        Ok(())
    }
}
