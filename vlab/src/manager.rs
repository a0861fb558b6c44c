// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::env::Environment;
use crate::error::ManagerError;
use crate::net::Network;
use crate::topology::{Interface, Node, Volume};
use oxnet::Ipv4Net;
use std::path::Path;

/// Interface to the virtualization manager that owns environments, their
/// networks, nodes and volumes.
///
/// Creation is staged: `environment_create` opens a new environment,
/// networks, nodes, interfaces and volumes are added to it, and
/// `environment_define` realizes the whole thing and returns its record.
pub trait VirtManager: Send + Sync {
    /// Fetch the record of an existing environment. A missing environment
    /// must be reported as [`ManagerError::NotFound`].
    fn environment_get(&self, name: &str) -> Result<Environment, ManagerError>;

    /// Networks already claimed by any environment the manager knows about.
    fn networks_in_use(&self) -> Result<Vec<Ipv4Net>, ManagerError>;

    /// Interface MACs of every node the manager knows about.
    fn macs_in_use(&self) -> Result<Vec<String>, ManagerError>;

    fn environment_create(&self, name: &str) -> Result<(), ManagerError>;

    fn network_create(
        &self,
        env: &str,
        network: &Network,
    ) -> Result<(), ManagerError>;

    /// Create a node. Interfaces and volumes on `node` are ignored, they are
    /// added through `interface_create` and `volume_create`.
    fn node_create(&self, env: &str, node: &Node) -> Result<(), ManagerError>;

    fn interface_create(
        &self,
        env: &str,
        node: &str,
        interface: &Interface,
    ) -> Result<(), ManagerError>;

    /// Create a volume and attach it to `node`.
    fn volume_create(
        &self,
        env: &str,
        node: &str,
        volume: &Volume,
    ) -> Result<(), ManagerError>;

    fn environment_define(
        &self,
        env: &str,
    ) -> Result<Environment, ManagerError>;

    fn node_start(&self, env: &str, node: &str) -> Result<(), ManagerError>;

    /// Type `keys` on the node console. `<Esc>`, `<Enter>` and `<Wait>` are
    /// special, newlines are ignored.
    fn node_send_keys(
        &self,
        env: &str,
        node: &str,
        keys: &str,
    ) -> Result<(), ManagerError>;

    /// Replace the content of a volume with the file at `source`.
    fn volume_upload(
        &self,
        env: &str,
        volume: &str,
        source: &Path,
    ) -> Result<(), ManagerError>;

    fn environment_suspend(&self, env: &str) -> Result<(), ManagerError>;

    fn environment_resume(&self, env: &str) -> Result<(), ManagerError>;

    /// Take a named snapshot of every node. With `force` an existing
    /// snapshot of the same name is replaced.
    fn environment_snapshot(
        &self,
        env: &str,
        name: &str,
        force: bool,
    ) -> Result<(), ManagerError>;

    fn environment_revert(&self, env: &str, name: &str)
        -> Result<(), ManagerError>;

    fn environment_has_snapshot(
        &self,
        env: &str,
        name: &str,
    ) -> Result<bool, ManagerError>;
}
