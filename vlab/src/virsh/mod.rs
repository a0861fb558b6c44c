// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtualization manager backed by libvirt, driven through the `virsh` and
//! `qemu-img` command line tools.
//!
//! Environment records live as JSON files in the state directory, one per
//! environment. A record is staged by `environment_create` and the calls
//! that follow it, and only touches libvirt once `environment_define` runs.
//! Disk images for an environment live in `<state_dir>/<env>/`.

pub mod keys;
pub mod xml;

use crate::config::LabSettings;
use crate::env::Environment;
use crate::error::ManagerError;
use crate::log::lab_log;
use crate::manager::VirtManager;
use crate::net::Network;
use crate::topology::{Interface, Node, Volume};
use crate::UNIT_VIRSH;
use keys::{parse_keys, KeyAction};
use oxnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::sleep;

/// Name of the libvirt object backing `name` in environment `env`.
pub fn libvirt_name(env: &str, name: &str) -> String {
    format!("{env}_{name}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvRecord {
    pub environment: Environment,
    #[serde(default)]
    pub defined: bool,
}

pub struct Virsh {
    log: Logger,
    uri: String,
    state_dir: PathBuf,
}

impl Virsh {
    pub fn new(settings: &LabSettings, log: Logger) -> Self {
        Self {
            log,
            uri: settings.libvirt_uri.clone(),
            state_dir: settings.state_dir.clone(),
        }
    }

    fn record_path(&self, env: &str) -> PathBuf {
        self.state_dir.join(format!("{env}.json"))
    }

    fn image_dir(&self, env: &str) -> PathBuf {
        self.state_dir.join(env)
    }

    fn image_path(&self, env: &str, volume: &Volume) -> PathBuf {
        self.image_dir(env)
            .join(format!("{}.{}", volume.name, volume.format.as_str()))
    }

    fn load(&self, env: &str) -> Result<Option<EnvRecord>, ManagerError> {
        match std::fs::read_to_string(self.record_path(env)) {
            Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &EnvRecord) -> Result<(), ManagerError> {
        std::fs::create_dir_all(&self.state_dir)?;
        let path = self.record_path(&record.environment.name);
        std::fs::write(path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    /// Apply `f` to a staged, not yet defined, environment record.
    fn update_staged<F>(&self, env: &str, f: F) -> Result<(), ManagerError>
    where
        F: FnOnce(&mut Environment) -> Result<(), ManagerError>,
    {
        let mut record = match self.load(env)? {
            Some(r) if !r.defined => r,
            Some(_) => {
                return Err(ManagerError::Conflict(format!(
                    "{env} is already defined"
                )))
            }
            None => return Err(ManagerError::NotFound(env.into())),
        };
        f(&mut record.environment)?;
        self.save(&record)
    }

    fn update_node<F>(
        &self,
        env: &str,
        node: &str,
        f: F,
    ) -> Result<(), ManagerError>
    where
        F: FnOnce(&mut Node),
    {
        self.update_staged(env, |e| {
            let n = e
                .nodes
                .iter_mut()
                .find(|n| n.name == node)
                .ok_or_else(|| {
                    ManagerError::NotFound(format!("{env}/{node}"))
                })?;
            f(n);
            Ok(())
        })
    }

    fn defined(&self, env: &str) -> Result<Environment, ManagerError> {
        match self.load(env)? {
            Some(r) if r.defined => Ok(r.environment),
            _ => Err(ManagerError::NotFound(env.into())),
        }
    }

    fn domains(&self, env: &str) -> Result<Vec<String>, ManagerError> {
        Ok(self
            .defined(env)?
            .nodes
            .iter()
            .map(|n| libvirt_name(env, &n.name))
            .collect())
    }

    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<String, ManagerError> {
        let command = format!("{program} {}", args.join(" "));
        lab_log!(self.log, trace, UNIT_VIRSH, "running {}", command);
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(ManagerError::Command {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().into(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn virsh(&self, args: &[&str]) -> Result<String, ManagerError> {
        let mut full = vec!["-c", self.uri.as_str()];
        full.extend_from_slice(args);
        self.run("virsh", &full)
    }

    /// Write `xml` next to the environment images and feed it to
    /// `virsh <verb>`.
    fn define_from(
        &self,
        env: &str,
        verb: &str,
        name: &str,
        xml: &str,
    ) -> Result<(), ManagerError> {
        let path = self.image_dir(env).join(format!("{name}.xml"));
        std::fs::write(&path, xml)?;
        self.virsh(&[verb, &path.display().to_string()])?;
        Ok(())
    }

    fn domain_state(&self, domain: &str) -> Result<String, ManagerError> {
        Ok(self.virsh(&["domstate", domain])?.trim().to_owned())
    }

    fn domain_snapshots(
        &self,
        domain: &str,
    ) -> Result<Vec<String>, ManagerError> {
        Ok(self
            .virsh(&["snapshot-list", domain, "--name"])?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn define_network(
        &self,
        env: &str,
        network: &Network,
        nodes: &[Node],
    ) -> Result<(), ManagerError> {
        let name = libvirt_name(env, &network.name);
        lab_log!(self.log, info, UNIT_VIRSH, "defining network";
            "network" => &name,
            "cidr" => network.ip_network.to_string());
        let definition = xml::network_xml(env, network, nodes);
        self.define_from(env, "net-define", &name, &definition)?;
        self.virsh(&["net-autostart", &name])?;
        self.virsh(&["net-start", &name])?;
        Ok(())
    }

    fn define_node(
        &self,
        env: &str,
        node: &mut Node,
    ) -> Result<(), ManagerError> {
        let name = libvirt_name(env, &node.name);
        let mut paths = Vec::with_capacity(node.volumes.len());
        for volume in &node.volumes {
            let path = self.image_path(env, volume);
            lab_log!(self.log, debug, UNIT_VIRSH, "creating volume";
                "volume" => &volume.name,
                "path" => path.display().to_string());
            self.run(
                "qemu-img",
                &[
                    "create",
                    "-f",
                    volume.format.as_str(),
                    &path.display().to_string(),
                    &volume.capacity.to_string(),
                ],
            )?;
            paths.push(path);
        }
        for iface in &mut node.interfaces {
            iface.target_dev = Some(xml::target_dev(&iface.mac));
        }
        let disks: Vec<xml::Disk<'_>> = node
            .volumes
            .iter()
            .zip(paths)
            .map(|(volume, path)| xml::Disk { volume, path })
            .collect();
        lab_log!(self.log, info, UNIT_VIRSH, "defining domain";
            "domain" => &name);
        let definition = xml::domain_xml(env, node, &disks);
        self.define_from(env, "define", &name, &definition)
    }
}

impl VirtManager for Virsh {
    fn environment_get(&self, name: &str) -> Result<Environment, ManagerError> {
        self.defined(name)
    }

    fn networks_in_use(&self) -> Result<Vec<Ipv4Net>, ManagerError> {
        let mut ranges = Vec::new();
        for net in self.virsh(&["net-list", "--all", "--name"])?.lines() {
            let net = net.trim();
            if net.is_empty() {
                continue;
            }
            let dumped = self.virsh(&["net-dumpxml", net])?;
            ranges.extend(xml::network_ranges(&dumped));
        }
        Ok(ranges)
    }

    fn macs_in_use(&self) -> Result<Vec<String>, ManagerError> {
        let mut macs = Vec::new();
        for dom in self.virsh(&["list", "--all", "--name"])?.lines() {
            let dom = dom.trim();
            if dom.is_empty() {
                continue;
            }
            macs.extend(xml::domiflist_macs(
                &self.virsh(&["domiflist", dom])?,
            ));
        }
        Ok(macs)
    }

    fn environment_create(&self, name: &str) -> Result<(), ManagerError> {
        match self.load(name)? {
            Some(r) if r.defined => {
                return Err(ManagerError::Conflict(format!(
                    "{name} is already defined"
                )))
            }
            Some(_) => {
                lab_log!(self.log, warn, UNIT_VIRSH,
                    "discarding staged record of {}", name);
            }
            None => {}
        }
        self.save(&EnvRecord {
            environment: Environment::new(name),
            defined: false,
        })
    }

    fn network_create(
        &self,
        env: &str,
        network: &Network,
    ) -> Result<(), ManagerError> {
        self.update_staged(env, |e| {
            if e.networks.iter().any(|n| n.name == network.name) {
                return Err(ManagerError::Conflict(network.name.clone()));
            }
            e.networks.push(network.clone());
            Ok(())
        })
    }

    fn node_create(&self, env: &str, node: &Node) -> Result<(), ManagerError> {
        self.update_staged(env, |e| {
            if e.nodes.iter().any(|n| n.name == node.name) {
                return Err(ManagerError::Conflict(node.name.clone()));
            }
            e.nodes.push(Node {
                interfaces: Vec::new(),
                volumes: Vec::new(),
                ..node.clone()
            });
            Ok(())
        })
    }

    fn interface_create(
        &self,
        env: &str,
        node: &str,
        interface: &Interface,
    ) -> Result<(), ManagerError> {
        self.update_node(env, node, |n| n.interfaces.push(interface.clone()))
    }

    fn volume_create(
        &self,
        env: &str,
        node: &str,
        volume: &Volume,
    ) -> Result<(), ManagerError> {
        self.update_node(env, node, |n| n.volumes.push(volume.clone()))
    }

    fn environment_define(
        &self,
        env: &str,
    ) -> Result<Environment, ManagerError> {
        let mut record = match self.load(env)? {
            Some(r) if !r.defined => r,
            Some(_) => {
                return Err(ManagerError::Conflict(format!(
                    "{env} is already defined"
                )))
            }
            None => return Err(ManagerError::NotFound(env.into())),
        };
        std::fs::create_dir_all(self.image_dir(env))?;

        for network in &record.environment.networks {
            self.define_network(env, network, &record.environment.nodes)?;
        }
        for node in &mut record.environment.nodes {
            self.define_node(env, node)?;
        }

        record.defined = true;
        self.save(&record)?;
        Ok(record.environment)
    }

    fn node_start(&self, env: &str, node: &str) -> Result<(), ManagerError> {
        self.defined(env)?;
        let domain = libvirt_name(env, node);
        if self.domain_state(&domain)? == "running" {
            lab_log!(self.log, debug, UNIT_VIRSH, "already running";
                "domain" => &domain);
            return Ok(());
        }
        self.virsh(&["start", &domain])?;
        Ok(())
    }

    fn node_send_keys(
        &self,
        env: &str,
        node: &str,
        keys: &str,
    ) -> Result<(), ManagerError> {
        let actions = parse_keys(keys)?;
        let domain = libvirt_name(env, node);
        for action in actions {
            match action {
                KeyAction::Press(codes) => {
                    let mut args = vec!["send-key", domain.as_str()];
                    args.extend(codes);
                    self.virsh(&args)?;
                }
                KeyAction::Wait(d) => sleep(d),
            }
        }
        Ok(())
    }

    fn volume_upload(
        &self,
        env: &str,
        volume: &str,
        source: &Path,
    ) -> Result<(), ManagerError> {
        let e = self.defined(env)?;
        let v = e
            .nodes
            .iter()
            .flat_map(|n| n.volumes.iter())
            .find(|v| v.name == volume)
            .ok_or_else(|| ManagerError::NotFound(format!("{env}/{volume}")))?;
        let target = self.image_path(env, v);
        lab_log!(self.log, info, UNIT_VIRSH, "uploading volume";
            "volume" => volume,
            "source" => source.display().to_string());
        std::fs::copy(source, target)?;
        Ok(())
    }

    fn environment_suspend(&self, env: &str) -> Result<(), ManagerError> {
        for domain in self.domains(env)? {
            if self.domain_state(&domain)? == "running" {
                self.virsh(&["suspend", &domain])?;
            }
        }
        Ok(())
    }

    fn environment_resume(&self, env: &str) -> Result<(), ManagerError> {
        for domain in self.domains(env)? {
            if self.domain_state(&domain)? == "paused" {
                self.virsh(&["resume", &domain])?;
            }
        }
        Ok(())
    }

    fn environment_snapshot(
        &self,
        env: &str,
        name: &str,
        force: bool,
    ) -> Result<(), ManagerError> {
        let domains = self.domains(env)?;
        for domain in &domains {
            if self.domain_snapshots(domain)?.iter().any(|s| s == name) {
                if !force {
                    return Err(ManagerError::Conflict(format!(
                        "{domain} already has snapshot {name}"
                    )));
                }
                self.virsh(&["snapshot-delete", domain, name])?;
            }
        }
        for domain in &domains {
            lab_log!(self.log, info, UNIT_VIRSH, "taking snapshot";
                "domain" => domain, "snapshot" => name);
            self.virsh(&["snapshot-create-as", domain, name])?;
        }
        Ok(())
    }

    fn environment_revert(
        &self,
        env: &str,
        name: &str,
    ) -> Result<(), ManagerError> {
        for domain in self.domains(env)? {
            lab_log!(self.log, info, UNIT_VIRSH, "reverting snapshot";
                "domain" => &domain, "snapshot" => name);
            self.virsh(&["snapshot-revert", &domain, name])?;
        }
        Ok(())
    }

    fn environment_has_snapshot(
        &self,
        env: &str,
        name: &str,
    ) -> Result<bool, ManagerError> {
        let domains = self.domains(env)?;
        if domains.is_empty() {
            return Ok(false);
        }
        for domain in &domains {
            if !self.domain_snapshots(domain)?.iter().any(|s| s == name) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{BootDevice, NodeRole};
    use pretty_assertions::assert_eq;
    use vlab_common::log::discard_logger;

    fn virsh(name: &str) -> Virsh {
        let state_dir = std::env::temp_dir()
            .join(format!("vlab-virsh-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&state_dir);
        let settings = LabSettings {
            state_dir,
            ..Default::default()
        };
        Virsh::new(&settings, discard_logger())
    }

    fn node(name: &str) -> Node {
        Node {
            name: name.into(),
            role: NodeRole::Other,
            memory: 1024,
            vcpu: 1,
            boot: vec![BootDevice::Network, BootDevice::Hd],
            interfaces: Vec::new(),
            volumes: Vec::new(),
        }
    }

    #[test]
    fn test_staged_record_is_not_an_environment() {
        let v = virsh("staged");
        assert!(matches!(
            v.environment_get("lab"),
            Err(ManagerError::NotFound(_))
        ));
        v.environment_create("lab").expect("create");
        v.node_create("lab", &node("slave-01")).expect("node");
        v.volume_create("lab", "slave-01", &Volume::empty("slave-01-system"))
            .expect("volume");
        assert!(matches!(
            v.environment_get("lab"),
            Err(ManagerError::NotFound(_))
        ));

        let record = v.load("lab").expect("load").expect("record");
        assert!(!record.defined);
        assert_eq!(record.environment.nodes[0].volumes.len(), 1);
    }

    #[test]
    fn test_staging_rejects_duplicates_and_unknowns() {
        let v = virsh("dups");
        assert!(matches!(
            v.node_create("lab", &node("a")),
            Err(ManagerError::NotFound(_))
        ));
        v.environment_create("lab").expect("create");
        v.node_create("lab", &node("a")).expect("node");
        assert!(matches!(
            v.node_create("lab", &node("a")),
            Err(ManagerError::Conflict(_))
        ));
        assert!(matches!(
            v.volume_create("lab", "b", &Volume::empty("b-system")),
            Err(ManagerError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_discards_stale_staged_record() {
        let v = virsh("stale");
        v.environment_create("lab").expect("create");
        v.node_create("lab", &node("a")).expect("node");
        v.environment_create("lab").expect("recreate");
        let record = v.load("lab").expect("load").expect("record");
        assert!(record.environment.nodes.is_empty());
    }

    #[test]
    fn test_defined_record_is_returned() {
        let v = virsh("defined");
        let mut env = Environment::new("lab");
        env.nodes.push(node("a"));
        v.save(&EnvRecord {
            environment: env.clone(),
            defined: true,
        })
        .expect("save");
        assert_eq!(v.environment_get("lab").expect("get"), env);
        assert!(matches!(
            v.environment_create("lab"),
            Err(ManagerError::Conflict(_))
        ));
        assert_eq!(v.domains("lab").expect("domains"), vec!["lab_a"]);
    }

    #[test]
    fn test_image_path() {
        let v = virsh("paths");
        let path = v.image_path("lab", &Volume::empty("a-system"));
        assert!(path.ends_with("lab/a-system.qcow2"));
    }
}
