// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client for the Nailgun REST API served by the admin node.

use crate::cluster::{ClusterClient, ClusterNode};
use crate::error::ClusterError;
use crate::log::lab_log;
use crate::UNIT_NAILGUN;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use slog::Logger;
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const SYSLOG_TRANSPORT: &str = "udp";

pub struct NailgunClient {
    log: Logger,
    base: String,
    client: Client,
}

impl NailgunClient {
    pub fn new(
        admin_ip: Ipv4Addr,
        port: u16,
        log: Logger,
    ) -> Result<Self, ClusterError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            log,
            base: format!("http://{admin_ip}:{port}/api"),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn get_json(&self, path: &str) -> Result<Value, ClusterError> {
        let url = self.url(path);
        lab_log!(self.log, trace, UNIT_NAILGUN, "GET {}", url);
        Ok(self.client.get(&url).send()?.error_for_status()?.json()?)
    }

    fn put_json(&self, path: &str, body: &Value) -> Result<(), ClusterError> {
        let url = self.url(path);
        lab_log!(self.log, trace, UNIT_NAILGUN, "PUT {}", url);
        self.client.put(&url).json(body).send()?.error_for_status()?;
        Ok(())
    }

    pub fn cluster_attributes(
        &self,
        cluster_id: u64,
    ) -> Result<Value, ClusterError> {
        self.get_json(&format!("clusters/{cluster_id}/attributes/"))
    }

    pub fn update_cluster_attributes(
        &self,
        cluster_id: u64,
        attributes: &Value,
    ) -> Result<(), ClusterError> {
        self.put_json(&format!("clusters/{cluster_id}/attributes/"), attributes)
    }

    pub fn nova_network_configuration(
        &self,
        cluster_id: u64,
    ) -> Result<Value, ClusterError> {
        self.get_json(&format!(
            "clusters/{cluster_id}/network_configuration/nova_network/"
        ))
    }
}

impl ClusterClient for NailgunClient {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError> {
        Ok(serde_json::from_value(self.get_json("nodes/")?)?)
    }

    fn add_syslog_server(
        &self,
        cluster_id: u64,
        host: Ipv4Addr,
        port: u16,
    ) -> Result<(), ClusterError> {
        let mut attributes = self.cluster_attributes(cluster_id)?;
        set_syslog_server(&mut attributes, host, port)?;
        lab_log!(self.log, info, UNIT_NAILGUN, "setting syslog server";
            "cluster" => cluster_id,
            "host" => host.to_string(),
            "port" => port);
        self.update_cluster_attributes(cluster_id, &attributes)
    }

    fn cluster_vlans(&self, cluster_id: u64) -> Result<Vec<u16>, ClusterError> {
        vlan_ids(&self.nova_network_configuration(cluster_id)?)
    }
}

/// Point the syslog section of a cluster attributes document at
/// `host:port`.
pub fn set_syslog_server(
    attributes: &mut Value,
    host: Ipv4Addr,
    port: u16,
) -> Result<(), ClusterError> {
    let syslog = attributes
        .pointer_mut("/editable/syslog")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            ClusterError::Unexpected(
                "attributes have no editable.syslog".into(),
            )
        })?;
    let values = [
        ("syslog_server", json!(host.to_string())),
        ("syslog_port", json!(port)),
        ("syslog_transport", json!(SYSLOG_TRANSPORT)),
    ];
    for (key, value) in values {
        match syslog.get_mut(key).and_then(Value::as_object_mut) {
            Some(field) => {
                field.insert("value".into(), value);
            }
            None => {
                syslog.insert(key.into(), json!({ "value": value }));
            }
        }
    }
    Ok(())
}

/// VLAN ids assigned to the networks of a nova-network configuration.
pub fn vlan_ids(config: &Value) -> Result<Vec<u16>, ClusterError> {
    let networks = config
        .get("networks")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ClusterError::Unexpected(
                "network configuration has no networks".into(),
            )
        })?;
    Ok(networks
        .iter()
        .filter_map(|n| n.get("vlan_start").and_then(Value::as_u64))
        .filter_map(|v| u16::try_from(v).ok())
        .collect())
}
