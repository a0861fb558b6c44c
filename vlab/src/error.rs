// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use vlab_common::wait::WaitError;

/// Errors surfaced by a virtualization manager backend.
#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unsupported console key {0:?}")]
    UnsupportedKey(char),

    #[error("io error {0}")]
    Io(#[from] std::io::Error),

    #[error("state record error {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by remote shells.
#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("unable to reach {0}")]
    Unreachable(String),

    #[error("remote command `{command}` exited with {exit_code}: {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("invalid private key {0}")]
    InvalidKey(String),

    #[error("io error {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the cluster management client.
#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("http error {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("manager error: {0}")]
    Manager(#[from] ManagerError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Timeout(#[from] WaitError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid network pool for {network}: {reason}")]
    Pool { network: String, reason: String },

    #[error("topology error: {0}")]
    Topology(String),

    #[error("no cluster client attached to the lab")]
    NoClusterClient,

    #[error("settings error: {0}")]
    Settings(String),

    #[error("io error {0}")]
    Io(#[from] std::io::Error),
}
