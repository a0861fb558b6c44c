// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote shells on lab nodes and the credentials used to open them.

use crate::error::{Error, RemoteError};
use crate::lab::Lab;
use crate::log::lab_log;
use crate::UNIT_REMOTE;
use std::fmt;
use std::net::Ipv4Addr;

/// Key files on the admin node that grant access to every other node.
pub const PRIVATE_KEY_PATHS: [&str; 2] =
    ["/root/.ssh/id_rsa", "/root/.ssh/bootstrap.rsa"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An open remote-execution session on one node.
pub trait RemoteShell {
    fn execute(&self, command: &str) -> Result<CommandResult, RemoteError>;

    fn read_file(&self, path: &str) -> Result<String, RemoteError>;
}

/// Opens remote shells.
pub trait RemoteConnector: Send + Sync {
    fn connect(
        &self,
        ip: Ipv4Addr,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteShell>, RemoteError>;

    /// Whether the node at `ip` accepts remote sessions yet.
    fn reachable(&self, ip: Ipv4Addr) -> bool;
}

/// PEM encoded private key and where it was read from.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    source: String,
    pem: String,
}

impl PrivateKey {
    pub fn from_pem(source: &str, pem: &str) -> Result<Self, RemoteError> {
        let pem = pem.trim();
        let mut lines = pem.lines();
        let begin = lines.next().unwrap_or_default();
        let end = lines.last().unwrap_or_default();
        if !begin.starts_with("-----BEGIN ")
            || !begin.ends_with("PRIVATE KEY-----")
            || !end.starts_with("-----END ")
        {
            return Err(RemoteError::InvalidKey(source.into()));
        }
        Ok(Self {
            source: source.into(),
            pem: format!("{pem}\n"),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBundle {
    pub keys: Vec<PrivateKey>,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub keys: Vec<PrivateKey>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Lab {
    pub(crate) fn root_credentials(
        &self,
        keys: Vec<PrivateKey>,
    ) -> Credentials {
        Credentials {
            username: self.settings.root_login.clone(),
            password: Some(self.settings.root_password.clone()),
            keys,
        }
    }

    /// Password authenticated shell on the admin node.
    pub fn admin_remote(&mut self) -> Result<Box<dyn RemoteShell>, Error> {
        let ip = self.admin_node_ip()?;
        let credentials = self.root_credentials(Vec::new());
        Ok(self.connector.connect(ip, &credentials)?)
    }

    /// Keys for the provisioned nodes, read from the admin node on first use
    /// and cached until `force` is set.
    pub fn private_keys(&mut self, force: bool) -> Result<&KeyBundle, Error> {
        let bundle = match self.keys.take() {
            Some(keys) if !force => keys,
            previous => match self.fetch_private_keys() {
                Ok(bundle) => bundle,
                Err(e) => {
                    self.keys = previous;
                    return Err(e);
                }
            },
        };
        Ok(self.keys.insert(bundle))
    }

    fn fetch_private_keys(&mut self) -> Result<KeyBundle, Error> {
        let remote = self.admin_remote()?;
        let mut keys = Vec::new();
        for path in PRIVATE_KEY_PATHS {
            let pem = remote.read_file(path)?;
            keys.push(PrivateKey::from_pem(path, &pem)?);
        }
        lab_log!(self.log, debug, UNIT_REMOTE,
            "loaded {} private keys from admin node", keys.len());
        Ok(KeyBundle { keys })
    }

    /// Shell on `ip` authenticated with the root password and the cached
    /// private keys.
    pub fn ssh_to_remote(
        &mut self,
        ip: Ipv4Addr,
    ) -> Result<Box<dyn RemoteShell>, Error> {
        let keys = self.private_keys(false)?.keys.clone();
        let credentials = self.root_credentials(keys);
        lab_log!(self.log, debug, UNIT_REMOTE, "opening remote shell";
            "ip" => ip.to_string());
        Ok(self.connector.connect(ip, &credentials)?)
    }

    /// Shell on the virtual node called `name`, addressed through its
    /// cluster record.
    pub fn ssh_to_remote_by_name(
        &mut self,
        name: &str,
    ) -> Result<Box<dyn RemoteShell>, Error> {
        let record = self.cluster_node_by_name(name)?;
        let ip = record.ip.ok_or_else(|| {
            Error::NotFound(format!("cluster address for node {name}"))
        })?;
        self.ssh_to_remote(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{lab_with_env, MockCluster, TEST_KEY};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_private_key_validation() {
        let key = PrivateKey::from_pem("id_rsa", TEST_KEY).expect("key");
        assert_eq!(key.source(), "id_rsa");
        assert!(key.pem().ends_with("-----END RSA PRIVATE KEY-----\n"));

        assert!(PrivateKey::from_pem("junk", "not a key").is_err());
        assert!(PrivateKey::from_pem(
            "public",
            "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----"
        )
        .is_err());
    }

    #[test]
    fn test_private_key_debug_hides_material() {
        let key = PrivateKey::from_pem("id_rsa", TEST_KEY).expect("key");
        assert!(!format!("{key:?}").contains("BEGIN"));
    }

    #[test]
    fn test_keys_are_cached_until_forced() {
        let (mut lab, _manager, connector) = lab_with_env("keys");
        let bundle = lab.private_keys(false).expect("keys").clone();
        assert_eq!(bundle.keys.len(), 2);
        assert_eq!(bundle.keys[1].source(), "/root/.ssh/bootstrap.rsa");

        lab.private_keys(false).expect("keys");
        assert_eq!(connector.reads().len(), 2);

        lab.private_keys(true).expect("keys");
        assert_eq!(connector.reads().len(), 4);
    }

    #[test]
    fn test_failed_refresh_keeps_cached_keys() {
        let (mut lab, _manager, connector) = lab_with_env("refresh");
        lab.private_keys(false).expect("keys");
        connector.set_file("/root/.ssh/id_rsa", "garbage");
        assert!(lab.private_keys(true).is_err());
        assert_eq!(lab.private_keys(false).expect("keys").keys.len(), 2);
    }

    #[test]
    fn test_admin_remote_uses_password_only() {
        let (mut lab, _manager, connector) = lab_with_env("admin");
        let admin_ip = lab.admin_node_ip().expect("admin ip");
        lab.admin_remote().expect("admin remote");
        let (ip, username, password, keys) =
            connector.connections().pop().expect("connection");
        assert_eq!(ip, admin_ip);
        assert_eq!(username, "root");
        assert_eq!(password.as_deref(), Some("r00tme"));
        assert_eq!(keys, 0);
    }

    #[test]
    fn test_ssh_by_name_goes_through_cluster_record() {
        let (mut lab, _manager, connector) = lab_with_env("byname");
        let node = lab.nodes_by_names(&["slave-02"]).expect("node").remove(0);
        let cluster = MockCluster::new();
        let ip = Ipv4Addr::new(10, 20, 0, 42);
        cluster.register(&node, 7, Some(ip));
        lab.attach_cluster(cluster);

        lab.ssh_to_remote_by_name("slave-02").expect("remote");
        let (last_ip, _, _, keys) =
            connector.connections().pop().expect("connection");
        assert_eq!(last_ip, ip);
        assert_eq!(keys, 2);

        assert!(matches!(
            lab.ssh_to_remote_by_name("slave-03"),
            Err(Error::NotFound(_))
        ));
    }
}
