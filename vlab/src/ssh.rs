// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote shells over the OpenSSH client. Password authentication goes
//! through `sshpass`, private keys are written to a key directory readable
//! only by the current user, one file per key source, reused across
//! sessions.

use crate::config::LabSettings;
use crate::error::RemoteError;
use crate::log::lab_log;
use crate::remote::{
    CommandResult, Credentials, PrivateKey, RemoteConnector, RemoteShell,
};
use crate::UNIT_REMOTE;
use slog::Logger;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

pub const SSH_PORT: u16 = 22;
pub const REACHABLE_TIMEOUT: Duration = Duration::from_secs(3);
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct OpenSsh {
    log: Logger,
    key_dir: PathBuf,
}

impl OpenSsh {
    pub fn new(settings: &LabSettings, log: Logger) -> Self {
        Self {
            log,
            key_dir: settings.state_dir.join("keys"),
        }
    }

    /// Writes `pem` to `name` in the key directory unless the file already
    /// holds it.
    fn write_key(&self, name: &str, pem: &str) -> Result<PathBuf, RemoteError> {
        std::fs::create_dir_all(&self.key_dir)?;
        let path = self.key_dir.join(name);
        if std::fs::read_to_string(&path).is_ok_and(|current| current == pem) {
            return Ok(path);
        }
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;
        f.write_all(pem.as_bytes())?;
        Ok(path)
    }

    fn key_files(
        &self,
        keys: &[PrivateKey],
    ) -> Result<Vec<PathBuf>, RemoteError> {
        let mut names: Vec<String> = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let mut name = key_file_name(key.source());
            if names.contains(&name) {
                name = format!("{}-{i}.pem", name.trim_end_matches(".pem"));
            }
            names.push(name);
        }
        keys.iter()
            .zip(&names)
            .map(|(key, name)| self.write_key(name, key.pem()))
            .collect()
    }
}

/// File name for a key read from `source`, a remote path such as
/// `/root/.ssh/id_rsa`.
fn key_file_name(source: &str) -> String {
    let stem: String = source
        .trim_matches('/')
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    format!("{stem}.pem")
}

impl RemoteConnector for OpenSsh {
    fn connect(
        &self,
        ip: Ipv4Addr,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteShell>, RemoteError> {
        if !self.reachable(ip) {
            return Err(RemoteError::Unreachable(ip.to_string()));
        }
        let key_files = self.key_files(&credentials.keys)?;
        lab_log!(self.log, debug, UNIT_REMOTE, "ssh session";
            "ip" => ip.to_string(),
            "user" => &credentials.username,
            "keys" => key_files.len());
        Ok(Box::new(SshSession {
            log: self.log.clone(),
            ip,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            key_files,
        }))
    }

    fn reachable(&self, ip: Ipv4Addr) -> bool {
        let addr = SocketAddr::from((ip, SSH_PORT));
        TcpStream::connect_timeout(&addr, REACHABLE_TIMEOUT).is_ok()
    }
}

pub struct SshSession {
    log: Logger,
    ip: Ipv4Addr,
    username: String,
    password: Option<String>,
    key_files: Vec<PathBuf>,
}

impl SshSession {
    /// Arguments to `ssh` that run `command` on the node.
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        if self.password.is_none() {
            args.push("-o".into());
            args.push("BatchMode=yes".into());
        }
        for key in &self.key_files {
            args.push("-i".into());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.username, self.ip));
        args.push(command.into());
        args
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = match &self.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.env("SSHPASS", password).arg("-e").arg("ssh");
                cmd
            }
            None => Command::new("ssh"),
        };
        cmd.args(self.ssh_args(command));
        cmd
    }
}

impl RemoteShell for SshSession {
    fn execute(&self, command: &str) -> Result<CommandResult, RemoteError> {
        lab_log!(self.log, trace, UNIT_REMOTE, "remote command";
            "ip" => self.ip.to_string(), "command" => command);
        let output = self.command(command).output()?;
        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn read_file(&self, path: &str) -> Result<String, RemoteError> {
        let command = format!("cat '{path}'");
        let result = self.execute(&command)?;
        if !result.success() {
            return Err(RemoteError::Command {
                command,
                exit_code: result.exit_code,
                stderr: result.stderr.trim().into(),
            });
        }
        Ok(result.stdout)
    }
}
