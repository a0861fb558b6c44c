// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unattended install of the admin node.

use crate::error::Error;
use crate::lab::Lab;
use crate::log::lab_log;
use crate::topology::DiskDevice;
use crate::UNIT_BOOT;
use std::net::Ipv4Addr;
use std::thread::sleep;
use std::time::Duration;
use vlab_common::wait::wait_until;

pub const BOOTSTRAP_LOG: &str = "/var/log/puppet/bootstrap_admin_node.log";
pub const BOOTSTRAP_MARKER: &str = "Finished catalog run";

/// Exits zero once the admin node's bootstrap run has finished.
pub fn bootstrap_check_command() -> String {
    format!("grep '{BOOTSTRAP_MARKER}' '{BOOTSTRAP_LOG}'")
}

/// Kernel arguments handed to the installer at the boot prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParams {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gw: Ipv4Addr,
    pub dns1: String,
    pub hostname: String,
    pub nat_interface: String,
}

impl KernelParams {
    /// Console keys that leave the boot menu, pick the kernel and append the
    /// install arguments.
    pub fn key_sequence(&self) -> String {
        format!(
            "<Esc><Enter>\n\
             <Wait>\n\
             vmlinuz initrd=initrd.img ks=cdrom:/ks.cfg\n \
             ip={}\n \
             netmask={}\n \
             gw={}\n \
             dns1={}\n \
             hostname={}\n \
             dhcp_interface={}\n \
             <Enter>\n",
            self.ip,
            self.netmask,
            self.gw,
            self.dns1,
            self.hostname,
            self.nat_interface,
        )
    }
}

impl Lab {
    pub fn kernel_params(&mut self) -> Result<KernelParams, Error> {
        let admin_net = self.settings.admin_net.clone();
        Ok(KernelParams {
            ip: self.admin_node_ip()?,
            netmask: self.net_mask(&admin_net)?,
            gw: self.router(None)?,
            dns1: self.settings.dns.clone(),
            hostname: self.settings.fqdn(),
            nat_interface: self.settings.nat_interface()?.to_owned(),
        })
    }

    /// Install the admin node from the configured ISO and wait for its
    /// bootstrap to finish.
    pub fn setup_environment(&mut self) -> Result<(), Error> {
        let env = self.environment()?.name.clone();
        let (admin, admins) = {
            let nodes = self.nodes()?;
            let admin = nodes.admin()?.clone();
            let admins: Vec<String> =
                nodes.admins.iter().map(|n| n.name.clone()).collect();
            (admin, admins)
        };

        let iso = admin.volume_by_device(DiskDevice::Cdrom).ok_or_else(|| {
            Error::Topology(format!(
                "{} has no install media volume",
                admin.name
            ))
        })?;
        lab_log!(self.log, info, UNIT_BOOT, "uploading install media";
            "volume" => &iso.name,
            "source" => self.settings.iso_path.display().to_string());
        self.manager
            .volume_upload(&env, &iso.name, &self.settings.iso_path)?;

        for name in &admins {
            self.manager.node_start(&env, name)?;
        }

        sleep(self.settings.admin_node_setup_timeout());
        let keys = self.kernel_params()?.key_sequence();
        lab_log!(self.log, info, UNIT_BOOT, "sending boot keys";
            "node" => &admin.name);
        self.manager.node_send_keys(&env, &admin.name, &keys)?;

        let ip = self.admin_node_ip()?;
        self.await_node(&admin.name, ip, self.settings.admin_boot_timeout())?;
        self.wait_bootstrap()?;
        sleep(self.settings.post_bootstrap_settle());
        self.sync_time_admin_node()
    }

    fn await_node(
        &self,
        name: &str,
        ip: Ipv4Addr,
        timeout: Duration,
    ) -> Result<(), Error> {
        lab_log!(self.log, info, UNIT_BOOT, "waiting for node to come up";
            "node" => name, "ip" => ip.to_string());
        wait_until(
            &format!("{name} to answer on {ip}"),
            self.settings.admin_boot_poll_interval(),
            timeout,
            || self.connector.reachable(ip).then_some(()),
        )?;
        Ok(())
    }

    /// Poll the admin node's bootstrap log until the completion marker
    /// shows up or the puppet timeout runs out.
    pub fn wait_bootstrap(&mut self) -> Result<(), Error> {
        lab_log!(self.log, info, UNIT_BOOT,
            "waiting while bootstrapping is in progress");
        let ip = self.admin_node_ip()?;
        let credentials = self.root_credentials(Vec::new());
        let command = bootstrap_check_command();
        let log = &self.log;
        let connector = &self.connector;

        wait_until(
            "admin node bootstrap",
            self.settings.bootstrap_poll_interval(),
            self.settings.puppet_timeout(),
            || {
                let result = connector
                    .connect(ip, &credentials)
                    .and_then(|remote| remote.execute(&command));
                match result {
                    Ok(r) => r.success().then_some(()),
                    Err(e) => {
                        lab_log!(log, debug, UNIT_BOOT,
                            "bootstrap check: {}", e);
                        None
                    }
                }
            },
        )?;

        lab_log!(self.log, info, UNIT_BOOT, "admin node bootstrap finished");
        Ok(())
    }

    pub fn sync_time_admin_node(&mut self) -> Result<(), Error> {
        let remote = self.admin_remote()?;
        self.sync_node_time(remote.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::lab_with_env;
    use crate::provision::TIME_SYNC_COMMANDS;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_sequence() {
        let params = KernelParams {
            ip: Ipv4Addr::new(10, 108, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gw: Ipv4Addr::new(10, 108, 0, 1),
            dns1: "8.8.8.8".into(),
            hostname: "nailgun.test.domain.local".into(),
            nat_interface: "eth0".into(),
        };
        assert_eq!(
            params.key_sequence(),
            "<Esc><Enter>\n<Wait>\n\
             vmlinuz initrd=initrd.img ks=cdrom:/ks.cfg\n ip=10.108.0.2\n \
             netmask=255.255.255.0\n gw=10.108.0.1\n dns1=8.8.8.8\n \
             hostname=nailgun.test.domain.local\n dhcp_interface=eth0\n \
             <Enter>\n"
        );
    }

    #[test]
    fn test_kernel_params_follow_admin_network() {
        let (mut lab, _manager, _connector) = lab_with_env("kparams");
        let admin = lab.environment().expect("env").networks[0].clone();
        let params = lab.kernel_params().expect("params");
        assert_eq!(params.gw, admin.router());
        assert_eq!(params.ip, admin.host(2).expect("host"));
        assert_eq!(params.netmask, admin.netmask());
        assert_eq!(params.nat_interface, "eth0");
    }

    #[test]
    fn test_wait_bootstrap_succeeds_on_zero_exit() {
        let (mut lab, _manager, connector) = lab_with_env("bootstrap-ok");
        connector.script(&bootstrap_check_command(), &[2, 1, 0]);
        lab.wait_bootstrap().expect("bootstrap");
        let checks = connector
            .commands()
            .into_iter()
            .filter(|(_, c)| c.starts_with("grep"))
            .count();
        assert_eq!(checks, 3);
    }

    #[test]
    fn test_wait_bootstrap_times_out() {
        let (mut lab, _manager, connector) = lab_with_env("bootstrap-never");
        lab.settings.puppet_timeout = 0;
        connector.script(&bootstrap_check_command(), &[1]);
        assert!(matches!(lab.wait_bootstrap(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_setup_environment_sequence() {
        let (mut lab, manager, connector) = lab_with_env("setup");
        connector.script(&bootstrap_check_command(), &[0]);
        lab.setup_environment().expect("setup");

        let calls = manager.calls();
        let tail: Vec<&str> = calls
            .iter()
            .map(String::as_str)
            .skip_while(|c| !c.starts_with("volume_upload"))
            .collect();
        assert_eq!(
            tail,
            vec![
                "volume_upload setup admin-iso",
                "node_start setup admin",
                "node_send_keys setup admin",
            ]
        );

        let keys = manager.sent_keys();
        assert!(keys.contains("ks=cdrom:/ks.cfg"));
        assert!(keys.contains("hostname=nailgun.test.domain.local"));

        let admin_ip = lab.admin_node_ip().expect("admin ip");
        let synced: Vec<String> = connector
            .commands()
            .into_iter()
            .filter(|(ip, _)| *ip == admin_ip)
            .map(|(_, c)| c)
            .skip(1)
            .collect();
        assert_eq!(synced, TIME_SYNC_COMMANDS.to_vec());
    }

    #[test]
    fn test_setup_environment_fails_when_admin_never_answers() {
        let (mut lab, _manager, connector) = lab_with_env("unreachable");
        lab.settings.admin_boot_timeout = 0;
        connector.set_reachable(false);
        assert!(matches!(lab.setup_environment(), Err(Error::Timeout(_))));
        assert!(connector.commands().is_empty());
    }
}
