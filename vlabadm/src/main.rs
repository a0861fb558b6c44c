// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use slog::Logger;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vlab::config::LabSettings;
use vlab::lab::{Lab, DEFAULT_SYSLOG_PORT};
use vlab::nailgun::NailgunClient;
use vlab::provision::DEFAULT_BOOTSTRAP_TIMEOUT;
use vlab::ssh::OpenSsh;
use vlab::virsh::Virsh;
use vlab_common::cli::lab_cli_style;
use vlab_common::log::{init_file_logger, init_logger};

mod cluster;
mod show;
mod snapshot;

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = None,
    styles = lab_cli_style(),
    infer_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Lab settings file (JSON).
    #[arg(short, long, env = "VLAB_CONFIG")]
    config: Option<PathBuf>,

    /// Name of the environment to drive.
    #[arg(short, long, env = "ENV_NAME")]
    env_name: Option<String>,

    /// Installer image for the admin node.
    #[arg(long, env = "ISO_PATH")]
    iso_path: Option<PathBuf>,

    /// Directory holding environment records and disk images.
    #[arg(long, env = "VLAB_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Libvirt connection URI.
    #[arg(long, env = "LIBVIRT_DEFAULT_URI")]
    libvirt_uri: Option<String>,

    /// Nailgun API port on the admin node.
    #[arg(long)]
    nailgun_port: Option<u16>,

    /// Also write a bunyan formatted log of the run to this file.
    #[arg(long)]
    log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the environment if needed and install the admin node.
    Setup {
        /// Snapshot to take once the admin node is installed.
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// Start worker nodes and wait for them to join the cluster.
    Bootstrap {
        /// Nodes to bootstrap, all worker nodes when empty.
        nodes: Vec<String>,

        /// Seconds to wait for the nodes to register.
        #[arg(long, default_value_t = DEFAULT_BOOTSTRAP_TIMEOUT.as_secs())]
        timeout: u64,
    },

    /// Environment snapshots.
    #[command(subcommand)]
    Snapshot(snapshot::Commands),

    /// Run a command on a node.
    Exec {
        /// Node name.
        node: String,
        /// Command line to run.
        command: String,
    },

    /// Show the environment networks and nodes.
    Show {
        /// Print the environment record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Point a cluster's syslog at the host.
    Syslog {
        cluster_id: u64,
        #[arg(long, default_value_t = DEFAULT_SYSLOG_PORT)]
        port: u16,
    },

    /// List the VLANs a cluster's networks use.
    Vlans { cluster_id: u64 },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = match &cli.log_file {
        Some(path) => init_file_logger(path)?,
        None => init_logger(),
    };
    let settings = settings(&cli)?;
    let mut lab = new_lab(settings, log);

    match cli.command {
        Commands::Setup { snapshot } => {
            lab.initialize()?;
            lab.setup_environment()?;
            if let Some(name) = snapshot {
                lab.make_snapshot(&name)?;
            }
        }
        Commands::Bootstrap { nodes, timeout } => {
            attach_nailgun(&mut lab)?;
            let nodes = if nodes.is_empty() {
                lab.nodes()?.slaves().iter().map(|n| (*n).clone()).collect()
            } else {
                lab.nodes_by_names(&nodes)?
            };
            let records =
                lab.bootstrap_nodes(&nodes, Duration::from_secs(timeout))?;
            cluster::print_nodes(&nodes, &records)?;
        }
        Commands::Snapshot(command) => snapshot::commands(command, &mut lab)?,
        Commands::Exec { node, command } => exec(&mut lab, &node, &command)?,
        Commands::Show { json } => show::environment(&mut lab, json)?,
        Commands::Syslog { cluster_id, port } => {
            attach_nailgun(&mut lab)?;
            lab.add_syslog_server(cluster_id, port)?;
        }
        Commands::Vlans { cluster_id } => {
            attach_nailgun(&mut lab)?;
            cluster::print_vlans(&lab.cluster_vlans(cluster_id)?)?;
        }
    }
    Ok(())
}

fn settings(cli: &Cli) -> Result<LabSettings> {
    let mut settings = match &cli.config {
        Some(path) => LabSettings::from_file(path)?,
        None => LabSettings::default(),
    };
    if let Some(name) = &cli.env_name {
        settings.env_name = name.clone();
    }
    if let Some(iso) = &cli.iso_path {
        settings.iso_path = iso.clone();
    }
    if let Some(dir) = &cli.state_dir {
        settings.state_dir = dir.clone();
    }
    if let Some(uri) = &cli.libvirt_uri {
        settings.libvirt_uri = uri.clone();
    }
    if let Some(port) = cli.nailgun_port {
        settings.nailgun_port = port;
    }
    Ok(settings)
}

fn new_lab(settings: LabSettings, log: Logger) -> Lab {
    let manager = Arc::new(Virsh::new(&settings, log.clone()));
    let connector = Arc::new(OpenSsh::new(&settings, log.clone()));
    Lab::new(settings, manager, connector, log)
}

fn attach_nailgun(lab: &mut Lab) -> Result<()> {
    let ip = lab.admin_node_ip()?;
    let client =
        NailgunClient::new(ip, lab.settings.nailgun_port, lab.log.clone())?;
    lab.attach_cluster(Arc::new(client));
    Ok(())
}

fn exec(lab: &mut Lab, node: &str, command: &str) -> Result<()> {
    let admin = lab.admin_node()?;
    let remote = if node == admin.name {
        lab.admin_remote()?
    } else {
        attach_nailgun(lab)?;
        lab.ssh_to_remote_by_name(node)?
    };
    let result = remote.execute(command)?;
    std::io::stdout().write_all(result.stdout.as_bytes())?;
    std::io::stderr().write_all(result.stderr.as_bytes())?;
    if !result.success() {
        bail!("{command} exited with {}", result.exit_code);
    }
    Ok(())
}
