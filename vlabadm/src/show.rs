// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use tabwriter::TabWriter;
use vlab::lab::Lab;
use vlab::topology::NodeRole;

pub fn environment(lab: &mut Lab, json: bool) -> Result<()> {
    let env = lab.environment()?.clone();
    if json {
        println!("{}", serde_json::to_string_pretty(&env)?);
        return Ok(());
    }

    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(
        &mut tw,
        "{}\t{}\t{}\t{}\t{}",
        "Network".dimmed(),
        "Prefix".dimmed(),
        "Gateway".dimmed(),
        "Forward".dimmed(),
        "DHCP".dimmed(),
    )?;
    for net in &env.networks {
        writeln!(
            &mut tw,
            "{}\t{}\t{}\t{}\t{}",
            net.name,
            net.ip_network,
            net.router(),
            net.forward.map(|f| f.as_str()).unwrap_or("-"),
            if net.has_dhcp_server { "yes" } else { "no" },
        )?;
    }
    tw.flush()?;
    println!();

    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(
        &mut tw,
        "{}\t{}\t{}\t{}\t{}\t{}",
        "Node".dimmed(),
        "Role".dimmed(),
        "Memory".dimmed(),
        "vCPU".dimmed(),
        "Addresses".dimmed(),
        "Devices".dimmed(),
    )?;
    for node in &env.nodes {
        let role = match node.role {
            NodeRole::Admin => "admin".cyan(),
            NodeRole::Other => "worker".normal(),
        };
        let addresses: Vec<String> = node
            .interfaces
            .iter()
            .map(|i| format!("{}={}", i.network, i.address))
            .collect();
        let devices: Vec<&str> = node
            .interfaces
            .iter()
            .map(|i| i.target_dev.as_deref().unwrap_or("-"))
            .collect();
        writeln!(
            &mut tw,
            "{}\t{}\t{}M\t{}\t{}\t{}",
            node.name,
            role,
            node.memory,
            node.vcpu,
            addresses.join(" "),
            devices.join(" "),
        )?;
    }
    tw.flush()?;
    Ok(())
}
