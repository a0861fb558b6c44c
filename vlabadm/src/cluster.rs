// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use tabwriter::TabWriter;
use vlab::cluster::ClusterNode;
use vlab::topology::Node;

/// Registered cluster records next to the virtual nodes they belong to.
pub fn print_nodes(nodes: &[Node], records: &[ClusterNode]) -> Result<()> {
    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(
        &mut tw,
        "{}\t{}\t{}\t{}\t{}",
        "Node".dimmed(),
        "Id".dimmed(),
        "MAC".dimmed(),
        "Address".dimmed(),
        "Status".dimmed(),
    )?;
    for (node, record) in nodes.iter().zip(records) {
        let status = if record.online {
            record.status.green()
        } else {
            record.status.red()
        };
        writeln!(
            &mut tw,
            "{}\t{}\t{}\t{}\t{}",
            node.name,
            record.id,
            record.mac,
            record
                .ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "-".into()),
            status,
        )?;
    }
    tw.flush()?;
    Ok(())
}

pub fn print_vlans(vlans: &[u16]) -> Result<()> {
    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(&mut tw, "{}", "VLAN".dimmed())?;
    for vlan in vlans {
        writeln!(&mut tw, "{vlan}")?;
    }
    tw.flush()?;
    Ok(())
}
