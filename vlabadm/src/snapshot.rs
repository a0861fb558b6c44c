// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use vlab::lab::Lab;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Suspend the environment and take a named snapshot, replacing any
    /// snapshot of the same name.
    Make { name: String },

    /// Revert to a named snapshot and resume the environment.
    Revert { name: String },
}

pub fn commands(command: Commands, lab: &mut Lab) -> Result<()> {
    match command {
        Commands::Make { name } => {
            lab.make_snapshot(&name)?;
            println!("{} {}", "snapshot taken".green(), name);
        }
        Commands::Revert { name } => {
            if !lab.revert_snapshot(&name)? {
                bail!("no snapshot named {name}");
            }
            println!("{} {}", "reverted to".green(), name);
        }
    }
    Ok(())
}
