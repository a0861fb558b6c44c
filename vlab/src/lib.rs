// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual lab orchestration for cluster installer integration tests.
//!
//! A [`lab::Lab`] owns one test session: it plans and provisions the
//! virtual environment, boots the admin node through an unattended install,
//! checkpoints the environment with snapshots and hands out remote shells to
//! the nodes it created.

pub mod boot;
pub mod cluster;
pub mod config;
pub mod env;
pub mod error;
pub mod lab;
pub mod manager;
pub mod nailgun;
pub mod net;
pub mod provision;
pub mod remote;
pub mod snapshot;
pub mod ssh;
pub mod topology;
pub mod virsh;

mod log;

#[cfg(test)]
mod mock;

pub const COMPONENT_VLAB: &str = "vlab";
pub const UNIT_PROVISION: &str = "provision";
pub const UNIT_BOOT: &str = "boot";
pub const UNIT_SNAPSHOT: &str = "snapshot";
pub const UNIT_REMOTE: &str = "remote";
pub const UNIT_VIRSH: &str = "virsh";
pub const UNIT_NAILGUN: &str = "nailgun";
