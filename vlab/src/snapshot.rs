// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::lab::Lab;
use crate::log::lab_log;
use crate::UNIT_SNAPSHOT;

impl Lab {
    /// Suspend the environment and save it under `name`, replacing any
    /// snapshot with the same name.
    pub fn make_snapshot(&mut self, name: &str) -> Result<(), Error> {
        let env = self.environment()?.name.clone();
        lab_log!(self.log, info, UNIT_SNAPSHOT, "making snapshot";
            "env" => &env, "snapshot" => name);
        self.manager.environment_suspend(&env)?;
        self.manager.environment_snapshot(&env, name, true)?;
        Ok(())
    }

    /// Revert to snapshot `name` and resume. Returns false, without touching
    /// the environment, when no such snapshot exists.
    pub fn revert_snapshot(&mut self, name: &str) -> Result<bool, Error> {
        let env = self.environment()?.name.clone();
        if !self.manager.environment_has_snapshot(&env, name)? {
            lab_log!(self.log, info, UNIT_SNAPSHOT, "no snapshot to revert";
                "env" => &env, "snapshot" => name);
            return Ok(false);
        }
        lab_log!(self.log, info, UNIT_SNAPSHOT, "reverting snapshot";
            "env" => &env, "snapshot" => name);
        self.manager.environment_revert(&env, name)?;
        lab_log!(self.log, info, UNIT_SNAPSHOT, "resuming environment";
            "env" => &env);
        self.manager.environment_resume(&env)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::mock::lab_with_env;
    use pretty_assertions::assert_eq;

    fn snapshot_calls(calls: Vec<String>) -> Vec<String> {
        calls
            .into_iter()
            .filter(|c| {
                c.starts_with("environment_suspend")
                    || c.starts_with("environment_snapshot")
                    || c.starts_with("environment_revert")
                    || c.starts_with("environment_resume")
            })
            .collect()
    }

    #[test]
    fn test_revert_missing_snapshot_is_side_effect_free() {
        let (mut lab, manager, _connector) = lab_with_env("revert-missing");
        assert!(!lab.revert_snapshot("empty").expect("revert"));
        assert!(snapshot_calls(manager.calls()).is_empty());
    }

    #[test]
    fn test_make_then_revert() {
        let (mut lab, manager, _connector) = lab_with_env("snap");
        lab.make_snapshot("ready").expect("snapshot");
        lab.make_snapshot("ready").expect("snapshot again");
        assert!(lab.revert_snapshot("ready").expect("revert"));
        assert_eq!(
            snapshot_calls(manager.calls()),
            vec![
                "environment_suspend snap",
                "environment_snapshot snap ready force",
                "environment_suspend snap",
                "environment_snapshot snap ready force",
                "environment_revert snap ready",
                "environment_resume snap",
            ]
        );
    }
}
