// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Poll-until-deadline helper used by every wait in the lab.

use std::thread::sleep;
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("timeout waiting for {what} after {elapsed:?}")]
    Timeout { what: String, elapsed: Duration },
}

/// Call `check` every `interval` until it yields a value or `timeout` has
/// elapsed. The check always runs at least once, so a zero timeout is a
/// single check.
pub fn wait_until<T, F>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Option<T>,
{
    let start = Instant::now();
    loop {
        if let Some(value) = check() {
            return Ok(value);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(WaitError::Timeout {
                what: what.to_owned(),
                elapsed,
            });
        }
        sleep(interval.min(timeout - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_until_returns_first_value() {
        let mut calls = 0;
        let result = wait_until(
            "third call",
            Duration::from_millis(1),
            Duration::from_secs(5),
            || {
                calls += 1;
                (calls == 3).then_some(calls)
            },
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_wait_until_zero_timeout_checks_once() {
        let mut calls = 0;
        let result: Result<(), WaitError> =
            wait_until("never", Duration::from_secs(15), Duration::ZERO, || {
                calls += 1;
                None
            });
        assert_eq!(calls, 1);
        match result {
            Err(WaitError::Timeout { what, .. }) => assert_eq!(what, "never"),
            Ok(_) => panic!("expected timeout"),
        }
    }

    #[test]
    fn test_wait_until_does_not_oversleep_deadline() {
        let start = Instant::now();
        let result: Result<(), WaitError> = wait_until(
            "never",
            Duration::from_secs(60),
            Duration::from_millis(20),
            || None,
        );
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
