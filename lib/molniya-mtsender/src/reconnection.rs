// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::ops::ControlFlow;
use std::time::Duration;

/// Decides whether (and when) the sender re-establishes a dropped
/// connection.
///
/// The policy is only consulted for transport-recoverable failures
/// (EOF, I/O errors, framing problems); security failures never
/// reconnect automatically.
pub trait ReconnectionPolicy: Send + Sync {
    /// Whether to attempt reconnection number `attempts + 1`, and after
    /// how long.
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration>;
}

/// Never reconnect; fail every pending request instead.
pub struct NoReconnect;

impl ReconnectionPolicy for NoReconnect {
    fn should_retry(&self, _attempts: usize) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Retry a fixed number of times, with a fixed delay in between.
pub struct FixedReconnect {
    pub attempts: usize,
    pub delay: Duration,
}

impl ReconnectionPolicy for FixedReconnect {
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration> {
        if attempts < self.attempts {
            ControlFlow::Continue(self.delay)
        } else {
            ControlFlow::Break(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_gives_up_eventually() {
        let policy = FixedReconnect {
            attempts: 2,
            delay: Duration::from_millis(10),
        };
        assert!(matches!(policy.should_retry(0), ControlFlow::Continue(_)));
        assert!(matches!(policy.should_retry(1), ControlFlow::Continue(_)));
        assert!(matches!(policy.should_retry(2), ControlFlow::Break(())));
    }

    #[test]
    fn no_reconnect_never_retries() {
        assert!(matches!(NoReconnect.should_retry(0), ControlFlow::Break(())));
    }
}
