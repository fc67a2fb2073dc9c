// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use log::warn;
use molniya_session::UpdatesLike;
use std::collections::VecDeque;
use std::time::Duration;
use web_time::Instant;

/// How many updates may pile up before the consumer drains them.
const MAX_QUEUED_UPDATES: usize = 100;

/// How often at most the queue complains about dropped updates.
const OVERFLOW_LOG_COOLDOWN: Duration = Duration::from_secs(300);

/// The bounded buffer between the network task and whatever consumes
/// updates. On overflow the newest update is dropped (the consumer is
/// clearly not keeping up, and older updates are more actionable).
pub(crate) struct UpdateQueue {
    queue: VecDeque<UpdatesLike>,
    last_overflow_warning: Option<Instant>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(MAX_QUEUED_UPDATES),
            last_overflow_warning: None,
        }
    }

    pub fn push(&mut self, update: UpdatesLike) {
        if self.queue.len() >= MAX_QUEUED_UPDATES {
            let now = Instant::now();
            let should_log = self
                .last_overflow_warning
                .map(|last| now - last >= OVERFLOW_LOG_COOLDOWN)
                .unwrap_or(true);
            if should_log {
                warn!(
                    "dropping updates because the queue has not been drained in a while \
                     (this message is shown at most every {:?})",
                    OVERFLOW_LOG_COOLDOWN
                );
                self.last_overflow_warning = Some(now);
            }
            return;
        }

        self.queue.push_back(update);
    }

    /// Take every queued update, in arrival order.
    pub fn drain(&mut self) -> Vec<UpdatesLike> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
