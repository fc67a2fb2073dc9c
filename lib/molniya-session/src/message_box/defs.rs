// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
#[cfg(test)]
pub(super) use super::tests::Instant;
use molniya_tl_types as tl;
use std::time::Duration;
#[cfg(not(test))]
pub(super) use web_time::Instant;

/// Telegram sends `seq` equal to `0` when "it doesn't matter".
pub(super) const NO_SEQ: i32 = 0;

/// Updates with a `pts` of `0` have been observed interleaved with real
/// values (e.g. some `qts`-carrying updates); their ordering information
/// must be ignored or gap resolution starts to fail.
pub(super) const NO_PTS: i32 = 0;

/// The sentinel `date` used when building a synthetic `updates`
/// container out of something that carries no date of its own.
pub(super) const NO_DATE: i32 = 0;

/// How long to wait for an out-of-order update to show up and close a
/// possible gap before asking the server for the difference.
///
/// > It may be useful to wait up to 0.5 seconds
pub(super) const POSSIBLE_GAP_TIMEOUT: Duration = Duration::from_millis(500);

/// After this long without any update for an entry, the client fetches
/// the difference itself. Documentation recommends 15 minutes.
pub(super) const NO_UPDATES_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Limits for `updates.getChannelDifference`; bots may fetch much more
/// at once.
pub(super) const BOT_CHANNEL_DIFF_LIMIT: i32 = 100_000;
pub(super) const USER_CHANNEL_DIFF_LIMIT: i32 = 100;

/// One independently-sequenced stream of updates.
///
/// The account-wide stream covers private chats and small groups
/// (`pts`), the secondary one covers certain bot and secret-chat events
/// (`qts`), and every channel carries a `pts` of its own.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub(crate) enum Entry {
    /// Account-wide `pts`.
    AccountWide,
    /// Account-wide `qts`.
    SecretChats,
    /// Channel-specific `pts`.
    Channel(i64),
}

/// The state of one [`Entry`].
#[derive(Debug)]
pub(super) struct State {
    /// The local persistent timestamp value.
    pub(super) pts: i32,

    /// Instant at which, with no updates arriving before it, the entry
    /// fetches its own difference.
    pub(super) deadline: Instant,
}

/// A detected hole in an entry's update sequence: updates newer than
/// what the gap would contain are buffered here until the deadline.
#[derive(Debug)]
pub(super) struct PossibleGap {
    pub(super) deadline: Instant,

    /// Pending updates (those whose `pts` is too new to apply).
    pub(super) updates: Vec<tl::enums::Update>,
}

/// The ordering information carried by one update.
#[derive(Debug)]
pub(super) struct PtsInfo {
    pub(super) entry: Entry,
    pub(super) pts: i32,
    pub(super) pts_count: i32,
}

/// Returned when an update cannot be processed reliably and the caller
/// must fetch the difference to resynchronize.
#[derive(Debug, PartialEq, Eq)]
pub struct Gap;

/// Anything the sender hands over that affects update handling.
#[derive(Debug)]
pub enum UpdatesLike {
    /// A batch of updates pushed by the server (or produced by one of
    /// our own requests).
    Updates(tl::enums::Updates),

    /// Not sent by Telegram: the connection was re-established, and any
    /// updates pushed in between are lost. The caller should get the
    /// difference to recover them.
    Reconnection,
}
