// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Correct handling of pushed updates: detecting gaps, buffering what
//! arrives out of order, and knowing when the set of updates the client
//! should know minus the set it actually knows ("the difference") must
//! be fetched.
//!
//! Each independently-sequenced stream has an [`Entry`] in the
//! [`MessageBox`]. At any given time an entry is either on its happy
//! path, waiting on a possible gap (out-of-order updates buffered with a
//! short deadline), or getting its difference. Gaps clear when the
//! missing updates arrive on their own or when the difference closes
//! them.
mod adaptor;
mod defs;

use crate::{ChatHashCache, UpdateState};
pub(crate) use defs::Entry;
use defs::{
    Instant, PossibleGap, PtsInfo, State, BOT_CHANNEL_DIFF_LIMIT, NO_DATE, NO_PTS, NO_SEQ,
    NO_UPDATES_TIMEOUT, POSSIBLE_GAP_TIMEOUT, USER_CHANNEL_DIFF_LIMIT,
};
pub use defs::{Gap, UpdatesLike};
use log::{debug, info, trace, warn};
use molniya_tl_types as tl;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::time::Duration;

fn next_updates_deadline() -> Instant {
    Instant::now() + NO_UPDATES_TIMEOUT
}

/// Contains all live entries and processes incoming updates for them.
///
/// See <https://core.telegram.org/api/updates>.
pub struct MessageBox {
    /// The state known for each live entry.
    map: HashMap<Entry, State>,

    /// Common state shared by all entries.
    date: i32,
    seq: i32,

    /// Out-of-order updates buffered per entry, with a deadline after
    /// which the difference is fetched instead of waiting longer.
    possible_gaps: HashMap<Entry, PossibleGap>,

    /// Entries currently fetching their difference.
    getting_diff_for: HashSet<Entry>,

    /// The entry with the closest deadline, to avoid a scan per check.
    next_deadline: Option<Entry>,

    /// Scratch set reused to avoid allocating on every batch.
    tmp_entries: HashSet<Entry>,
}

/// Creation, querying, and setting base state.
#[allow(clippy::new_without_default)]
impl MessageBox {
    /// Create a new, blank [`MessageBox`].
    ///
    /// This is the only way it may return `true` from [`MessageBox::is_empty`].
    pub fn new() -> Self {
        trace!("created new message box with no previous state");
        Self {
            map: HashMap::new(),
            date: 1, // non-zero or getting difference will fail
            seq: NO_SEQ,
            possible_gaps: HashMap::new(),
            getting_diff_for: HashSet::new(),
            next_deadline: None,
            tmp_entries: HashSet::new(),
        }
    }

    /// Create a [`MessageBox`] from a previously-saved update state.
    pub fn load(state: &UpdateState) -> Self {
        trace!("created new message box with state: {:?}", state);
        let deadline = next_updates_deadline();
        let mut map = HashMap::with_capacity(2 + state.channels.len());
        map.insert(
            Entry::AccountWide,
            State {
                pts: state.pts,
                deadline,
            },
        );
        map.insert(
            Entry::SecretChats,
            State {
                pts: state.qts,
                deadline,
            },
        );
        map.extend(
            state
                .channels
                .iter()
                .map(|crate::enums::ChannelState::State(c)| {
                    (
                        Entry::Channel(c.channel_id),
                        State {
                            pts: c.pts,
                            deadline,
                        },
                    )
                }),
        );

        Self {
            map,
            date: state.date,
            seq: state.seq,
            possible_gaps: HashMap::new(),
            getting_diff_for: HashSet::new(),
            next_deadline: Some(Entry::AccountWide),
            tmp_entries: HashSet::new(),
        }
    }

    /// Return the current state in the form sessions persist.
    pub fn session_state(&self) -> UpdateState {
        UpdateState {
            pts: self
                .map
                .get(&Entry::AccountWide)
                .map(|s| s.pts)
                .unwrap_or(NO_PTS),
            qts: self
                .map
                .get(&Entry::SecretChats)
                .map(|s| s.pts)
                .unwrap_or(NO_PTS),
            date: self.date,
            seq: self.seq,
            channels: self
                .map
                .iter()
                .filter_map(|(entry, s)| match entry {
                    Entry::Channel(id) => Some(
                        crate::types::ChannelState {
                            channel_id: *id,
                            pts: s.pts,
                        }
                        .into(),
                    ),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Return true if the message box has no usable state yet.
    pub fn is_empty(&self) -> bool {
        self.map
            .get(&Entry::AccountWide)
            .map(|s| s.pts)
            .unwrap_or(NO_PTS)
            == NO_PTS
    }

    /// Return the next instant at which update handling should time out.
    ///
    /// Expired entries are marked as needing to get their difference;
    /// while any entry needs it, the current instant is returned.
    pub fn check_deadlines(&mut self) -> Instant {
        let now = Instant::now();

        if !self.getting_diff_for.is_empty() {
            return now;
        }

        let deadline = next_updates_deadline();

        // Most of the time there is zero or one gap in flight, so
        // finding the minimum is cheap.
        let deadline = if let Some(gap_deadline) =
            self.possible_gaps.values().map(|gap| gap.deadline).min()
        {
            deadline.min(gap_deadline)
        } else if let Some(state) = self.next_deadline.and_then(|entry| self.map.get(&entry)) {
            deadline.min(state.deadline)
        } else {
            deadline
        };

        if now >= deadline {
            // Every expired entry now needs to get its difference.
            self.getting_diff_for
                .extend(self.possible_gaps.iter().filter_map(|(entry, gap)| {
                    if now >= gap.deadline {
                        info!("gap was not resolved after waiting for {:?}", entry);
                        Some(entry)
                    } else {
                        None
                    }
                }));

            self.getting_diff_for
                .extend(self.map.iter().filter_map(|(entry, state)| {
                    if now >= state.deadline {
                        debug!("too much time has passed without updates for {:?}", entry);
                        Some(entry)
                    } else {
                        None
                    }
                }));

            // Same invariant as `try_begin_get_diff`: an entry getting
            // its difference cannot also have a possible gap.
            let possible_gaps = &mut self.possible_gaps;
            self.getting_diff_for.iter().for_each(|entry| {
                possible_gaps.remove(entry);
            });
        }

        deadline
    }

    /// Reset the no-update deadline of all the given entries, keeping
    /// the cached closest deadline correct.
    fn reset_deadlines(&mut self, entries: &HashSet<Entry>, deadline: Instant) {
        if entries.is_empty() {
            return;
        }
        for entry in entries {
            if let Some(state) = self.map.get_mut(entry) {
                state.deadline = deadline;
                trace!("reset deadline {:?} for {:?}", deadline, entry);
            }
        }

        if self
            .next_deadline
            .as_ref()
            .map(|next| entries.contains(next))
            .unwrap_or(false)
        {
            // The closest deadline was moved; find the new minimum.
            self.next_deadline = self
                .map
                .iter()
                .min_by_key(|(_, state)| state.deadline)
                .map(|(entry, _)| *entry);
        } else if self
            .next_deadline
            .and_then(|entry| self.map.get(&entry))
            .map(|state| deadline < state.deadline)
            .unwrap_or(true)
        {
            // The new deadline is closer than the cached one (or there
            // was none). Any of the given entries will do.
            self.next_deadline = entries.iter().next().copied();
        }
    }

    /// Convenience to reset a single entry's deadline.
    fn reset_deadline(&mut self, entry: Entry, deadline: Instant) {
        let mut entries = mem::take(&mut self.tmp_entries);
        entries.insert(entry);
        self.reset_deadlines(&entries, deadline);
        entries.clear();
        self.tmp_entries = entries;
    }

    /// Convenience to reset a channel's deadline, with optional timeout.
    fn reset_channel_deadline(&mut self, channel_id: i64, timeout: Option<i32>) {
        self.reset_deadline(
            Entry::Channel(channel_id),
            Instant::now()
                + timeout
                    .map(|t| Duration::from_secs(t as _))
                    .unwrap_or(NO_UPDATES_TIMEOUT),
        );
    }

    /// Set the update state.
    ///
    /// Should be called right after login if [`MessageBox::new`] was
    /// used, otherwise undesirable updates will be fetched.
    pub fn set_state(&mut self, state: tl::enums::updates::State) {
        trace!("setting state {:?}", state);
        let deadline = next_updates_deadline();
        let tl::enums::updates::State::State(state) = state;
        self.map.insert(
            Entry::AccountWide,
            State {
                pts: state.pts,
                deadline,
            },
        );
        self.map.insert(
            Entry::SecretChats,
            State {
                pts: state.qts,
                deadline,
            },
        );
        self.date = state.date;
        self.seq = state.seq;
    }

    /// Like [`MessageBox::set_state`], but for channels. The state will
    /// only be set when no entry was known previously.
    pub fn try_set_channel_state(&mut self, channel_id: i64, pts: i32) {
        trace!("trying to set channel state for {}: {}", channel_id, pts);
        self.map
            .entry(Entry::Channel(channel_id))
            .or_insert_with(|| State {
                pts,
                deadline: next_updates_deadline(),
            });
    }

    /// Begin getting difference for the given entry, clearing any
    /// possible gap. Does nothing when there is no known state to get
    /// the difference from.
    fn try_begin_get_diff(&mut self, entry: Entry) {
        if !self.map.contains_key(&entry) {
            debug_assert!(
                !self.possible_gaps.contains_key(&entry),
                "cannot have a possible gap for an entry with no state"
            );
            return;
        }

        self.getting_diff_for.insert(entry);
        self.possible_gaps.remove(&entry);
    }

    /// Finish getting difference for the given entry and reset its
    /// deadline.
    fn end_get_diff(&mut self, entry: Entry) {
        let removed = self.getting_diff_for.remove(&entry);
        debug_assert!(removed, "ended get diff for an entry not getting it");
        self.reset_deadline(entry, next_updates_deadline());
        debug_assert!(
            !self.possible_gaps.contains_key(&entry),
            "gaps should not be created while getting difference"
        );
    }
}

// "Normal" updates flow (processing and detection of gaps).
impl MessageBox {
    /// Make sure all the peers referenced by the updates have a known
    /// access hash, either because the batch itself carries it or
    /// because it was cached earlier.
    ///
    /// On failure, the batch must not be processed, and the caller gets
    /// [`Gap`] so it triggers a full difference fetch.
    pub fn ensure_known_peer_hashes(
        &mut self,
        updates: &tl::enums::Updates,
        chat_hashes: &mut ChatHashCache,
    ) -> Result<(), Gap> {
        if chat_hashes.extend_from_updates(updates) {
            Ok(())
        } else {
            // Updates that do not change the pts would produce an empty
            // difference; only recover when there is something to gain.
            let can_recover = match updates {
                tl::enums::Updates::UpdateShort(u) => PtsInfo::from_update(&u.update).is_some(),
                _ => true,
            };

            if can_recover {
                info!("received an update referencing an unknown peer, treating as gap");
                self.try_begin_get_diff(Entry::AccountWide);
                Err(Gap)
            } else {
                info!("received an update referencing an unknown peer, but cannot recover");
                Ok(())
            }
        }
    }

    /// Process an update batch and return what can be delivered.
    ///
    /// Updates for entries whose difference is currently being fetched
    /// are skipped: the difference will contain them.
    pub fn process_updates(
        &mut self,
        updates: tl::enums::Updates,
        chat_hashes: &ChatHashCache,
    ) -> Result<
        (
            Vec<tl::enums::Update>,
            Vec<tl::enums::User>,
            Vec<tl::enums::Chat>,
        ),
        Gap,
    > {
        trace!("processing updates: {:?}", updates);
        // `updatesCombined` groups all the fields we care about, so all
        // other forms are adapted into it first.
        let tl::types::UpdatesCombined {
            date,
            seq_start,
            seq,
            mut updates,
            users,
            chats,
        } = match adaptor::adapt(updates, chat_hashes) {
            Ok(combined) => combined,
            Err(Gap) => {
                self.try_begin_get_diff(Entry::AccountWide);
                return Err(Gap);
            }
        };

        // > For all the other [not `updates` or `updatesCombined`]
        // > constructors there is no need to check `seq`.
        if seq_start != NO_SEQ {
            match (self.seq + 1).cmp(&seq_start) {
                // Apply
                Ordering::Equal => {}
                // Ignore
                Ordering::Greater => {
                    debug!(
                        "skipping updates that were already handled at seq = {}",
                        self.seq
                    );
                    return Ok((Vec::new(), users, chats));
                }
                Ordering::Less => {
                    debug!(
                        "gap detected (local seq {}, remote seq {})",
                        self.seq, seq_start
                    );
                    self.try_begin_get_diff(Entry::AccountWide);
                    return Err(Gap);
                }
            }
        }

        fn update_sort_key(update: &tl::enums::Update) -> i32 {
            match PtsInfo::from_update(update) {
                Some(info) => info.pts - info.pts_count,
                None => NO_PTS,
            }
        }

        // The server can send updates out of order (e.g. `ReadChannelInbox`
        // with the same `pts` as the `NewChannelMessage` that follows it
        // but a count of zero), so they are sorted first.
        updates.sort_by_key(update_sort_key);

        let mut result = Vec::with_capacity(updates.len());

        // One pass: apply pts, remember possible gaps, collect entries
        // whose deadlines must be reset, and track whether any pts
        // moved (which is the condition for advancing date and seq).
        let mut any_pts_applied = false;
        let mut reset_deadlines_for = mem::take(&mut self.tmp_entries);
        for update in updates {
            let (entry, update) = self.apply_pts_info(update);
            if let Some(entry) = entry {
                reset_deadlines_for.insert(entry);
            }
            if let Some(update) = update {
                any_pts_applied |= entry.is_some();
                result.push(update);
            }
        }
        self.reset_deadlines(&reset_deadlines_for, next_updates_deadline());
        reset_deadlines_for.clear();
        self.tmp_entries = reset_deadlines_for;

        // > If the updates were applied, local *Updates* state must be
        // > updated with `seq` (unless it's 0) and `date`.
        //
        // Updates that can be applied in any order should not bump the
        // seq, or an upcoming sequenced update could be missed.
        if any_pts_applied {
            if date != NO_DATE {
                self.date = self.date.max(date);
            }
            if seq != NO_SEQ {
                self.seq = seq;
            }
        }

        if !self.possible_gaps.is_empty() {
            // A well-ordered update may have just closed a gap; retry
            // everything that was buffered.
            let keys = self.possible_gaps.keys().copied().collect::<Vec<_>>();
            for key in keys {
                self.possible_gaps
                    .get_mut(&key)
                    .unwrap()
                    .updates
                    .sort_by_key(update_sort_key);

                for _ in 0..self.possible_gaps[&key].updates.len() {
                    let update = self.possible_gaps.get_mut(&key).unwrap().updates.remove(0);
                    // Failed applications get re-buffered at the end, so
                    // the order is preserved if everything fails again.
                    if let (_, Some(update)) = self.apply_pts_info(update) {
                        result.push(update);
                    }
                }
            }

            // Gaps that became empty are resolved.
            self.possible_gaps.retain(|_, gap| !gap.updates.is_empty());
            if self.possible_gaps.is_empty() {
                debug!("successfully resolved gap by waiting");
            }
        }

        Ok((result, users, chats))
    }

    /// Try to apply one update, in `pts` order.
    ///
    /// Returns the entry the update belongs to (if it carries ordering
    /// information), and the update itself when it can be delivered now
    /// (a duplicate or a buffered out-of-order update yields `None`).
    fn apply_pts_info(
        &mut self,
        update: tl::enums::Update,
    ) -> (Option<Entry>, Option<tl::enums::Update>) {
        if let tl::enums::Update::ChannelTooLong(u) = &update {
            self.try_begin_get_diff(Entry::Channel(u.channel_id));
            return (None, None);
        }

        let info = match PtsInfo::from_update(&update) {
            Some(info) => info,
            // No pts means the update can be applied in any order.
            None => return (None, Some(update)),
        };

        if self.getting_diff_for.contains(&info.entry) {
            debug!(
                "skipping update for {:?} (getting difference, count {:?}, remote {:?})",
                info.entry, info.pts_count, info.pts
            );
            // Deliberately not buffering these either: the difference
            // will include them.
            return (Some(info.entry), None);
        }

        if let Some(state) = self.map.get(&info.entry) {
            let local_pts = state.pts;
            match (local_pts + info.pts_count).cmp(&info.pts) {
                // Apply
                Ordering::Equal => {}
                // Ignore
                Ordering::Greater => {
                    debug!(
                        "skipping update for {:?} (local {:?}, count {:?}, remote {:?})",
                        info.entry, local_pts, info.pts_count, info.pts
                    );
                    return (Some(info.entry), None);
                }
                Ordering::Less => {
                    info!(
                        "gap on update for {:?} (local {:?}, count {:?}, remote {:?})",
                        info.entry, local_pts, info.pts_count, info.pts
                    );
                    self.possible_gaps
                        .entry(info.entry)
                        .or_insert_with(|| PossibleGap {
                            deadline: Instant::now() + POSSIBLE_GAP_TIMEOUT,
                            updates: Vec::new(),
                        })
                        .updates
                        .push(update);

                    return (Some(info.entry), None);
                }
            }
        }
        // else: no previous pts known, and this update has to be the
        // first one, so the local pts must be `pts - pts_count`.

        self.map
            .entry(info.entry)
            .or_insert_with(|| State {
                pts: NO_PTS,
                deadline: next_updates_deadline(),
            })
            .pts = info.pts;

        (Some(info.entry), Some(update))
    }
}

/// Getting and applying the account-wide difference.
impl MessageBox {
    /// The request to fetch the account difference, when one is needed.
    pub fn get_difference(&mut self) -> Option<tl::functions::updates::GetDifference> {
        for entry in [Entry::AccountWide, Entry::SecretChats] {
            if self.getting_diff_for.contains(&entry) {
                debug_assert!(
                    self.map.contains_key(&entry),
                    "cannot get difference for an entry without known state"
                );

                let request = tl::functions::updates::GetDifference {
                    pts: self
                        .map
                        .get(&Entry::AccountWide)
                        .map(|s| s.pts)
                        .unwrap_or(NO_PTS),
                    pts_limit: None,
                    pts_total_limit: None,
                    date: self.date,
                    qts: self
                        .map
                        .get(&Entry::SecretChats)
                        .map(|s| s.pts)
                        .unwrap_or(NO_PTS),
                    qts_limit: None,
                };
                trace!("requesting {:?}", request);
                return Some(request);
            }
        }
        None
    }

    /// Like [`MessageBox::process_updates`], but for the result of
    /// getting difference.
    pub fn apply_difference(
        &mut self,
        difference: tl::enums::updates::Difference,
        chat_hashes: &mut ChatHashCache,
    ) -> (
        Vec<tl::enums::Update>,
        Vec<tl::enums::User>,
        Vec<tl::enums::Chat>,
    ) {
        trace!("applying account difference: {:?}", difference);
        let finish: bool;
        let result = match difference {
            tl::enums::updates::Difference::Empty(diff) => {
                debug!(
                    "handling empty difference (date = {}, seq = {}); no longer getting diff",
                    diff.date, diff.seq
                );
                finish = true;
                self.date = diff.date;
                self.seq = diff.seq;
                (Vec::new(), Vec::new(), Vec::new())
            }
            tl::enums::updates::Difference::Difference(diff) => {
                debug!(
                    "handling full difference {:?}; no longer getting diff",
                    diff.state
                );
                finish = true;
                chat_hashes.extend(&diff.users, &diff.chats);
                self.apply_difference_type(diff, chat_hashes)
            }
            tl::enums::updates::Difference::Slice(tl::types::updates::DifferenceSlice {
                new_messages,
                new_encrypted_messages,
                other_updates,
                chats,
                users,
                intermediate_state: state,
            }) => {
                debug!("handling partial difference {:?}", state);
                finish = false;
                chat_hashes.extend(&users, &chats);
                self.apply_difference_type(
                    tl::types::updates::Difference {
                        new_messages,
                        new_encrypted_messages,
                        other_updates,
                        chats,
                        users,
                        state,
                    },
                    chat_hashes,
                )
            }
            tl::enums::updates::Difference::TooLong(diff) => {
                debug!(
                    "handling too-long difference (pts = {}); no longer getting diff",
                    diff.pts
                );
                finish = true;
                // The deadline will be reset once the diff ends.
                self.map.get_mut(&Entry::AccountWide).unwrap().pts = diff.pts;
                (Vec::new(), Vec::new(), Vec::new())
            }
        };

        if finish {
            let account = self.getting_diff_for.contains(&Entry::AccountWide);
            let secret = self.getting_diff_for.contains(&Entry::SecretChats);
            debug_assert!(
                account || secret,
                "the difference was applied with no entry needing it"
            );

            if account {
                self.end_get_diff(Entry::AccountWide);
            }
            if secret {
                self.end_get_diff(Entry::SecretChats);
            }
        }

        result
    }

    fn apply_difference_type(
        &mut self,
        tl::types::updates::Difference {
            new_messages,
            new_encrypted_messages,
            other_updates: updates,
            chats,
            users,
            state: tl::enums::updates::State::State(state),
        }: tl::types::updates::Difference,
        chat_hashes: &mut ChatHashCache,
    ) -> (
        Vec<tl::enums::Update>,
        Vec<tl::enums::User>,
        Vec<tl::enums::Chat>,
    ) {
        let deadline = next_updates_deadline();
        self.map
            .entry(Entry::AccountWide)
            .or_insert_with(|| State {
                pts: NO_PTS,
                deadline,
            })
            .pts = state.pts;
        self.map
            .entry(Entry::SecretChats)
            .or_insert_with(|| State {
                pts: NO_PTS,
                deadline,
            })
            .pts = state.qts;
        self.date = state.date;
        self.seq = state.seq;

        // other_updates can contain things like UpdateChannelTooLong and
        // UpdateNewChannelMessage; they must go through the usual
        // processing so already-handled ones are discarded.
        let us = tl::enums::Updates::Updates(tl::types::Updates {
            updates,
            users,
            chats,
            date: NO_DATE,
            seq: NO_SEQ,
        });

        let (mut result_updates, users, chats) = self
            .process_updates(us, chat_hashes)
            .expect("gap is detected while applying difference");

        result_updates.extend(
            new_messages
                .into_iter()
                .map(|message| {
                    tl::types::UpdateNewMessage {
                        message,
                        pts: NO_PTS,
                        pts_count: 0,
                    }
                    .into()
                })
                .chain(new_encrypted_messages.into_iter().map(|message| {
                    tl::types::UpdateNewEncryptedMessage {
                        message,
                        qts: NO_PTS,
                    }
                    .into()
                })),
        );

        (result_updates, users, chats)
    }
}

/// Getting and applying a channel's difference.
impl MessageBox {
    /// The request to fetch some channel's difference, when one is
    /// needed and its access hash is known.
    pub fn get_channel_difference(
        &mut self,
        chat_hashes: &ChatHashCache,
    ) -> Option<tl::functions::updates::GetChannelDifference> {
        let (entry, channel_id) = self.getting_diff_for.iter().find_map(|&entry| match entry {
            Entry::Channel(id) => Some((entry, id)),
            _ => None,
        })?;

        let access_hash = match chat_hashes.channel_hash(channel_id) {
            Some(hash) => hash,
            None => {
                warn!(
                    "cannot getChannelDifference for {} as we're missing its hash",
                    channel_id
                );
                self.end_get_diff(entry);
                // Remove the outdated state so the next update can
                // settle it, instead of repeating this complaint.
                self.map.remove(&entry);
                return None;
            }
        };

        let state = self
            .map
            .get(&entry)
            .expect("cannot get difference for an entry without known state");

        let request = tl::functions::updates::GetChannelDifference {
            force: false,
            channel: tl::types::InputChannel {
                channel_id,
                access_hash,
            }
            .into(),
            filter: tl::enums::ChannelMessagesFilter::Empty,
            pts: state.pts,
            limit: if chat_hashes.is_self_bot() {
                BOT_CHANNEL_DIFF_LIMIT
            } else {
                USER_CHANNEL_DIFF_LIMIT
            },
        };
        trace!("requesting {:?}", request);
        Some(request)
    }

    /// Like [`MessageBox::process_updates`], but for the result of
    /// getting a channel's difference.
    pub fn apply_channel_difference(
        &mut self,
        request: &tl::functions::updates::GetChannelDifference,
        difference: tl::enums::updates::ChannelDifference,
        chat_hashes: &mut ChatHashCache,
    ) -> (
        Vec<tl::enums::Update>,
        Vec<tl::enums::User>,
        Vec<tl::enums::Chat>,
    ) {
        let channel_id = channel_id(request).expect("request had wrong input channel");
        trace!(
            "applying channel difference for {}: {:?}",
            channel_id,
            difference
        );
        let entry = Entry::Channel(channel_id);

        self.possible_gaps.remove(&entry);

        match difference {
            tl::enums::updates::ChannelDifference::Empty(diff) => {
                debug_assert!(diff.r#final);
                debug!(
                    "handling empty channel {} difference (pts = {}); no longer getting diff",
                    channel_id, diff.pts
                );
                self.end_get_diff(entry);
                self.map.get_mut(&entry).unwrap().pts = diff.pts;
                (Vec::new(), Vec::new(), Vec::new())
            }
            tl::enums::updates::ChannelDifference::TooLong(diff) => {
                debug_assert!(diff.r#final);
                info!(
                    "handling too-long channel {} difference; no longer getting diff",
                    channel_id
                );
                chat_hashes.extend(&diff.users, &diff.chats);

                let tl::enums::Dialog::Dialog(dialog) = diff.dialog;
                self.map.get_mut(&entry).unwrap().pts = dialog
                    .pts
                    .expect("channelDifferenceTooLong dialog did not actually contain a pts");

                self.reset_channel_deadline(channel_id, diff.timeout);
                // This form carries the latest messages, not the missed
                // ones; delivering a partial window would be misleading,
                // so nothing is returned and the caller may re-fetch.
                (Vec::new(), Vec::new(), Vec::new())
            }
            tl::enums::updates::ChannelDifference::Difference(
                tl::types::updates::ChannelDifference {
                    r#final,
                    pts,
                    timeout,
                    new_messages,
                    other_updates: updates,
                    chats,
                    users,
                },
            ) => {
                if r#final {
                    debug!(
                        "handling channel {} difference; no longer getting diff",
                        channel_id
                    );
                    self.end_get_diff(entry);
                } else {
                    debug!("handling partial channel {} difference", channel_id);
                }

                chat_hashes.extend(&users, &chats);
                self.map.get_mut(&entry).unwrap().pts = pts;

                let us = tl::enums::Updates::Updates(tl::types::Updates {
                    updates,
                    users,
                    chats,
                    date: NO_DATE,
                    seq: NO_SEQ,
                });
                let (mut result_updates, users, chats) = self
                    .process_updates(us, chat_hashes)
                    .expect("gap is detected while applying channel difference");

                result_updates.extend(new_messages.into_iter().map(|message| {
                    tl::types::UpdateNewChannelMessage {
                        message,
                        pts: NO_PTS,
                        pts_count: 0,
                    }
                    .into()
                }));
                self.reset_channel_deadline(channel_id, timeout);

                (result_updates, users, chats)
            }
        }
    }

    /// Stop getting a channel's difference before the server said it
    /// was over (because the request failed in a known way).
    pub fn end_channel_difference(
        &mut self,
        request: &tl::functions::updates::GetChannelDifference,
        reason: PrematureEndReason,
    ) {
        if let Some(channel_id) = channel_id(request) {
            trace!(
                "ending channel difference for {} because {:?}",
                channel_id,
                reason
            );
            let entry = Entry::Channel(channel_id);
            match reason {
                PrematureEndReason::TemporaryServerIssues => {
                    self.possible_gaps.remove(&entry);
                    self.end_get_diff(entry);
                }
                PrematureEndReason::Banned => {
                    self.possible_gaps.remove(&entry);
                    self.end_get_diff(entry);
                    self.map.remove(&entry);
                }
            }
        }
    }
}

/// The channel a difference request concerns, when it names one.
pub fn channel_id(request: &tl::functions::updates::GetChannelDifference) -> Option<i64> {
    match &request.channel {
        tl::enums::InputChannel::Channel(c) => Some(c.channel_id),
        tl::enums::InputChannel::Empty => None,
    }
}

/// Why a channel's difference was cut short.
#[derive(Debug)]
pub enum PrematureEndReason {
    /// The server is temporarily having trouble with this channel.
    TemporaryServerIssues,
    /// Access to the channel is gone.
    Banned,
}
