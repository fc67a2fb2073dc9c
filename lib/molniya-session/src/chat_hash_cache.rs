// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use molniya_tl_types as tl;
use std::collections::HashMap;

/// In-memory cache mapping peers to their access hashes.
///
/// Hashes coming from `min` constructors are never stored; see
/// <https://core.telegram.org/api/min> for why they cannot be trusted.
pub struct ChatHashCache {
    users: HashMap<i64, i64>,
    channels: HashMap<i64, i64>,
    self_id: Option<i64>,
    self_bot: bool,
}

impl ChatHashCache {
    pub fn new(self_user: Option<(i64, bool)>) -> Self {
        Self {
            users: HashMap::new(),
            channels: HashMap::new(),
            self_id: self_user.map(|user| user.0),
            self_bot: self_user.map(|user| user.1).unwrap_or(false),
        }
    }

    pub fn self_id(&self) -> i64 {
        self.self_id
            .expect("tried to query self_id before it's known")
    }

    pub fn set_self_user(&mut self, id: i64, bot: bool) {
        self.self_id = Some(id);
        self.self_bot = bot;
    }

    pub fn is_self_bot(&self) -> bool {
        self.self_bot
    }

    pub fn contains_user(&self, user_id: i64) -> bool {
        self.users.contains_key(&user_id)
    }

    /// The access hash of a channel, if known.
    pub fn channel_hash(&self, channel_id: i64) -> Option<i64> {
        self.channels.get(&channel_id).copied()
    }

    /// Forget a channel's hash (e.g. because the server rejected it).
    pub fn forget_channel(&mut self, channel_id: i64) {
        self.channels.remove(&channel_id);
    }

    /// Extend the cache with the hashes carried in user and chat lists.
    pub fn extend(&mut self, users: &[tl::enums::User], chats: &[tl::enums::Chat]) {
        use tl::enums::{Chat as C, User as U};
        self.users.extend(users.iter().flat_map(|user| match user {
            U::Empty(_) => None,
            U::User(u) => u
                .access_hash
                .and_then(|hash| if u.min { None } else { Some((u.id, hash)) }),
        }));
        self.channels.extend(chats.iter().flat_map(|chat| match chat {
            C::Chat(_) | C::Forbidden(_) => None,
            C::Channel(c) => c
                .access_hash
                .and_then(|hash| if c.min { None } else { Some((c.id, hash)) }),
            C::ChannelForbidden(c) => Some((c.id, c.access_hash)),
        }));
    }

    /// Extend the cache from an updates batch, and report whether every
    /// peer the batch references afterwards has a known hash.
    ///
    /// A `false` return means processing the batch would leave the
    /// client unable to act on some peer, which callers treat as a gap.
    pub fn extend_from_updates(&mut self, updates: &tl::enums::Updates) -> bool {
        use tl::enums::Updates as U;
        match updates {
            U::TooLong => true,
            U::UpdateShortMessage(short) => self.contains_user(short.user_id),
            // Small group chats need no hash, and the sender can be
            // accessed through min constructors if needed.
            U::UpdateShortChatMessage(_) => true,
            U::UpdateShort(short) => self.update_peers_known(&short.update),
            U::Combined(combined) => {
                self.extend(&combined.users, &combined.chats);
                combined
                    .updates
                    .iter()
                    .all(|update| self.update_peers_known(update))
            }
            U::Updates(updates) => {
                self.extend(&updates.users, &updates.chats);
                updates
                    .updates
                    .iter()
                    .all(|update| self.update_peers_known(update))
            }
            U::UpdateShortSentMessage(_) => true,
        }
    }

    /// Whether every peer referenced by one update has a known hash.
    fn update_peers_known(&self, update: &tl::enums::Update) -> bool {
        use tl::enums::Update as U;
        match update {
            U::NewChannelMessage(u) => self.message_channel_known(&u.message),
            U::EditChannelMessage(u) => self.message_channel_known(&u.message),
            U::ChannelTooLong(u) => self.channels.contains_key(&u.channel_id),
            U::Channel(u) => self.channels.contains_key(&u.channel_id),
            U::ReadChannelInbox(u) => self.channels.contains_key(&u.channel_id),
            U::DeleteChannelMessages(u) => self.channels.contains_key(&u.channel_id),
            U::ChannelWebPage(u) => self.channels.contains_key(&u.channel_id),
            U::PinnedChannelMessages(u) => self.channels.contains_key(&u.channel_id),
            _ => true,
        }
    }

    fn message_channel_known(&self, message: &tl::enums::Message) -> bool {
        use tl::enums::{Message as M, Peer};
        let peer = match message {
            M::Empty(_) => None,
            M::Message(m) => Some(&m.peer_id),
            M::Service(m) => Some(&m.peer_id),
        };
        match peer {
            Some(Peer::Channel(c)) => self.channels.contains_key(&c.channel_id),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molniya_tl_types as tl;

    fn full_user(id: i64, hash: i64, min: bool) -> tl::enums::User {
        tl::types::User {
            is_self: false,
            bot: false,
            min,
            id,
            access_hash: Some(hash),
            first_name: Some("user".to_string()),
            last_name: None,
            username: None,
            phone: None,
        }
        .into()
    }

    #[test]
    fn min_hashes_are_not_trusted() {
        let mut cache = ChatHashCache::new(None);
        cache.extend(&[full_user(1, 11, false), full_user(2, 22, true)], &[]);

        assert!(cache.contains_user(1));
        assert!(!cache.contains_user(2));
    }

    #[test]
    fn short_message_requires_sender_hash() {
        let mut cache = ChatHashCache::new(Some((7, false)));
        let updates = tl::enums::Updates::UpdateShortMessage(tl::types::UpdateShortMessage {
            out: false,
            mentioned: false,
            media_unread: false,
            silent: false,
            id: 1,
            user_id: 1,
            message: "hi".to_string(),
            pts: 2,
            pts_count: 1,
            date: 1,
            via_bot_id: None,
            reply_to_msg_id: None,
            ttl_period: None,
        });

        assert!(!cache.extend_from_updates(&updates));
        cache.extend(&[full_user(1, 11, false)], &[]);
        assert!(cache.extend_from_updates(&updates));
    }
}
