// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![deny(unsafe_code)]

//! Persistent session state for Telegram connections (datacenters,
//! authorization keys, update positions and peer hashes), plus the
//! [`MessageBox`]: the bookkeeping that decides whether a pushed update
//! can be delivered or a catch-up fetch is required.
mod chat_hash_cache;
mod dc_options;
mod generated;
mod message_box;
mod session;
pub mod storage;

pub use chat_hash_cache::ChatHashCache;
pub use dc_options::{dc_address, DEFAULT_DC, PROD_DCS, TEST_DCS};
pub use generated::types::{ChannelState, UpdateState};
pub use generated::LAYER as SESSION_VERSION;
pub use message_box::{Gap, MessageBox, PrematureEndReason, UpdatesLike};
pub use session::{DataCenter, ImportError, PeerCache, PeerKind, Session};

// Needed for the auto-generated session definitions.
use generated::{enums, types};
use molniya_tl_types::{deserialize, Deserializable, Identifiable, Serializable};
