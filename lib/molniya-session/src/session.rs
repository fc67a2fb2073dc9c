// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::{enums, types};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use molniya_tl_types::{Deserializable, Serializable};
use snafu::Snafu;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Version byte of the single-connection export format.
const EXPORT_VERSION: u8 = b'1';

/// Errors produced when decoding previously-exported session data.
#[derive(Debug, PartialEq, Snafu)]
pub enum ImportError {
    /// The data could not be decoded or had the wrong size.
    #[snafu(display("malformed session data"))]
    Malformed,

    /// The data was produced by an unknown format version.
    #[snafu(display("unsupported session version {version}"))]
    UnsupportedVersion { version: u8 },
}

/// A datacenter the session knows about, along with the authorization
/// key negotiated with it (if any).
#[derive(Clone, Debug, PartialEq)]
pub struct DataCenter {
    pub id: i32,
    pub addr: SocketAddr,
    pub auth_key: Option<[u8; 256]>,
}

impl DataCenter {
    /// Export this datacenter and its key as a compact string:
    /// the version byte followed by the URL-safe base64 of
    /// `dc_id (u8) ‖ ip (4 or 16 bytes) ‖ port (u16, big endian) ‖ key`.
    ///
    /// Returns `None` when there is no authorization key to export.
    pub fn export(&self) -> Option<String> {
        let auth_key = self.auth_key.as_ref()?;

        let mut payload = Vec::with_capacity(1 + 16 + 2 + 256);
        payload.push(self.id as u8);
        match self.addr.ip() {
            IpAddr::V4(ip) => payload.extend(ip.octets()),
            IpAddr::V6(ip) => payload.extend(ip.octets()),
        }
        payload.extend(self.addr.port().to_be_bytes());
        payload.extend(auth_key);

        let mut result = String::with_capacity(1 + payload.len() * 4 / 3);
        result.push(EXPORT_VERSION as char);
        result.push_str(&URL_SAFE.encode(&payload));
        Some(result)
    }

    /// The inverse of [`DataCenter::export`]. Whether the address is
    /// IPv4 or IPv6 is inferred from the payload length.
    pub fn import(string: &str) -> Result<Self, ImportError> {
        let version = *string.as_bytes().first().ok_or(ImportError::Malformed)?;
        if version != EXPORT_VERSION {
            return Err(ImportError::UnsupportedVersion { version });
        }

        let payload = URL_SAFE
            .decode(&string[1..])
            .map_err(|_| ImportError::Malformed)?;

        let (ip, rest): (IpAddr, &[u8]) = match payload.len() {
            // dc_id + ip + port + key
            263 => {
                let octets: [u8; 4] = payload[1..5].try_into().unwrap();
                (Ipv4Addr::from(octets).into(), &payload[5..])
            }
            275 => {
                let octets: [u8; 16] = payload[1..17].try_into().unwrap();
                (Ipv6Addr::from(octets).into(), &payload[17..])
            }
            _ => return Err(ImportError::Malformed),
        };

        let port = u16::from_be_bytes(rest[0..2].try_into().unwrap());
        let auth_key: [u8; 256] = rest[2..].try_into().unwrap();

        Ok(Self {
            id: payload[0] as i32,
            addr: SocketAddr::new(ip, port),
            auth_key: Some(auth_key),
        })
    }

    fn to_tl(&self) -> types::DataCenter {
        let (ipv4, ipv6) = match self.addr.ip() {
            IpAddr::V4(ip) => (Some(u32::from_be_bytes(ip.octets()) as i32), None),
            IpAddr::V6(ip) => (None, Some(ip.octets())),
        };
        types::DataCenter {
            id: self.id,
            ipv4,
            ipv6,
            port: self.addr.port() as i32,
            auth: self.auth_key.map(|key| key.to_vec()),
        }
    }

    fn from_tl(dc: &types::DataCenter) -> Option<Self> {
        let ip: IpAddr = if let Some(ipv6) = dc.ipv6 {
            Ipv6Addr::from(ipv6).into()
        } else if let Some(ipv4) = dc.ipv4 {
            Ipv4Addr::from((ipv4 as u32).to_be_bytes()).into()
        } else {
            return None;
        };

        Some(Self {
            id: dc.id,
            addr: SocketAddr::new(ip, dc.port as u16),
            auth_key: dc
                .auth
                .as_deref()
                .and_then(|auth| auth.try_into().ok()),
        })
    }
}

/// The kind of peer an access hash belongs to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

/// Access hashes for peers the session has seen.
///
/// Small group chats have no hash; they are stored so lookups can still
/// answer "known, no hash required".
#[derive(Clone, Debug, Default)]
pub struct PeerCache {
    entries: HashMap<(PeerKind, i64), i64>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a peer's access hash. Chats may use a hash of zero.
    pub fn insert(&mut self, kind: PeerKind, id: i64, access_hash: i64) {
        self.entries.insert((kind, id), access_hash);
    }

    /// Look up a peer's access hash, searching all kinds when `kind` is
    /// not known by the caller.
    pub fn lookup(&self, kind: Option<PeerKind>, id: i64) -> Option<i64> {
        match kind {
            Some(kind) => self.entries.get(&(kind, id)).copied(),
            None => [PeerKind::User, PeerKind::Channel, PeerKind::Chat]
                .into_iter()
                .find_map(|kind| self.entries.get(&(kind, id)).copied()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A session: every piece of state that must survive restarts for the
/// client to resume where it left off.
#[derive(Debug, Default)]
pub struct Session {
    dcs: Vec<types::DataCenter>,
    user: Option<types::User>,
    state: Option<types::UpdateState>,
    peers: PeerCache,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a session previously produced by [`Session::save`].
    pub fn load(data: &[u8]) -> Result<Self, ImportError> {
        let enums::Session::Session(session) =
            enums::Session::from_bytes(data).map_err(|_| ImportError::Malformed)?;

        Ok(Self {
            dcs: session
                .dcs
                .into_iter()
                .map(|enums::DataCenter::Center(dc)| dc)
                .collect(),
            user: session.user.map(|enums::User::User(user)| user),
            state: session.state.map(|enums::UpdateState::State(state)| state),
            peers: PeerCache::new(),
        })
    }

    /// Serialize the session into a stable binary form.
    pub fn save(&self) -> Vec<u8> {
        enums::Session::Session(types::Session {
            dcs: self.dcs.iter().cloned().map(Into::into).collect(),
            user: self.user.clone().map(Into::into),
            state: self.state.clone().map(Into::into),
        })
        .to_bytes()
    }

    /// Build a session holding a single exported datacenter.
    pub fn import_string(string: &str) -> Result<Self, ImportError> {
        let mut session = Self::new();
        session.insert_dc(&DataCenter::import(string)?);
        Ok(session)
    }

    /// Export the home datacenter (or the first one with a key) as a
    /// string; `None` when no key has been negotiated anywhere.
    pub fn export_string(&self) -> Option<String> {
        let home = self.user.as_ref().map(|user| user.dc);
        let dc = home
            .and_then(|id| self.dc(id))
            .or_else(|| self.dcs().find(|dc| dc.auth_key.is_some()))?;
        dc.export()
    }

    /// The datacenters this session knows about.
    pub fn dcs(&self) -> impl Iterator<Item = DataCenter> + '_ {
        self.dcs.iter().filter_map(DataCenter::from_tl)
    }

    /// A single datacenter by identifier.
    pub fn dc(&self, id: i32) -> Option<DataCenter> {
        self.dcs
            .iter()
            .find(|dc| dc.id == id)
            .and_then(DataCenter::from_tl)
    }

    /// Insert or replace a datacenter.
    pub fn insert_dc(&mut self, dc: &DataCenter) {
        self.dcs.retain(|known| known.id != dc.id);
        self.dcs.push(dc.to_tl());
    }

    /// The logged-in user, as `(id, dc, bot)`.
    pub fn user(&self) -> Option<(i64, i32, bool)> {
        self.user.as_ref().map(|user| (user.id, user.dc, user.bot))
    }

    pub fn set_user(&mut self, id: i64, dc: i32, bot: bool) {
        self.user = Some(types::User { id, dc, bot });
    }

    /// The last persisted update state, if any.
    pub fn update_state(&self) -> Option<&types::UpdateState> {
        self.state.as_ref()
    }

    pub fn set_update_state(&mut self, state: types::UpdateState) {
        self.state = Some(state);
    }

    /// Remember a peer's access hash.
    pub fn insert_entity(&mut self, kind: PeerKind, id: i64, access_hash: i64) {
        self.peers.insert(kind, id, access_hash);
    }

    /// Look up a peer's access hash.
    pub fn lookup_entity(&self, kind: Option<PeerKind>, id: i64) -> Option<i64> {
        self.peers.lookup(kind, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 256] {
        let mut key = [0u8; 256];
        key.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);
        key
    }

    fn test_dc() -> DataCenter {
        DataCenter {
            id: 2,
            addr: "149.154.167.51:443".parse().unwrap(),
            auth_key: Some(test_key()),
        }
    }

    #[test]
    fn export_string_shape() {
        let exported = test_dc().export().unwrap();
        assert!(exported.starts_with('1'));
        // 263 bytes of payload make 352 base64 characters.
        assert_eq!(exported.len(), 1 + 352);
    }

    #[test]
    fn export_import_round_trip() {
        let dc = test_dc();
        let imported = DataCenter::import(&dc.export().unwrap()).unwrap();
        assert_eq!(imported, dc);
    }

    #[test]
    fn export_import_round_trip_v6() {
        let dc = DataCenter {
            id: 2,
            addr: "[2001:67c:4e8:f002::a]:443".parse().unwrap(),
            auth_key: Some(test_key()),
        };
        let imported = DataCenter::import(&dc.export().unwrap()).unwrap();
        assert_eq!(imported, dc);
    }

    #[test]
    fn import_rejects_unknown_version() {
        assert_eq!(
            DataCenter::import("2AAAA"),
            Err(ImportError::UnsupportedVersion { version: b'2' })
        );
    }

    #[test]
    fn import_rejects_bad_payload() {
        assert_eq!(DataCenter::import("1AAAA"), Err(ImportError::Malformed));
        assert_eq!(DataCenter::import(""), Err(ImportError::Malformed));
    }

    #[test]
    fn session_round_trip() {
        let mut session = Session::new();
        session.insert_dc(&test_dc());
        session.set_user(12345678, 2, false);
        session.set_update_state(types::UpdateState {
            pts: 100,
            qts: 200,
            date: 300,
            seq: 400,
            channels: vec![types::ChannelState {
                channel_id: 700,
                pts: 1,
            }
            .into()],
        });

        let reloaded = Session::load(&session.save()).unwrap();
        assert_eq!(reloaded.dc(2), Some(test_dc()));
        assert_eq!(reloaded.user(), Some((12345678, 2, false)));
        assert_eq!(reloaded.update_state().unwrap().pts, 100);
        assert_eq!(reloaded.update_state().unwrap().channels.len(), 1);
    }

    #[test]
    fn entity_lookup_by_kind() {
        let mut session = Session::new();
        session.insert_entity(PeerKind::User, 10, 123);
        session.insert_entity(PeerKind::Channel, 10, 456);

        assert_eq!(session.lookup_entity(Some(PeerKind::User), 10), Some(123));
        assert_eq!(
            session.lookup_entity(Some(PeerKind::Channel), 10),
            Some(456)
        );
        // Untyped lookups prefer users.
        assert_eq!(session.lookup_entity(None, 10), Some(123));
        assert_eq!(session.lookup_entity(None, 11), None);
    }
}
