// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use molniya_tl_types::{Deserializable, Serializable};

include!("../../includes/check_deps_documented.rs");

/// Every definition shipped under `tl/` that declares an identifier must
/// declare the CRC32 of its canonical representation.
#[test]
fn check_shipped_schema_ids() {
    for path in ["tl/api.tl", "tl/mtproto.tl"] {
        let contents = std::fs::read_to_string(path).expect("schema file must exist");
        for def in molniya_tl_parser::parse_tl_file(&contents).flatten() {
            assert_eq!(
                def.id,
                def.inferred_id(),
                "{}: {} has a non-canonical id",
                path,
                def.full_name()
            );
        }
    }
}

#[test]
fn check_flag_round_trip() {
    use molniya_tl_types::types;

    let update = types::UpdateChannelTooLong {
        channel_id: 700,
        pts: Some(100),
    };
    let no_pts = types::UpdateChannelTooLong {
        channel_id: 700,
        pts: None,
    };

    for value in [update, no_pts] {
        let bytes = value.to_bytes();
        assert_eq!(
            types::UpdateChannelTooLong::from_bytes(&bytes).unwrap(),
            value
        );
    }
}

#[test]
fn check_boxed_update_round_trip() {
    use molniya_tl_types::{enums, types};

    let update: enums::Update = types::UpdateDeleteMessages {
        messages: vec![1, 2, 3],
        pts: 10,
        pts_count: 1,
    }
    .into();

    let bytes = update.to_bytes();
    assert_eq!(enums::Update::from_bytes(&bytes).unwrap(), update);
}

#[test]
fn check_unknown_id_fails_decode_only() {
    use molniya_tl_types::enums;

    let bogus = 0xdeadbeefu32.to_le_bytes();
    assert!(matches!(
        enums::Update::from_bytes(&bogus),
        Err(molniya_tl_types::deserialize::Error::UnexpectedConstructor { id: 0xdeadbeef })
    ));
}

#[test]
fn check_name_for_id() {
    assert_eq!(molniya_tl_types::name_for_id(0x1cb5c415), "vector");
    assert_eq!(molniya_tl_types::name_for_id(0x12345678), "(unknown)");
}

#[cfg(feature = "tl-mtproto")]
mod mtproto {
    use super::*;
    use molniya_tl_types::{enums, functions, types, Identifiable};

    #[test]
    fn check_known_constructor_ids() {
        assert_eq!(functions::Ping::CONSTRUCTOR_ID, 0x7abe77ec);
        assert_eq!(types::Pong::CONSTRUCTOR_ID, 0x347773c5);
        assert_eq!(types::RpcError::CONSTRUCTOR_ID, 0x2144ca19);
        assert_eq!(types::MsgsAck::CONSTRUCTOR_ID, 0x62d6b459);
    }

    #[test]
    fn check_function_serialization() {
        let ping = functions::Ping {
            ping_id: 0x1111_2222_3333_4444,
        };
        let bytes = ping.to_bytes();
        assert_eq!(&bytes[..4], &0x7abe77ecu32.to_le_bytes());
        assert_eq!(&bytes[4..], &0x1111_2222_3333_4444i64.to_le_bytes());
    }

    #[test]
    fn check_enum_dispatch() {
        let pong = types::Pong {
            msg_id: 123,
            ping_id: 456,
        };
        let mut bytes = types::Pong::CONSTRUCTOR_ID.to_le_bytes().to_vec();
        pong.serialize(&mut bytes);

        match enums::Pong::from_bytes(&bytes).unwrap() {
            enums::Pong::Pong(x) => {
                assert_eq!(x.msg_id, 123);
                assert_eq!(x.ping_id, 456);
            }
        }
    }
}
