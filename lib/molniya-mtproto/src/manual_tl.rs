// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Manual implementations for the few envelope constructors whose bodies
//! the generated deserializers cannot express: `message` reads exactly its
//! declared length, and `rpc_result`'s inner payload is "everything that
//! remains".
use crate::mtp::DeserializeError;
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use molniya_tl_types::{self as tl, Cursor, Deserializable, Identifiable, Serializable};
use std::io::Write;

/// This struct represents the following TL definition:
///
/// ```tl
/// message msg_id:long seqno:int bytes:int body:Object = Message;
/// ```
///
/// The body is the serialized request to execute on the server, or the
/// response (or service message) coming back from it.
pub(crate) struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    // msg_id (8 bytes), seq_no (4 bytes), bytes (4 bytes)
    pub const SIZE_OVERHEAD: usize = 16;

    /// Peek the constructor ID from the body.
    pub fn constructor_id(&self) -> Result<u32, tl::deserialize::Error> {
        u32::from_bytes(&self.body)
    }

    /// Whether this message must be acknowledged.
    ///
    /// Content-related messages carry an odd sequence number; everything
    /// else (acks, containers) does not need acknowledging.
    pub fn requires_ack(&self) -> bool {
        self.seq_no % 2 == 1
    }
}

impl Serializable for Message {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for Message {
    fn deserialize(buf: &mut Cursor) -> Result<Self, tl::deserialize::Error> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;

        let len = i32::deserialize(buf)?;
        if len < 0 || len as usize > MessageContainer::MAXIMUM_SIZE {
            return Err(tl::deserialize::Error::UnexpectedEof);
        }
        let mut body = vec![0; len as usize];
        buf.read_exact(&mut body)?;

        Ok(Message {
            msg_id,
            seq_no,
            body,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult;
/// ```
pub(crate) struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl RpcResult {
    /// Peek the constructor ID from the result.
    pub fn inner_constructor(&self) -> Result<u32, tl::deserialize::Error> {
        u32::from_bytes(&self.result)
    }
}

impl Identifiable for RpcResult {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Deserializable for RpcResult {
    fn deserialize(buf: &mut Cursor) -> Result<Self, tl::deserialize::Error> {
        let constructor_id = u32::deserialize(buf)?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(tl::deserialize::Error::UnexpectedConstructor {
                id: constructor_id,
            });
        }

        let req_msg_id = i64::deserialize(buf)?;
        let mut result = Vec::new();
        buf.read_to_end(&mut result)?;

        Ok(Self { req_msg_id, result })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// msg_container#73f1f8dc messages:vector<message> = MessageContainer;
/// ```
pub(crate) struct MessageContainer {
    pub messages: Vec<Message>,
}

impl MessageContainer {
    // constructor id (4 bytes), inner vec len (4 bytes)
    pub const SIZE_OVERHEAD: usize = 8;

    /// Maximum size in bytes for the inner payload of the container.
    /// The server will close the connection if the payload is bigger.
    pub const MAXIMUM_SIZE: usize = 1_044_456 - Self::SIZE_OVERHEAD;

    /// Maximum amount of messages that can be sent inside a single
    /// container, inclusive. Beyond this limit the server responds with
    /// `BAD_MESSAGE` 64 (invalid container).
    pub const MAXIMUM_LENGTH: usize = 100;
}

impl Identifiable for MessageContainer {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Deserializable for MessageContainer {
    fn deserialize(buf: &mut Cursor) -> Result<Self, tl::deserialize::Error> {
        let constructor_id = u32::deserialize(buf)?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(tl::deserialize::Error::UnexpectedConstructor {
                id: constructor_id,
            });
        }

        let len = i32::deserialize(buf)?;
        if len < 0 {
            return Err(tl::deserialize::Error::UnexpectedEof);
        }
        let len = len as usize;
        let mut messages = Vec::with_capacity(len.min(Self::MAXIMUM_LENGTH));
        for _ in 0..len {
            messages.push(Message::deserialize(buf)?);
        }

        Ok(Self { messages })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// gzip_packed#3072cfa1 packed_data:string = Object;
/// ```
pub(crate) struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl GzipPacked {
    pub fn new(unpacked_data: &[u8]) -> Self {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        // Safe to unwrap, in-memory data should not fail.
        encoder.write_all(unpacked_data).unwrap();
        let packed_data = encoder.finish().unwrap();
        Self { packed_data }
    }

    pub fn decompress(&self) -> Result<Vec<u8>, DeserializeError> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder
            .write_all(&self.packed_data[..])
            .map_err(|_| DeserializeError::DecompressionFailed)?;
        decoder
            .finish()
            .map_err(|_| DeserializeError::DecompressionFailed)
    }
}

impl Identifiable for GzipPacked {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x3072cfa1;
}

impl Serializable for GzipPacked {
    fn serialize<B: Extend<u8>>(&self, buf: &mut B) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.packed_data.serialize(buf);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(buf: &mut Cursor) -> Result<Self, tl::deserialize::Error> {
        let constructor_id = u32::deserialize(buf)?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(tl::deserialize::Error::UnexpectedConstructor {
                id: constructor_id,
            });
        }

        let packed_data = Vec::<u8>::deserialize(buf)?;
        Ok(Self { packed_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let original = b"a moderately compressible body body body body body".to_vec();
        let packed = GzipPacked::new(&original);
        assert_eq!(packed.decompress().unwrap(), original);
    }

    #[test]
    fn gzip_rejects_garbage() {
        let packed = GzipPacked {
            packed_data: vec![1, 2, 3, 4],
        };
        assert_eq!(
            packed.decompress().unwrap_err(),
            DeserializeError::DecompressionFailed
        );
    }

    #[test]
    fn message_round_trip() {
        let message = Message {
            msg_id: 0x0102030405060708,
            seq_no: 3,
            body: b"Hey!".to_vec(),
        };
        let bytes = message.to_bytes();
        assert_eq!(bytes.len(), Message::SIZE_OVERHEAD + 4);

        let parsed = Message::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.msg_id, message.msg_id);
        assert_eq!(parsed.seq_no, message.seq_no);
        assert_eq!(parsed.body, message.body);
        assert!(parsed.requires_ack());
    }

    #[test]
    fn container_reads_exact_lengths() {
        let mut bytes = Vec::new();
        MessageContainer::CONSTRUCTOR_ID.serialize(&mut bytes);
        2i32.serialize(&mut bytes);
        Message {
            msg_id: 1,
            seq_no: 1,
            body: b"Hey!".to_vec(),
        }
        .serialize(&mut bytes);
        Message {
            msg_id: 3,
            seq_no: 2,
            body: b"Bye!Bye!".to_vec(),
        }
        .serialize(&mut bytes);

        let container = MessageContainer::from_bytes(&bytes).unwrap();
        assert_eq!(container.messages.len(), 2);
        assert_eq!(container.messages[0].body, b"Hey!");
        assert_eq!(container.messages[1].body, b"Bye!Bye!");
    }
}
