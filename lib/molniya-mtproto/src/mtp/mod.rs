// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The stateful half of the [Mobile Transport Protocol]: zero or more
//! input requests become outgoing (possibly containerized) messages, and
//! incoming payloads are decrypted, verified and interpreted into
//! responses, errors or updates.
//!
//! [Mobile Transport Protocol]: https://core.telegram.org/mtproto/description

mod encrypted;

pub use encrypted::Encrypted;

use crate::MsgId;
use molniya_crypto as crypto;
use molniya_crypto::DequeBuffer;
use molniya_tl_types as tl;
use std::fmt;

/// The biggest transport header that may need to be prepended (the full
/// transport's length and sequence fields).
pub const MAX_TRANSPORT_HEADER_LEN: usize = 4 + 4;

/// The encrypted envelope's own header: `auth_key_id` and `msg_key`.
pub const ENCRYPTED_PACKET_HEADER_LEN: usize = 8 + 16;

/// The plaintext prefix under the envelope: `salt` and `session_id`.
pub const PLAINTEXT_HEADER_LEN: usize = 8 + 8;

/// A message header (`msg_id`, `seq_no`, `bytes`) followed by the
/// container's constructor id and message count.
pub const MESSAGE_CONTAINER_HEADER_LEN: usize = (8 + 4 + 4) + (4 + 4);

/// The largest serialized request body that can travel in one message.
/// The server closes the connection on anything bigger, so callers must
/// reject such payloads with a proper error instead of sending them.
pub const MAX_PAYLOAD_LEN: usize =
    crate::manual_tl::MessageContainer::MAXIMUM_SIZE - crate::manual_tl::Message::SIZE_OVERHEAD;

/// A response body for a previously-sent request.
pub struct RpcResult {
    /// Message identifier matching that of the outgoing request.
    pub msg_id: MsgId,
    /// Unprocessed response body for the associated request.
    pub body: Vec<u8>,
}

/// An `rpc_error` received for a previously-sent request.
pub struct RpcResultError {
    /// Message identifier matching that of the outgoing request.
    pub msg_id: MsgId,
    /// Raw RPC error in place of a response.
    pub error: tl::types::RpcError,
}

/// A `bad_msg_notification` (or `bad_server_salt`) received for a
/// previously-sent message.
pub struct BadMessage {
    /// Message identifier of the outgoing message that caused this
    /// notification.
    pub msg_id: MsgId,
    /// Status code of the notification.
    pub code: i32,
}

/// A [`DeserializeError`] scoped to one request (the rest of the
/// connection remains usable).
pub struct DeserializationFailure {
    /// Message identifier of the outgoing message whose response failed
    /// to be deserialized.
    pub msg_id: MsgId,
    /// Details about the failure.
    pub error: DeserializeError,
}

/// One result from interpreting a decrypted payload.
pub enum Deserialization {
    /// An `Updates`-like body that should be routed to update handling.
    /// Bodies of `rpc_result`s that decode to updates land here too, so
    /// that `pts` bookkeeping sees client-triggered updates.
    Update(Vec<u8>),
    /// `rpc_result` for a previously-sent request.
    RpcResult(RpcResult),
    /// `rpc_error` for a previously-sent request.
    RpcError(RpcResultError),
    /// `bad_msg_notification` for a previously-sent message.
    BadMessage(BadMessage),
    /// Deserialization failure scoped to a single request.
    Failure(DeserializationFailure),
}

impl BadMessage {
    /// Human-readable description, adapted from
    /// [Service Messages about Messages](https://core.telegram.org/mtproto/service_messages_about_messages).
    pub fn description(&self) -> &'static str {
        match self.code {
            16 => "msg_id too low",
            17 => "msg_id too high",
            18 => "incorrect two lower order msg_id bits; this is a bug",
            19 => "container msg_id is the same as msg_id of a previously received message; this is a bug",
            20 => "message too old",
            32 => "msg_seqno too low",
            33 => "msg_seqno too high",
            34 => "an even msg_seqno expected; this may be a bug",
            35 => "odd msg_seqno expected; this may be a bug",
            48 => "incorrect server salt",
            64 => "invalid container; this is likely a bug",
            _ => "unknown explanation; please report this issue",
        }
    }

    /// Whether the message that caused this notification can simply be
    /// sent again (the state that made it bad has been corrected).
    pub fn retryable(&self) -> bool {
        [16, 17, 32, 33, 48].contains(&self.code)
    }

    /// Whether the failure concerns the connection as a whole rather
    /// than the one message.
    pub fn fatal(&self) -> bool {
        !self.retryable()
    }
}

/// The error type for the deserialization of server messages.
///
/// These are connection-fatal: when one occurs the session should be
/// discarded (per-request problems surface as
/// [`Deserialization::Failure`] instead).
#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
    /// The authorization key identifier in the envelope was not ours.
    BadAuthKey { got: i64, expected: i64 },

    /// The message identifier sent by the server breaks protocol rules
    /// (server identifiers must be odd).
    BadMessageId { got: i64 },

    /// The session identifier in the envelope was not ours, meaning the
    /// session has been unexpectedly taken over.
    BadSessionId { got: i64, expected: i64 },

    /// The received buffer is too small to contain a valid message.
    MessageBufferTooSmall,

    /// The server responded with compressed data that failed to
    /// decompress.
    DecompressionFailed,

    /// A constructor that did not match our expectations was found while
    /// deserializing the envelope itself.
    UnexpectedConstructor { id: u32 },

    /// Decrypting the message failed (including message-key mismatches).
    DecryptionError(crypto::Error),

    /// Too many consecutive incoming messages had to be ignored; the
    /// connection can no longer be considered healthy.
    TooManyIgnored { count: usize },
}

impl std::error::Error for DeserializeError {}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BadAuthKey { got, expected } => {
                write!(f, "bad server auth key (got {}, expected {})", got, expected)
            }
            Self::BadMessageId { got } => write!(f, "bad server message id (got {})", got),
            Self::BadSessionId { got, expected } => {
                write!(f, "bad server session id (got {}, expected {})", got, expected)
            }
            Self::MessageBufferTooSmall => write!(
                f,
                "server responded with a payload that's too small to fit a valid message"
            ),
            Self::DecompressionFailed => write!(f, "failed to decompress server's data"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor: {:08x}", id),
            Self::DecryptionError(ref error) => write!(f, "failed to decrypt message: {}", error),
            Self::TooManyIgnored { count } => write!(
                f,
                "{} consecutive messages had to be ignored; failing the connection",
                count
            ),
        }
    }
}

impl From<tl::deserialize::Error> for DeserializeError {
    fn from(error: tl::deserialize::Error) -> Self {
        use tl::deserialize::Error as Err;

        match error {
            Err::UnexpectedEof => DeserializeError::MessageBufferTooSmall,
            Err::UnexpectedConstructor { id } => DeserializeError::UnexpectedConstructor { id },
        }
    }
}

impl From<crypto::Error> for DeserializeError {
    fn from(error: crypto::Error) -> Self {
        Self::DecryptionError(error)
    }
}

/// The protocol state machine that turns requests into outgoing payloads
/// and incoming payloads into responses.
pub trait Mtp {
    /// Serializes one request into the buffer. The same buffer must be
    /// used until [`Mtp::finalize`] is called.
    ///
    /// Returns the message identifier assigned to the request, or `None`
    /// when the buffer cannot hold more requests.
    ///
    /// # Panics
    ///
    /// Panics if the request's length is not padded to 4 bytes, or if it
    /// alone would never fit a container (roughly one megabyte). Callers
    /// are expected to reject such payloads beforehand.
    fn push(&mut self, buffer: &mut DequeBuffer<u8>, request: &[u8]) -> Option<MsgId>;

    /// Finalizes the buffer of requests, wrapping them in a container if
    /// more than one was pushed, and sealing the result.
    ///
    /// Note that the protocol may produce data to send (such as pending
    /// acknowledgements) even when no request was pushed.
    ///
    /// When a message is produced, returns the identifier the other end
    /// will acknowledge: the container's if one was used, otherwise the
    /// message's own.
    fn finalize(&mut self, buffer: &mut DequeBuffer<u8>) -> Option<MsgId>;

    /// Deserializes a single incoming payload into zero or more results.
    fn deserialize(&mut self, payload: &[u8]) -> Result<Vec<Deserialization>, DeserializeError>;

    /// Resets all per-connection volatile state (keeping long-lived
    /// material such as the authorization key and the clock offset).
    fn reset(&mut self);
}
