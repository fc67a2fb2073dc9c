// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{
    BadMessage, Deserialization, DeserializationFailure, DeserializeError, Mtp, RpcResult,
    RpcResultError,
};
use crate::{manual_tl, MsgId};
use getrandom::getrandom;
use log::{debug, info, trace, warn};
use molniya_crypto::{decrypt_data_v2, encrypt_data_v2, AuthKey, DequeBuffer};
use molniya_tl_types::{self as tl, Cursor, Deserializable, Identifiable, Serializable};
use std::collections::VecDeque;
use std::mem;
use web_time::{SystemTime, UNIX_EPOCH};

/// The dedup ring retains this many of the most recent remote msg_ids.
const MAX_RECENT_MSG_IDS: usize = 500;

/// Reject remote identifiers whose embedded time drifts further than
/// this from ours.
const MSG_TOO_NEW_DELTA: i64 = 30;
const MSG_TOO_OLD_DELTA: i64 = 300;

/// Something must be wrong if this many messages in a row are ignored.
const MAX_CONSECUTIVE_IGNORED: usize = 10;

/// `Updates` constructors, used to spot update bodies inside responses.
static UPDATE_IDS: [u32; 6] = [
    tl::types::UpdateShortMessage::CONSTRUCTOR_ID,
    tl::types::UpdateShortChatMessage::CONSTRUCTOR_ID,
    tl::types::UpdateShort::CONSTRUCTOR_ID,
    tl::types::UpdatesCombined::CONSTRUCTOR_ID,
    tl::types::Updates::CONSTRUCTOR_ID,
    tl::types::UpdateShortSentMessage::CONSTRUCTOR_ID,
];

/// A builder to configure [`Encrypted`] instances.
pub struct Builder {
    time_offset: i32,
    first_salt: i64,
    compression_threshold: Option<usize>,
}

impl Builder {
    /// Configures the time offset to the server's clock.
    pub fn time_offset(mut self, offset: i32) -> Self {
        self.time_offset = offset;
        self
    }

    /// Configures the first salt to use (e.g. one restored alongside the
    /// authorization key).
    pub fn first_salt(mut self, salt: i64) -> Self {
        self.first_salt = salt;
        self
    }

    /// Configures the compression threshold for outgoing messages.
    pub fn compression_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Finishes the builder into an [`Encrypted`] instance using the
    /// given authorization key.
    pub fn finish(self, auth_key: [u8; 256]) -> Encrypted {
        Encrypted {
            auth_key: AuthKey::from_bytes(auth_key),
            time_offset: self.time_offset,
            salt: self.first_salt,
            session_id: generate_session_id(),
            sequence: 0,
            last_msg_id: 0,
            pending_ack: vec![],
            compression_threshold: self.compression_threshold,
            recent_remote_ids: VecDeque::with_capacity(MAX_RECENT_MSG_IDS),
            highest_remote_id: 0,
            ignore_count: 0,
            msg_count: 0,
            latest_msg_id: None,
            results: Vec::new(),
        }
    }
}

fn generate_session_id() -> i64 {
    let mut buffer = [0u8; 8];
    getrandom(&mut buffer).expect("failed to generate a secure session_id");
    i64::from_le_bytes(buffer)
}

/// An implementation of the [Mobile Transport Protocol] for encrypted
/// messages, keyed by a long-lived authorization key.
///
/// [Mobile Transport Protocol]: https://core.telegram.org/mtproto/description
pub struct Encrypted {
    /// The authorization key used to seal and open payloads.
    auth_key: AuthKey,

    /// Offset from the server's clock, in seconds.
    time_offset: i32,

    /// The current salt to embed in outgoing payloads. The server
    /// rotates it and corrects us through `bad_server_salt`.
    salt: i64,

    /// Random identifier for this logical connection instance.
    session_id: i64,

    /// Count of content-related messages sent so far.
    sequence: i32,

    /// The identifier of the last message generated.
    last_msg_id: i64,

    /// Identifiers of content-related server messages that still need to
    /// be acknowledged.
    pending_ack: Vec<i64>,

    /// If present, outgoing payloads at least this large are compressed
    /// when compression makes them smaller.
    compression_threshold: Option<usize>,

    /// Ring of recently-seen remote identifiers, for replay rejection.
    recent_remote_ids: VecDeque<i64>,

    /// Identifier of the most recently accepted remote message; the
    /// replay check only consults the ring for identifiers at or below
    /// this watermark.
    highest_remote_id: i64,

    /// How many incoming messages in a row have been ignored.
    ignore_count: usize,

    /// How many messages are currently serialized in the buffer.
    msg_count: usize,

    /// The identifier of the last serialized message or container.
    latest_msg_id: Option<MsgId>,

    /// Results accumulated while processing one incoming payload.
    results: Vec<Deserialization>,
}

impl Encrypted {
    /// Start building a new encrypted MTP state.
    pub fn build() -> Builder {
        Builder {
            time_offset: 0,
            first_salt: 0,
            compression_threshold: crate::DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    /// The authorization key in use.
    pub fn auth_key(&self) -> [u8; 256] {
        self.auth_key.to_bytes()
    }

    /// The current time offset to the server's clock, in seconds.
    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    fn unix_now() -> (i64, u32) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");
        (now.as_secs() as i64, now.subsec_nanos())
    }

    /// Correct our time offset based on a known-valid message identifier.
    fn correct_time_offset(&mut self, msg_id: i64) {
        let (now, _) = Self::unix_now();
        let correct = msg_id >> 32;
        self.time_offset = (correct - now) as i32;
        // Start over, or the next generated identifier would still be
        // based on the old (wrong) clock.
        self.last_msg_id = 0;
        debug!("corrected time offset to {}s", self.time_offset);
    }

    /// Generates a new message identifier based on the current time with
    /// the known offset applied. Identifiers are strictly increasing and
    /// their lower two bits are always zero for client messages.
    fn get_new_msg_id(&mut self) -> i64 {
        let (secs, nanos) = Self::unix_now();
        let new_msg_id = ((secs + self.time_offset as i64) << 32) | ((nanos as i64) << 2);

        let new_msg_id = if self.last_msg_id >= new_msg_id {
            self.last_msg_id + 4
        } else {
            new_msg_id
        };

        self.last_msg_id = new_msg_id;
        new_msg_id
    }

    /// Generates the next sequence number: `2k+1` for content-related
    /// messages (which bump `k`), `2k` for service ones.
    fn get_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let result = self.sequence * 2 + 1;
            self.sequence += 1;
            result
        } else {
            self.sequence * 2
        }
    }

    /// Serializes one message with a fresh identifier into the buffer.
    fn serialize_msg(
        &mut self,
        buffer: &mut DequeBuffer<u8>,
        body: &[u8],
        content_related: bool,
    ) -> MsgId {
        let msg_id = self.get_new_msg_id();

        msg_id.serialize(buffer);
        self.get_seq_no(content_related).serialize(buffer);
        (body.len() as i32).serialize(buffer);
        buffer.extend(body.iter().copied());

        self.msg_count += 1;
        self.latest_msg_id = Some(MsgId(msg_id));
        MsgId(msg_id)
    }

    /// Serializes any pending acknowledgements as a service message.
    fn serialize_pending_ack(&mut self, buffer: &mut DequeBuffer<u8>) {
        if self.pending_ack.is_empty() {
            return;
        }

        let body = tl::enums::MsgsAck::Ack(tl::types::MsgsAck {
            msg_ids: mem::take(&mut self.pending_ack),
        })
        .to_bytes();
        self.serialize_msg(buffer, &body, false);
    }

    /// `finalize`, but without the encryption step.
    fn finalize_plain(&mut self, buffer: &mut DequeBuffer<u8>) -> Option<MsgId> {
        self.serialize_pending_ack(buffer);
        if self.msg_count == 0 {
            return None;
        }

        if self.msg_count != 1 {
            // Give the container its own identifier and header.
            let mut header = Vec::with_capacity(super::MESSAGE_CONTAINER_HEADER_LEN);
            let msg_id = self.get_new_msg_id();
            msg_id.serialize(&mut header);
            self.get_seq_no(false).serialize(&mut header);
            ((buffer.len() + manual_tl::MessageContainer::SIZE_OVERHEAD) as i32)
                .serialize(&mut header);
            manual_tl::MessageContainer::CONSTRUCTOR_ID.serialize(&mut header);
            (self.msg_count as i32).serialize(&mut header);
            buffer.extend_front(&header);
            self.latest_msg_id = Some(MsgId(msg_id));
        }

        buffer.extend_front(&self.session_id.to_le_bytes());
        buffer.extend_front(&self.salt.to_le_bytes());

        self.msg_count = 0;
        self.latest_msg_id
    }

    /// Interprets one decrypted message, accumulating the outcome.
    fn process_message(&mut self, message: manual_tl::Message) {
        if message.requires_ack() {
            self.pending_ack.push(message.msg_id);
        }

        let constructor_id = match message.constructor_id() {
            Ok(x) => x,
            Err(e) => {
                warn!("received message without a readable constructor: {}", e);
                return;
            }
        };

        // Service messages, in the order they appear in
        // https://core.telegram.org/mtproto/service_messages.
        let result = match constructor_id {
            manual_tl::RpcResult::CONSTRUCTOR_ID => self.handle_rpc_result(message),
            tl::types::MsgsAck::CONSTRUCTOR_ID => self.handle_ack(message),
            tl::types::BadMsgNotification::CONSTRUCTOR_ID
            | tl::types::BadServerSalt::CONSTRUCTOR_ID => self.handle_bad_notification(message),
            tl::types::MsgsStateReq::CONSTRUCTOR_ID | tl::types::MsgResendReq::CONSTRUCTOR_ID => {
                self.handle_state_req(message)
            }
            tl::types::MsgsStateInfo::CONSTRUCTOR_ID | tl::types::MsgsAllInfo::CONSTRUCTOR_ID => {
                self.handle_state_info(message)
            }
            tl::types::MsgDetailedInfo::CONSTRUCTOR_ID
            | tl::types::MsgNewDetailedInfo::CONSTRUCTOR_ID => self.handle_detailed_info(message),
            tl::types::FutureSalts::CONSTRUCTOR_ID => self.handle_future_salts(message),
            tl::types::Pong::CONSTRUCTOR_ID => self.handle_pong(message),
            tl::types::DestroySessionOk::CONSTRUCTOR_ID
            | tl::types::DestroySessionNone::CONSTRUCTOR_ID => {
                self.handle_destroy_session(message)
            }
            tl::types::NewSessionCreated::CONSTRUCTOR_ID => {
                self.handle_new_session_created(message)
            }
            manual_tl::MessageContainer::CONSTRUCTOR_ID => self.handle_container(message),
            manual_tl::GzipPacked::CONSTRUCTOR_ID => self.handle_gzip_packed(message),
            tl::types::HttpWait::CONSTRUCTOR_ID => Ok(()),
            _ => self.handle_update(message),
        };

        if let Err(error) = result {
            // A service message that fails to parse casts doubt on the
            // whole payload, but it does not compromise the connection.
            warn!("failed to deserialize a service message: {}", error);
        }
    }

    /// **Response to an RPC query.**
    ///
    /// ```tl
    /// rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult;
    /// ```
    ///
    /// The result is matched to the outgoing request via `req_msg_id`,
    /// and may be an `rpc_error`, a `gzip_packed` wrapper, or the bare
    /// return value.
    fn handle_rpc_result(&mut self, message: manual_tl::Message) -> Result<(), DeserializeError> {
        let rpc_result = manual_tl::RpcResult::from_bytes(&message.body)?;
        let inner_constructor = rpc_result.inner_constructor();
        let manual_tl::RpcResult { req_msg_id, result } = rpc_result;
        let msg_id = MsgId(req_msg_id);

        let inner_constructor = match inner_constructor {
            Ok(x) => x,
            Err(e) => {
                self.results.push(Deserialization::Failure(DeserializationFailure {
                    msg_id,
                    error: e.into(),
                }));
                return Ok(());
            }
        };

        match inner_constructor {
            tl::types::RpcError::CONSTRUCTOR_ID => {
                match tl::enums::RpcError::from_bytes(&result) {
                    Ok(tl::enums::RpcError::Error(error)) => self
                        .results
                        .push(Deserialization::RpcError(RpcResultError { msg_id, error })),
                    Err(e) => self.results.push(Deserialization::Failure(
                        DeserializationFailure {
                            msg_id,
                            error: e.into(),
                        },
                    )),
                }
            }

            // Answers to `rpc_drop_answer`; the drop request itself is
            // resolved through its own `rpc_result`.
            tl::types::RpcAnswerUnknown::CONSTRUCTOR_ID
            | tl::types::RpcAnswerDroppedRunning::CONSTRUCTOR_ID
            | tl::types::RpcAnswerDropped::CONSTRUCTOR_ID => {
                self.results
                    .push(Deserialization::RpcResult(RpcResult { msg_id, body: result }));
            }

            // The server does not compress errors (the overhead would
            // outweigh the benefit), so a compressed body is an answer.
            manual_tl::GzipPacked::CONSTRUCTOR_ID => {
                match manual_tl::GzipPacked::from_bytes(&result) {
                    Ok(gzip) => match gzip.decompress() {
                        Ok(body) => {
                            self.store_own_updates(&body);
                            self.results
                                .push(Deserialization::RpcResult(RpcResult { msg_id, body }));
                        }
                        Err(error) => self.results.push(Deserialization::Failure(
                            DeserializationFailure { msg_id, error },
                        )),
                    },
                    Err(e) => self.results.push(Deserialization::Failure(
                        DeserializationFailure {
                            msg_id,
                            error: e.into(),
                        },
                    )),
                }
            }
            _ => {
                self.store_own_updates(&result);
                self.results
                    .push(Deserialization::RpcResult(RpcResult { msg_id, body: result }));
            }
        }

        Ok(())
    }

    /// Responses that carry an `Updates` body must also be processed as
    /// updates, or the `pts` bookkeeping above would eventually find
    /// gaps that were never real.
    fn store_own_updates(&mut self, body: &[u8]) {
        if let Ok(body_id) = u32::from_bytes(body) {
            if UPDATE_IDS.contains(&body_id) {
                self.results.push(Deserialization::Update(body.to_vec()));
            }
        }
    }

    /// **Acknowledgment of receipt.**
    ///
    /// ```tl
    /// msgs_ack#62d6b459 msg_ids:Vector<long> = MsgsAck;
    /// ```
    ///
    /// The server acknowledged some of our messages. Requests are only
    /// resolved by their results, so there is nothing else to do.
    fn handle_ack(&mut self, message: manual_tl::Message) -> Result<(), DeserializeError> {
        let tl::enums::MsgsAck::Ack(ack) = tl::enums::MsgsAck::from_bytes(&message.body)?;
        trace!("server acknowledged {} message(s)", ack.msg_ids.len());
        Ok(())
    }

    /// **Notice of ignored error message.**
    ///
    /// ```tl
    /// bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int error_code:int = BadMsgNotification;
    /// bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int error_code:int new_server_salt:long = BadMsgNotification;
    /// ```
    ///
    /// Codes 16 and 17 mean our clock is skewed: the notification's own
    /// identifier carries the correct time, so the offset is fixed from
    /// it. Codes 32 and 33 mean the sequence number drifted. Code 48
    /// arrives as `bad_server_salt` together with the correct salt.
    fn handle_bad_notification(
        &mut self,
        message: manual_tl::Message,
    ) -> Result<(), DeserializeError> {
        let bad_msg = tl::enums::BadMsgNotification::from_bytes(&message.body)?;

        let bad_msg = match bad_msg {
            tl::enums::BadMsgNotification::BadServerSalt(x) => {
                debug!("got bad salt; replacing salt and retrying");
                self.salt = x.new_server_salt;
                self.results.push(Deserialization::BadMessage(BadMessage {
                    msg_id: MsgId(x.bad_msg_id),
                    code: x.error_code,
                }));
                return Ok(());
            }
            tl::enums::BadMsgNotification::Notification(x) => x,
        };

        self.results.push(Deserialization::BadMessage(BadMessage {
            msg_id: MsgId(bad_msg.bad_msg_id),
            code: bad_msg.error_code,
        }));

        match bad_msg.error_code {
            16 | 17 => {
                // Sent msg_id was too low or too high: our clock is off.
                self.correct_time_offset(message.msg_id);
            }
            32 => {
                // Sent seq_no was too low. Bump it by some large-ish value.
                self.sequence += 64;
            }
            33 => {
                // Sent seq_no was too high (rarely seen in practice).
                self.sequence -= 16;
            }
            _ => {}
        }

        Ok(())
    }

    /// **Request for message status information.**
    ///
    /// The server wants to know what we know about some messages. We do
    /// not keep enough history to answer usefully, so the request is
    /// only logged.
    fn handle_state_req(&mut self, _message: manual_tl::Message) -> Result<(), DeserializeError> {
        debug!("got a message-state request; ignoring");
        Ok(())
    }

    /// **Informational message regarding status of messages.**
    fn handle_state_info(&mut self, _message: manual_tl::Message) -> Result<(), DeserializeError> {
        debug!("got message-state info; ignoring");
        Ok(())
    }

    /// **Extended voluntary communication of status of one message.**
    ///
    /// ```tl
    /// msg_detailed_info#276d3ec6 msg_id:long answer_msg_id:long bytes:int status:int = MsgDetailedInfo;
    /// msg_new_detailed_info#809db6df answer_msg_id:long bytes:int status:int = MsgDetailedInfo;
    /// ```
    ///
    /// The server is telling us about an answer we apparently never
    /// acknowledged; acknowledging it now settles the matter.
    fn handle_detailed_info(
        &mut self,
        message: manual_tl::Message,
    ) -> Result<(), DeserializeError> {
        let msg_detailed = tl::enums::MsgDetailedInfo::from_bytes(&message.body)?;
        match msg_detailed {
            tl::enums::MsgDetailedInfo::Info(x) => {
                self.pending_ack.push(x.answer_msg_id);
            }
            tl::enums::MsgDetailedInfo::MsgNewDetailedInfo(x) => {
                self.pending_ack.push(x.answer_msg_id);
            }
        }
        Ok(())
    }

    /// **Request for several future salts.**
    ///
    /// ```tl
    /// future_salts#ae500895 req_msg_id:long now:int salts:vector<future_salt> = FutureSalts;
    /// ```
    ///
    /// This is the response to a `get_future_salts` request, so it
    /// resolves like any other RPC result.
    fn handle_future_salts(&mut self, message: manual_tl::Message) -> Result<(), DeserializeError> {
        let tl::enums::FutureSalts::Salts(salts) =
            tl::enums::FutureSalts::from_bytes(&message.body)?;

        self.results.push(Deserialization::RpcResult(RpcResult {
            msg_id: MsgId(salts.req_msg_id),
            body: message.body,
        }));
        Ok(())
    }

    /// **Ping messages (PING/PONG).**
    ///
    /// ```tl
    /// pong#347773c5 msg_id:long ping_id:long = Pong;
    /// ```
    ///
    /// `msg_id` is the identifier of the `ping` that caused this pong,
    /// so it resolves like any other RPC result.
    fn handle_pong(&mut self, message: manual_tl::Message) -> Result<(), DeserializeError> {
        let tl::enums::Pong::Pong(pong) = tl::enums::Pong::from_bytes(&message.body)?;

        self.results.push(Deserialization::RpcResult(RpcResult {
            msg_id: MsgId(pong.msg_id),
            body: message.body,
        }));
        Ok(())
    }

    /// **Request to destroy session.**
    fn handle_destroy_session(
        &mut self,
        _message: manual_tl::Message,
    ) -> Result<(), DeserializeError> {
        debug!("got destroy session result; ignoring");
        Ok(())
    }

    /// **New session creation notification.**
    ///
    /// ```tl
    /// new_session_created#9ec20908 first_msg_id:long unique_id:long server_salt:long = NewSession;
    /// ```
    ///
    /// The server had to create a new session for us, and shipped the
    /// salt to use with it. There may be a gap in pushed updates around
    /// this point; the update machinery recovers via its own deadlines.
    fn handle_new_session_created(
        &mut self,
        message: manual_tl::Message,
    ) -> Result<(), DeserializeError> {
        let tl::enums::NewSession::Created(new_session) =
            tl::enums::NewSession::from_bytes(&message.body)?;
        info!("server created a new session");
        self.salt = new_session.server_salt;
        Ok(())
    }

    /// **Containers.**
    ///
    /// ```tl
    /// msg_container#73f1f8dc messages:vector<message> = MessageContainer;
    /// ```
    ///
    /// Each inner message is processed as if it had arrived on its own.
    fn handle_container(&mut self, message: manual_tl::Message) -> Result<(), DeserializeError> {
        let container = manual_tl::MessageContainer::from_bytes(&message.body)?;
        for inner_message in container.messages {
            self.process_message(inner_message);
        }

        Ok(())
    }

    /// **Packed object.**
    ///
    /// ```tl
    /// gzip_packed#3072cfa1 packed_data:string = Object;
    /// ```
    ///
    /// Transparently decompressed and processed as the inner object.
    fn handle_gzip_packed(&mut self, message: manual_tl::Message) -> Result<(), DeserializeError> {
        let container = manual_tl::GzipPacked::from_bytes(&message.body)?;
        let body = container.decompress()?;
        self.process_message(manual_tl::Message { body, ..message });
        Ok(())
    }

    /// Everything that is not a service message is an update.
    fn handle_update(&mut self, message: manual_tl::Message) -> Result<(), DeserializeError> {
        self.results.push(Deserialization::Update(message.body));
        Ok(())
    }

    /// Count one more ignored message; too many in a row fail the
    /// connection.
    fn count_ignored(&mut self) -> Result<(), DeserializeError> {
        self.ignore_count += 1;
        if self.ignore_count >= MAX_CONSECUTIVE_IGNORED {
            Err(DeserializeError::TooManyIgnored {
                count: self.ignore_count,
            })
        } else {
            Ok(())
        }
    }

    /// Runs the inbound verification ladder over a decrypted payload and
    /// processes the message it carries.
    ///
    /// Split from [`Mtp::deserialize`] so the checks can be exercised
    /// without a full encryption round-trip.
    fn deserialize_plaintext(
        &mut self,
        plaintext: &[u8],
    ) -> Result<Vec<Deserialization>, DeserializeError> {
        if plaintext.len() < super::PLAINTEXT_HEADER_LEN + manual_tl::Message::SIZE_OVERHEAD {
            return Err(DeserializeError::MessageBufferTooSmall);
        }

        let mut buffer = Cursor::from_slice(plaintext);
        let _salt = i64::deserialize(&mut buffer)?;

        let session_id = i64::deserialize(&mut buffer)?;
        if session_id != self.session_id {
            return Err(DeserializeError::BadSessionId {
                got: session_id,
                expected: self.session_id,
            });
        }

        let message = manual_tl::Message::deserialize(&mut buffer)?;

        // Server-originated identifiers are odd.
        if message.msg_id % 2 != 1 {
            return Err(DeserializeError::BadMessageId {
                got: message.msg_id,
            });
        }

        // Each identifier is accepted at most once.
        if message.msg_id <= self.highest_remote_id
            && self.recent_remote_ids.contains(&message.msg_id)
        {
            warn!("server resent the older message {}, ignoring", message.msg_id);
            self.count_ignored()?;
            return Ok(Vec::new());
        }

        // Notifications that correct our clock or salt are exempt from
        // the time-window check, because they are the fix for it.
        let exempt = matches!(
            message.constructor_id(),
            Ok(tl::types::BadServerSalt::CONSTRUCTOR_ID)
                | Ok(tl::types::BadMsgNotification::CONSTRUCTOR_ID)
        );
        if !exempt {
            let (secs, _) = Self::unix_now();
            let now = secs + self.time_offset as i64;
            let delta = now - (message.msg_id >> 32);
            if delta > MSG_TOO_OLD_DELTA {
                warn!("server sent a very old message {}, ignoring", message.msg_id);
                self.count_ignored()?;
                return Ok(Vec::new());
            }
            if -delta > MSG_TOO_NEW_DELTA {
                warn!("server sent a very new message {}, ignoring", message.msg_id);
                self.count_ignored()?;
                return Ok(Vec::new());
            }
        }

        if self.recent_remote_ids.len() == MAX_RECENT_MSG_IDS {
            self.recent_remote_ids.pop_front();
        }
        self.recent_remote_ids.push_back(message.msg_id);
        self.highest_remote_id = message.msg_id;
        self.ignore_count = 0;

        self.process_message(message);

        Ok(mem::take(&mut self.results))
    }
}

impl Mtp for Encrypted {
    fn push(&mut self, buffer: &mut DequeBuffer<u8>, request: &[u8]) -> Option<MsgId> {
        // Acknowledgements travel with whatever request goes out first;
        // they are serialized before it so they are sent out as soon as
        // possible.
        self.serialize_pending_ack(buffer);

        if self.msg_count >= manual_tl::MessageContainer::MAXIMUM_LENGTH {
            return None;
        }

        // The sender rejects oversized payloads with a proper error;
        // anything that reaches this point must fit.
        assert!(
            request.len() + manual_tl::Message::SIZE_OVERHEAD
                <= manual_tl::MessageContainer::MAXIMUM_SIZE
        );
        assert!(request.len() % 4 == 0);

        // Payloads pushed by the caller are always content-related,
        // which also means compression may apply.
        let mut body = request;
        let compressed;
        if let Some(threshold) = self.compression_threshold {
            if request.len() >= threshold {
                compressed = manual_tl::GzipPacked::new(request).to_bytes();
                if compressed.len() < request.len() {
                    body = &compressed;
                }
            }
        }

        let new_size = buffer.len() + body.len() + manual_tl::Message::SIZE_OVERHEAD;
        if new_size >= manual_tl::MessageContainer::MAXIMUM_SIZE {
            // This request does not fit in the current container.
            return None;
        }

        Some(self.serialize_msg(buffer, body, true))
    }

    fn finalize(&mut self, buffer: &mut DequeBuffer<u8>) -> Option<MsgId> {
        let msg_id = self.finalize_plain(buffer)?;
        encrypt_data_v2(buffer, &self.auth_key);
        Some(msg_id)
    }

    fn deserialize(&mut self, payload: &[u8]) -> Result<Vec<Deserialization>, DeserializeError> {
        if payload.len() < super::ENCRYPTED_PACKET_HEADER_LEN {
            return Err(DeserializeError::MessageBufferTooSmall);
        }

        let plaintext = decrypt_data_v2(payload, &self.auth_key)?;
        self.deserialize_plaintext(&plaintext)
    }

    fn reset(&mut self) {
        self.salt = 0;
        self.session_id = generate_session_id();
        self.sequence = 0;
        self.last_msg_id = 0;
        self.pending_ack.clear();
        self.recent_remote_ids.clear();
        self.highest_remote_id = 0;
        self.ignore_count = 0;
        self.msg_count = 0;
        self.latest_msg_id = None;
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // salt + session_id
    const MESSAGE_PREFIX_LEN: usize = 16;

    // gzip_packed#3072cfa1 packed_data:string = Object;
    const GZIP_PACKED_HEADER: [u8; 4] = [0xa1, 0xcf, 0x72, 0x30];

    // msg_container#73f1f8dc messages:vector<message> = MessageContainer;
    const MSG_CONTAINER_HEADER: [u8; 4] = [0xdc, 0xf8, 0xf1, 0x73];

    const REQUEST: &[u8] = b"Hey!";
    const REQUEST_B: &[u8] = b"Bye!";

    fn auth_key() -> [u8; 256] {
        [0; 256]
    }

    fn new_buffer() -> DequeBuffer<u8> {
        DequeBuffer::with_capacity(0, 128)
    }

    fn ensure_buffer_is_message(buffer: &[u8], body: &[u8], seq_no: u8) {
        // msg_id is time-based, but it should not be zero.
        assert_ne!(&buffer[0..8], [0, 0, 0, 0, 0, 0, 0, 0]);
        // seq_no is an ever-increasing odd number for content messages.
        assert_eq!(&buffer[8..12], [seq_no, 0, 0, 0]);
        // bytes is the length of the body.
        assert_eq!(&buffer[12..16], [body.len() as u8, 0, 0, 0]);
        // the body follows.
        assert_eq!(&buffer[16..], body);
    }

    /// Build a valid plaintext the server could have produced.
    fn make_plaintext(mtp: &Encrypted, msg_id: i64, seq_no: i32, body: &[u8]) -> Vec<u8> {
        let mut plaintext = Vec::new();
        0i64.serialize(&mut plaintext); // salt
        mtp.session_id.serialize(&mut plaintext);
        manual_tl::Message {
            msg_id,
            seq_no,
            body: body.to_vec(),
        }
        .serialize(&mut plaintext);
        plaintext
    }

    /// A server-style (odd) message identifier `offset_secs` away from now.
    fn server_msg_id(offset_secs: i64) -> i64 {
        let (secs, _) = Encrypted::unix_now();
        ((secs + offset_secs) << 32) | 1
    }

    #[test]
    fn serialization_has_salt_and_session_id() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = new_buffer();

        mtp.push(&mut buffer, REQUEST);
        mtp.finalize_plain(&mut buffer);

        // The default salt is zero.
        assert_eq!(&buffer[0..8], [0, 0, 0, 0, 0, 0, 0, 0]);
        // The session id should be random.
        assert_ne!(&buffer[8..16], [0, 0, 0, 0, 0, 0, 0, 0]);

        ensure_buffer_is_message(&buffer[MESSAGE_PREFIX_LEN..], REQUEST, 1);
    }

    #[test]
    fn correct_single_serialization() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = new_buffer();

        assert!(mtp.push(&mut buffer, REQUEST).is_some());
        mtp.finalize_plain(&mut buffer);

        ensure_buffer_is_message(&buffer[MESSAGE_PREFIX_LEN..], REQUEST, 1);
    }

    #[test]
    fn correct_multi_serialization() {
        let mut mtp = Encrypted::build()
            .compression_threshold(None)
            .finish(auth_key());
        let mut buffer = new_buffer();

        assert!(mtp.push(&mut buffer, REQUEST).is_some());
        assert!(mtp.push(&mut buffer, REQUEST_B).is_some());
        mtp.finalize_plain(&mut buffer);
        let buffer = &buffer[MESSAGE_PREFIX_LEN..];

        // The container's msg_id is newer than the inner ones.
        assert_ne!(&buffer[0..8], [0, 0, 0, 0, 0, 0, 0, 0]);
        // Its seq_no is the next even (service) value after 1 and 3.
        assert_eq!(&buffer[8..12], [4, 0, 0, 0]);
        // Its byte length: two 20-byte messages plus its own 8 bytes.
        assert_eq!(&buffer[12..16], [48, 0, 0, 0]);

        assert_eq!(&buffer[16..20], MSG_CONTAINER_HEADER);
        assert_eq!(&buffer[20..24], [2, 0, 0, 0]);

        ensure_buffer_is_message(&buffer[24..44], REQUEST, 1);
        ensure_buffer_is_message(&buffer[44..], REQUEST_B, 3);
    }

    #[test]
    fn finalize_returns_container_id_for_multiple_messages() {
        let mut mtp = Encrypted::build()
            .compression_threshold(None)
            .finish(auth_key());
        let mut buffer = new_buffer();

        let first = mtp.push(&mut buffer, REQUEST).unwrap();
        let second = mtp.push(&mut buffer, REQUEST_B).unwrap();
        let container = mtp.finalize_plain(&mut buffer).unwrap();

        assert!(first < second);
        assert!(second < container);
    }

    #[test]
    fn msg_ids_are_increasing_and_word_aligned() {
        let mut mtp = Encrypted::build().finish(auth_key());

        let mut last = 0;
        for _ in 0..100 {
            let id = mtp.get_new_msg_id();
            assert!(id > last);
            assert_eq!(id & 0b11, 0);
            last = id;
        }
    }

    #[test]
    fn seq_no_parity() {
        let mut mtp = Encrypted::build().finish(auth_key());

        assert_eq!(mtp.get_seq_no(true), 1);
        assert_eq!(mtp.get_seq_no(false), 2);
        assert_eq!(mtp.get_seq_no(false), 2);
        assert_eq!(mtp.get_seq_no(true), 3);
        assert_eq!(mtp.get_seq_no(true), 5);
        assert_eq!(mtp.get_seq_no(false), 6);
    }

    #[test]
    fn large_payload_panics() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = new_buffer();

        let huge = vec![0; 2 * 1024 * 1024];
        assert!(std::panic::catch_unwind(move || {
            mtp.push(&mut buffer, &huge);
        })
        .is_err());
    }

    #[test]
    fn compression_thresholds_are_honored() {
        // A large run of zeros compresses well.
        {
            let mut mtp = Encrypted::build()
                .compression_threshold(None)
                .finish(auth_key());
            let mut buffer = new_buffer();
            mtp.push(&mut buffer, &vec![0; 512 * 1024]);
            mtp.finalize_plain(&mut buffer);
            assert!(!buffer[..].windows(4).any(|w| w == GZIP_PACKED_HEADER));
        }
        {
            // Threshold not reached: no compression.
            let mut mtp = Encrypted::build()
                .compression_threshold(Some(768 * 1024))
                .finish(auth_key());
            let mut buffer = new_buffer();
            mtp.push(&mut buffer, &vec![0; 512 * 1024]);
            mtp.finalize_plain(&mut buffer);
            assert!(!buffer[..].windows(4).any(|w| w == GZIP_PACKED_HEADER));
        }
        {
            // Threshold exceeded: compression.
            let mut mtp = Encrypted::build()
                .compression_threshold(Some(256 * 1024))
                .finish(auth_key());
            let mut buffer = new_buffer();
            mtp.push(&mut buffer, &vec![0; 512 * 1024]);
            mtp.finalize_plain(&mut buffer);
            assert!(buffer[..].windows(4).any(|w| w == GZIP_PACKED_HEADER));
        }
    }

    #[test]
    fn finalize_without_messages_produces_nothing() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = new_buffer();
        assert!(mtp.finalize(&mut buffer).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn pending_acks_are_flushed_alone() {
        let mut mtp = Encrypted::build().finish(auth_key());
        mtp.pending_ack.push(123 << 32 | 1);

        let mut buffer = new_buffer();
        let msg_id = mtp.finalize_plain(&mut buffer);
        assert!(msg_id.is_some());
        assert!(!buffer.is_empty());
        assert!(mtp.pending_ack.is_empty());
    }

    #[test]
    fn encrypted_round_trip_is_sealed() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = new_buffer();
        mtp.push(&mut buffer, REQUEST);
        mtp.finalize(&mut buffer);

        // key id (zeros for the all-zero key's id? never) + msg key + body
        assert!(buffer.len() >= 24 + 16);
        // The plaintext must not appear in the sealed envelope.
        assert!(!buffer[..].windows(REQUEST.len()).any(|w| w == REQUEST));
    }

    #[test]
    fn wrong_session_id_is_a_security_error() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(0);

        let mut plaintext = Vec::new();
        0i64.serialize(&mut plaintext);
        (mtp.session_id ^ 1).serialize(&mut plaintext);
        manual_tl::Message {
            msg_id,
            seq_no: 1,
            body: vec![0; 8],
        }
        .serialize(&mut plaintext);

        assert!(matches!(
            mtp.deserialize_plaintext(&plaintext),
            Err(DeserializeError::BadSessionId { .. })
        ));
    }

    #[test]
    fn even_server_msg_id_is_a_security_error() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(0) + 1; // make it even

        let plaintext = make_plaintext(&mtp, msg_id, 1, &vec![0; 8]);
        assert!(matches!(
            mtp.deserialize_plaintext(&plaintext),
            Err(DeserializeError::BadMessageId { .. })
        ));
    }

    #[test]
    fn duplicate_msg_ids_are_dropped() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(0);
        let body = tl::enums::Pong::Pong(tl::types::Pong {
            msg_id: 1,
            ping_id: 2,
        })
        .to_bytes();

        let plaintext = make_plaintext(&mtp, msg_id, 1, &body);
        let first = mtp.deserialize_plaintext(&plaintext).unwrap();
        assert_eq!(first.len(), 1);

        let second = mtp.deserialize_plaintext(&plaintext).unwrap();
        assert!(second.is_empty());
        assert_eq!(mtp.ignore_count, 1);
    }

    #[test]
    fn too_many_ignored_messages_fail_the_connection() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(0);
        let body = tl::enums::Pong::Pong(tl::types::Pong {
            msg_id: 1,
            ping_id: 2,
        })
        .to_bytes();

        let plaintext = make_plaintext(&mtp, msg_id, 1, &body);
        mtp.deserialize_plaintext(&plaintext).unwrap();

        for _ in 0..MAX_CONSECUTIVE_IGNORED - 1 {
            assert!(mtp.deserialize_plaintext(&plaintext).unwrap().is_empty());
        }
        assert!(matches!(
            mtp.deserialize_plaintext(&plaintext),
            Err(DeserializeError::TooManyIgnored { .. })
        ));
    }

    #[test]
    fn stale_msg_ids_are_dropped() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(-(MSG_TOO_OLD_DELTA + 100));
        let body = tl::enums::Pong::Pong(tl::types::Pong {
            msg_id: 1,
            ping_id: 2,
        })
        .to_bytes();

        let plaintext = make_plaintext(&mtp, msg_id, 1, &body);
        assert!(mtp.deserialize_plaintext(&plaintext).unwrap().is_empty());
        assert_eq!(mtp.ignore_count, 1);
    }

    #[test]
    fn bad_server_salt_is_exempt_from_time_checks() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(-(MSG_TOO_OLD_DELTA + 100));
        let body = tl::enums::BadMsgNotification::BadServerSalt(tl::types::BadServerSalt {
            bad_msg_id: 1234,
            bad_msg_seqno: 1,
            error_code: 48,
            new_server_salt: 0x1234_5678,
        })
        .to_bytes();

        let plaintext = make_plaintext(&mtp, msg_id, 1, &body);
        let results = mtp.deserialize_plaintext(&plaintext).unwrap();

        assert_eq!(mtp.salt, 0x1234_5678);
        assert!(matches!(
            results[..],
            [Deserialization::BadMessage(BadMessage { code: 48, .. })]
        ));
    }

    #[test]
    fn bad_msg_notification_corrects_time_offset() {
        let mut mtp = Encrypted::build().finish(auth_key());
        // The notification claims to come 1000 seconds in our future.
        let msg_id = server_msg_id(1000);
        let body = tl::enums::BadMsgNotification::Notification(tl::types::BadMsgNotification {
            bad_msg_id: 1234,
            bad_msg_seqno: 1,
            error_code: 16,
        })
        .to_bytes();

        let plaintext = make_plaintext(&mtp, msg_id, 1, &body);
        let results = mtp.deserialize_plaintext(&plaintext).unwrap();

        assert!(matches!(
            results[..],
            [Deserialization::BadMessage(BadMessage { code: 16, .. })]
        ));
        assert!((999..=1001).contains(&mtp.time_offset));

        // New identifiers must now be generated under the corrected clock.
        let (secs, _) = Encrypted::unix_now();
        assert!(mtp.get_new_msg_id() >> 32 >= secs + 999);
    }

    #[test]
    fn pong_resolves_by_request_msg_id() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(0);
        let body = tl::enums::Pong::Pong(tl::types::Pong {
            msg_id: 0x1122_3344,
            ping_id: 0x1111_2222_3333_4444,
        })
        .to_bytes();

        let plaintext = make_plaintext(&mtp, msg_id, 1, &body);
        let results = mtp.deserialize_plaintext(&plaintext).unwrap();

        match &results[..] {
            [Deserialization::RpcResult(result)] => {
                assert_eq!(result.msg_id, MsgId(0x1122_3344));
                let tl::enums::Pong::Pong(pong) =
                    tl::enums::Pong::from_bytes(&result.body).unwrap();
                assert_eq!(pong.ping_id, 0x1111_2222_3333_4444);
            }
            _ => panic!("expected exactly one rpc result"),
        }
    }

    #[test]
    fn content_messages_get_acked() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(0);
        let body = tl::enums::Pong::Pong(tl::types::Pong {
            msg_id: 1,
            ping_id: 2,
        })
        .to_bytes();

        let plaintext = make_plaintext(&mtp, msg_id, 1, &body);
        mtp.deserialize_plaintext(&plaintext).unwrap();
        assert_eq!(mtp.pending_ack, vec![msg_id]);
    }

    #[test]
    fn reset_regenerates_session_and_keeps_clock() {
        let mut mtp = Encrypted::build().time_offset(42).finish(auth_key());
        let old_session = mtp.session_id;
        mtp.salt = 99;
        mtp.sequence = 10;
        mtp.highest_remote_id = 123;

        mtp.reset();

        assert_ne!(mtp.session_id, old_session);
        assert_eq!(mtp.salt, 0);
        assert_eq!(mtp.sequence, 0);
        assert_eq!(mtp.highest_remote_id, 0);
        assert_eq!(mtp.time_offset, 42);
        assert_eq!(mtp.auth_key(), auth_key());
    }
}
