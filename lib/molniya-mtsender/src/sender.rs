// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::io;
use std::ops::ControlFlow;

use log::{debug, error, info, trace, warn};
use molniya_crypto::DequeBuffer;
use molniya_mtproto::mtp::{self, Deserialization, Mtp};
use molniya_mtproto::transport::{self, Transport};
use molniya_mtproto::MsgId;
use molniya_session::UpdatesLike;
use molniya_tl_types::{self as tl, Blob, Deserializable, RemoteCall, Serializable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::{sleep, sleep_until, Duration, Instant};

use crate::configuration::Configuration;
use crate::errors::{InvocationError, ReadError, RpcError};
use crate::net::{NetStream, ServerAddr};
use crate::reconnection::{NoReconnect, ReconnectionPolicy};
use crate::update_queue::UpdateQueue;
use crate::utils::generate_random_id;

/// The maximum amount of data to send or receive at once.
///
/// A fixed-size read buffer avoids repeated allocations and trivially
/// caps how much memory invalid data can make us hold. The server
/// closes the connection around one megabyte of payload, so a few
/// extra kilobytes account for the transports' own overhead.
const MAXIMUM_DATA: usize = (1024 * 1024) + (8 * 1024);

/// Leading space reserved in the write buffer so that every layer can
/// prepend its header without moving the payload.
const LEADING_BUFFER_SPACE: usize = mtp::MAX_TRANSPORT_HEADER_LEN
    + mtp::ENCRYPTED_PACKET_HEADER_LEN
    + mtp::PLAINTEXT_HEADER_LEN
    + mtp::MESSAGE_CONTAINER_HEADER_LEN;

/// Every layer that wraps a request (dependency and connection
/// initialisation) adds at most this much on top of the raw body.
const WRAP_OVERHEAD: usize = 512;

/// How often pings are sent to keep the connection alive.
const PING_DELAY: Duration = Duration::from_secs(60);

/// After how many seconds the server should close the connection when
/// it stops receiving our pings.
///
/// With pings every `PING_DELAY` seconds, there is a
/// `NO_PING_DISCONNECT - PING_DELAY` window for a ping to get through
/// before the server hangs up on us.
const NO_PING_DISCONNECT: i32 = 75;

/// Manages enqueuing requests, matching them to their response, and I/O.
pub struct Sender<T: Transport, M: Mtp> {
    stream: NetStream,
    transport: T,
    mtp: M,
    addr: ServerAddr,
    config: Configuration,
    policy: Box<dyn ReconnectionPolicy>,
    requests: Vec<Request>,
    next_ping: Instant,
    updates: UpdateQueue,

    /// Whether the next outgoing request must carry the
    /// `invokeWithLayer(initConnection(…))` wrapping.
    init_pending: bool,

    // Transport-level buffers and positions.
    read_buffer: Vec<u8>,
    read_tail: usize,
    write_buffer: DequeBuffer<u8>,
    write_head: usize,
}

struct Request {
    body: Vec<u8>,
    state: RequestState,
    result: oneshot::Sender<Result<Vec<u8>, InvocationError>>,

    /// Serialize this request wrapped in `invokeAfterMsg` so the server
    /// only processes it once the referenced message has completed.
    after: Option<MsgId>,
}

#[derive(Clone, Copy, Debug)]
struct MsgIdPair {
    msg_id: MsgId,

    /// The identifier the server acknowledges: the container's when the
    /// request travelled in one, the request's own otherwise.
    container_msg_id: MsgId,
}

impl MsgIdPair {
    fn new(msg_id: MsgId) -> Self {
        Self {
            msg_id,
            container_msg_id: msg_id,
        }
    }

    fn matches(&self, msg_id: MsgId) -> bool {
        self.msg_id == msg_id || self.container_msg_id == msg_id
    }
}

enum RequestState {
    /// Not yet on the wire (fresh, or queued again for retransmission).
    NotSerialized,

    /// Held back by a server-requested flood wait; becomes
    /// `NotSerialized` once the deadline passes.
    FloodWait { until: Instant },

    /// Serialized into the write buffer, but not fully written out yet.
    Serialized(MsgIdPair),

    /// Fully written to the network; a response may arrive any time.
    Sent(MsgIdPair),
}

impl<T: Transport, M: Mtp> Sender<T, M> {
    /// Create a new connection using the given transport, protocol
    /// state and server address.
    pub async fn connect(transport: T, mtp: M, addr: ServerAddr) -> Result<Self, io::Error> {
        let stream = NetStream::connect(&addr).await?;
        Ok(Self {
            stream,
            transport,
            mtp,
            addr,
            config: Configuration::default(),
            policy: Box::new(NoReconnect),
            requests: vec![],
            next_ping: Instant::now() + PING_DELAY,
            updates: UpdateQueue::new(),
            init_pending: true,

            read_buffer: vec![0; MAXIMUM_DATA],
            read_tail: 0,
            write_buffer: DequeBuffer::with_capacity(MAXIMUM_DATA, LEADING_BUFFER_SPACE),
            write_head: 0,
        })
    }

    /// Use the given configuration (API identifier, device information,
    /// flood-wait threshold).
    pub fn with_configuration(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    /// Use the given policy for transport-recoverable failures.
    pub fn with_reconnection_policy(mut self, policy: Box<dyn ReconnectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Serializes the request, enqueues it, and steps the connection
    /// until its response arrives.
    pub async fn invoke<R: RemoteCall>(
        &mut self,
        request: &R,
    ) -> Result<R::Return, InvocationError> {
        let rx = self.enqueue_body(request.to_bytes(), None);
        self.step_until_receive(rx)
            .await
            .and_then(|body| R::Return::from_bytes(&body).map_err(Into::into))
    }

    /// Like [`Sender::invoke`], but the server is told to process the
    /// request only after the message identified by `after` completes.
    pub async fn invoke_after<R: RemoteCall>(
        &mut self,
        after: MsgId,
        request: &R,
    ) -> Result<R::Return, InvocationError> {
        let rx = self.enqueue_body(request.to_bytes(), Some(after));
        self.step_until_receive(rx)
            .await
            .and_then(|body| R::Return::from_bytes(&body).map_err(Into::into))
    }

    fn enqueue_body(
        &mut self,
        body: Vec<u8>,
        after: Option<MsgId>,
    ) -> oneshot::Receiver<Result<Vec<u8>, InvocationError>> {
        let (tx, rx) = oneshot::channel();
        assert!(body.len() >= 4);

        if body.len() + WRAP_OVERHEAD > mtp::MAX_PAYLOAD_LEN {
            // The server would close the connection on such a message;
            // fail just this request instead.
            drop(tx.send(Err(InvocationError::PayloadTooLarge { size: body.len() })));
            return rx;
        }

        let req_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        debug!(
            "enqueueing request {} to be serialized",
            tl::name_for_id(req_id)
        );

        self.requests.push(Request {
            body,
            state: RequestState::NotSerialized,
            result: tx,
            after,
        });
        rx
    }

    async fn step_until_receive(
        &mut self,
        mut rx: oneshot::Receiver<Result<Vec<u8>, InvocationError>>,
    ) -> Result<Vec<u8>, InvocationError> {
        loop {
            match rx.try_recv() {
                Ok(x) => break x,
                Err(TryRecvError::Empty) => self.step().await?,
                Err(TryRecvError::Closed) => {
                    panic!("request channel dropped before receiving a result")
                }
            }
        }
    }

    /// Step network events once: writing, reading and timers at the
    /// same time.
    ///
    /// Updates received during the step are queued; drain them with
    /// [`Sender::pop_updates`].
    ///
    /// Errors returned from here have already been through the
    /// reconnection policy and are final: the sender should be dropped.
    pub async fn step(&mut self) -> Result<(), ReadError> {
        self.try_fill_write();
        trace!(
            "stepping with {} bytes pending to be sent",
            self.write_buffer.len() - self.write_head
        );

        let wakeup = self.next_wakeup();
        let (mut reader, mut writer) = self.stream.split();

        let res = tokio::select! {
            n = reader.read(&mut self.read_buffer[self.read_tail..]) => {
                n.map_err(ReadError::Io).and_then(|n| self.on_net_read(n))
            }
            n = writer.write(&self.write_buffer[self.write_head..]), if !self.write_buffer.is_empty() => {
                n.map_err(ReadError::Io).map(|n| self.on_net_write(n))
            }
            _ = sleep_until(wakeup) => {
                self.on_wakeup();
                Ok(())
            }
        };

        match res {
            Ok(()) => Ok(()),
            Err(err) => self.on_error(err).await,
        }
    }

    /// Take every update received so far, in arrival order.
    pub fn pop_updates(&mut self) -> Vec<UpdatesLike> {
        self.updates.drain()
    }

    /// The next instant the sender must act on its own (keepalive ping
    /// or expired flood wait).
    fn next_wakeup(&self) -> Instant {
        self.requests
            .iter()
            .filter_map(|request| match request.state {
                RequestState::FloodWait { until } => Some(until),
                _ => None,
            })
            .fold(self.next_ping, Instant::min)
    }

    /// Fill the write buffer from the request queue, unless a write is
    /// already in progress.
    fn try_fill_write(&mut self) {
        if !self.write_buffer.is_empty() {
            return;
        }

        // Wake requests whose flood wait is over.
        let now = Instant::now();
        for request in self.requests.iter_mut() {
            if let RequestState::FloodWait { until } = request.state {
                if now >= until {
                    debug!("flood wait is over; queueing request again");
                    request.state = RequestState::NotSerialized;
                }
            }
        }

        for i in 0..self.requests.len() {
            if !matches!(self.requests[i].state, RequestState::NotSerialized) {
                continue;
            }

            let include_init = self.init_pending && self.config.api_id != 0;
            let body = self.prepare_body(i, include_init);
            match self.mtp.push(&mut self.write_buffer, &body) {
                Some(msg_id) => {
                    if include_init {
                        self.init_pending = false;
                    }
                    let req_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                    debug!(
                        "serialized request {:x} ({}) with {:?}",
                        req_id,
                        tl::name_for_id(req_id),
                        msg_id
                    );
                    // Only NotSerialized may become Serialized, or a
                    // request could be sent twice and flood the server.
                    self.requests[i].state = RequestState::Serialized(MsgIdPair::new(msg_id));
                }
                None => break,
            }
        }

        if let Some(container_msg_id) = self.mtp.finalize(&mut self.write_buffer) {
            for request in self.requests.iter_mut() {
                if let RequestState::Serialized(pair) = &mut request.state {
                    pair.container_msg_id = container_msg_id;
                }
            }
            self.transport.pack(&mut self.write_buffer);
        }
    }

    /// The request body as it will travel: wrapped in `invokeAfterMsg`
    /// when it depends on another message, and in
    /// `invokeWithLayer(initConnection(…))` when it is the first of the
    /// connection.
    fn prepare_body(&self, index: usize, include_init: bool) -> Vec<u8> {
        let request = &self.requests[index];
        let mut body = request.body.clone();

        if let Some(after) = request.after {
            body = tl::functions::InvokeAfterMsg {
                msg_id: after.value(),
                query: Blob(body),
            }
            .to_bytes();
        }

        if include_init {
            info!("sending initConnection for layer {}", tl::LAYER);
            body = tl::functions::InvokeWithLayer {
                layer: tl::LAYER,
                query: Blob(
                    tl::functions::InitConnection {
                        api_id: self.config.api_id,
                        device_model: self.config.device_model.clone(),
                        system_version: self.config.system_version.clone(),
                        app_version: self.config.app_version.clone(),
                        system_lang_code: self.config.system_lang_code.clone(),
                        lang_pack: String::new(),
                        lang_code: self.config.lang_code.clone(),
                        query: Blob(body),
                    }
                    .to_bytes(),
                ),
            }
            .to_bytes();
        }

        body
    }

    /// Handle `n` more read bytes being available in the read buffer.
    fn on_net_read(&mut self, n: usize) -> Result<(), ReadError> {
        if n == 0 {
            return Err(ReadError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "read 0 bytes",
            )));
        }

        self.read_tail += n;
        trace!("read {} bytes from the network", n);

        let mut next_offset = 0;
        while next_offset != self.read_tail {
            match self
                .transport
                .unpack(&self.read_buffer[next_offset..self.read_tail])
            {
                Ok(offset) => {
                    let results = self.mtp.deserialize(
                        &self.read_buffer[next_offset..][offset.data_start..offset.data_end],
                    )?;
                    self.process_mtp_results(results);
                    next_offset += offset.next_offset;
                }
                Err(transport::Error::MissingBytes { needed }) => {
                    trace!("waiting for {} more bytes", needed);
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.read_buffer.copy_within(next_offset..self.read_tail, 0);
        self.read_tail -= next_offset;

        Ok(())
    }

    /// Handle `n` more bytes of the write buffer having been sent.
    fn on_net_write(&mut self, n: usize) {
        self.write_head += n;
        trace!(
            "written {} bytes to the network ({}/{})",
            n,
            self.write_head,
            self.write_buffer.len()
        );
        assert!(self.write_head <= self.write_buffer.len());
        if self.write_head != self.write_buffer.len() {
            return;
        }

        self.write_buffer.clear();
        self.write_head = 0;
        for request in self.requests.iter_mut() {
            if let RequestState::Serialized(pair) = request.state {
                trace!("sent request with {:?}", pair);
                request.state = RequestState::Sent(pair);
            }
        }
    }

    /// Handle a timer firing: enqueue a keepalive ping if it is due
    /// (flood waits are picked up by the next `try_fill_write`).
    fn on_wakeup(&mut self) {
        if Instant::now() >= self.next_ping {
            let ping_id = generate_random_id();
            debug!("enqueueing keepalive ping {}", ping_id);
            drop(self.enqueue_body(
                tl::functions::PingDelayDisconnect {
                    ping_id,
                    disconnect_delay: NO_PING_DISCONNECT,
                }
                .to_bytes(),
                None,
            ));
            self.next_ping = Instant::now() + PING_DELAY;
        }
    }

    /// Handle a connection-level failure: reconnect when the error and
    /// the policy allow it, otherwise fail every pending request.
    async fn on_error(&mut self, error: ReadError) -> Result<(), ReadError> {
        warn!("connection error: {}", error);

        if error.should_reconnect() && self.try_reconnect().await {
            return Ok(());
        }

        error!(
            "marking all {} request(s) as failed: {}",
            self.requests.len(),
            error
        );
        self.requests
            .drain(..)
            .for_each(|r| drop(r.result.send(Err(InvocationError::from(error.clone())))));
        Err(error)
    }

    /// Re-establish the connection under the configured policy,
    /// resetting all volatile state. Pending requests stay queued and
    /// are re-sent with fresh identifiers, in their original order.
    async fn try_reconnect(&mut self) -> bool {
        let mut attempts = 0;
        loop {
            match self.policy.should_retry(attempts) {
                ControlFlow::Continue(delay) => sleep(delay).await,
                ControlFlow::Break(()) => {
                    if attempts > 0 {
                        warn!("giving up reconnecting after {} attempts", attempts);
                    }
                    return false;
                }
            }

            attempts += 1;
            info!("trying to reconnect (attempt {})", attempts);
            match NetStream::connect(&self.addr).await {
                Ok(stream) => {
                    self.stream = stream;
                    self.transport.reset();
                    self.mtp.reset();
                    self.read_tail = 0;
                    self.write_buffer.clear();
                    self.write_head = 0;
                    self.init_pending = true;
                    self.next_ping = Instant::now() + PING_DELAY;

                    for request in self.requests.iter_mut() {
                        if matches!(
                            request.state,
                            RequestState::Serialized(_) | RequestState::Sent(_)
                        ) {
                            request.state = RequestState::NotSerialized;
                        }
                    }

                    // Anything the server pushed while we were away is
                    // gone; the update machinery must fetch it.
                    self.updates.push(UpdatesLike::Reconnection);
                    info!(
                        "reconnected; {} request(s) will be re-sent",
                        self.requests.len()
                    );
                    return true;
                }
                Err(e) => warn!("reconnect attempt {} failed: {}", attempts, e),
            }
        }
    }

    /// Route the outcome of one decrypted payload.
    fn process_mtp_results(&mut self, results: Vec<Deserialization>) {
        for result in results {
            match result {
                Deserialization::Update(update) => self.process_update(update),
                Deserialization::RpcResult(result) => self.process_result(result),
                Deserialization::RpcError(error) => self.process_error(error),
                Deserialization::BadMessage(bad_msg) => self.process_bad_message(bad_msg),
                Deserialization::Failure(failure) => self.process_deserialize_failure(failure),
            }
        }
    }

    fn process_update(&mut self, update: Vec<u8>) {
        match tl::enums::Updates::from_bytes(&update) {
            Ok(updates) => self.updates.push(UpdatesLike::Updates(updates)),
            // A lost update will eventually surface as a gap and be
            // recovered by getting the difference.
            Err(e) => warn!("server sent updates that failed to be deserialized: {}", e),
        }
    }

    fn process_result(&mut self, result: mtp::RpcResult) {
        match self.take_request(result.msg_id) {
            Some(request) => {
                let body = result.body;
                assert!(body.len() >= 4);
                let res_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                debug!(
                    "got result {:x} ({}) for request {:?}",
                    res_id,
                    tl::name_for_id(res_id),
                    result.msg_id
                );
                drop(request.result.send(Ok(body)));
            }
            None => info!(
                "got rpc result {:?} but no such request is saved",
                result.msg_id
            ),
        }
    }

    fn process_error(&mut self, error: mtp::RpcResultError) {
        let rpc_error = RpcError::from(error.error);

        let index = match self.find_request(error.msg_id) {
            Some(index) => index,
            None => {
                info!(
                    "got rpc error {:?} but no such request is saved",
                    error.msg_id
                );
                return;
            }
        };

        // Short flood waits are handled right here: hold the request
        // back and retransmit it once the wait is over.
        if let Some(seconds) = flood_wait_seconds(&rpc_error, self.config.flood_sleep_threshold) {
            warn!(
                "sleeping on {} for {}s before retrying the request",
                rpc_error.name, seconds
            );
            self.requests[index].state = RequestState::FloodWait {
                until: Instant::now() + Duration::from_secs(seconds as u64),
            };
            return;
        }

        debug!("got rpc error {:?}", rpc_error);
        let request = self.requests.remove(index);
        let caused_by = u32::from_le_bytes(request.body[..4].try_into().unwrap());
        drop(
            request
                .result
                .send(Err(InvocationError::Rpc(rpc_error.with_caused_by(caused_by)))),
        );
    }

    fn process_bad_message(&mut self, bad_msg: mtp::BadMessage) {
        let mut i = 0;
        while i < self.requests.len() {
            let affected = match &self.requests[i].state {
                RequestState::Serialized(pair) | RequestState::Sent(pair) => {
                    pair.matches(bad_msg.msg_id)
                }
                _ => false,
            };
            if !affected {
                i += 1;
                continue;
            }

            if bad_msg.retryable() {
                // The protocol state that made the message bad (clock,
                // sequence or salt) has been corrected by now.
                info!("{}; re-sending affected request", bad_msg.description());
                self.requests[i].state = RequestState::NotSerialized;
                i += 1;
            } else {
                error!("{}; cannot retry affected request", bad_msg.description());
                let request = self.requests.remove(i);
                drop(request.result.send(Err(InvocationError::Dropped)));
            }
        }
    }

    fn process_deserialize_failure(&mut self, failure: mtp::DeserializationFailure) {
        match self.take_request(failure.msg_id) {
            Some(request) => {
                debug!("got deserialization failure {:?}", failure.error);
                drop(request.result.send(Err(failure.error.into())));
            }
            None => info!(
                "got deserialization failure {:?} but no such request is saved",
                failure.error
            ),
        }
    }

    fn find_request(&self, msg_id: MsgId) -> Option<usize> {
        self.requests
            .iter()
            .position(|request| match &request.state {
                RequestState::Serialized(pair) | RequestState::Sent(pair) => {
                    pair.msg_id == msg_id
                }
                _ => false,
            })
    }

    fn take_request(&mut self, msg_id: MsgId) -> Option<Request> {
        // Removal by shifting keeps the remaining requests in their
        // submission order, which retransmission relies on.
        self.find_request(msg_id).map(|i| self.requests.remove(i))
    }
}

/// The seconds to sleep before automatically retrying, when the error
/// is a flood wait at or below the configured threshold.
fn flood_wait_seconds(error: &RpcError, threshold: u32) -> Option<u32> {
    if !(error.is("FLOOD_WAIT") || error.is("FLOOD_TEST_PHONE_WAIT")) {
        return None;
    }
    match error.value {
        Some(seconds) if threshold > 0 && seconds <= threshold => Some(seconds),
        _ => None,
    }
}

impl<T: Transport> Sender<T, mtp::Encrypted> {
    /// The authorization key in use, for persisting.
    pub fn auth_key(&self) -> [u8; 256] {
        self.mtp.auth_key()
    }
}

/// Connect an encrypted sender reusing a previously-created
/// authorization key.
pub async fn connect_with_auth<T: Transport>(
    transport: T,
    addr: ServerAddr,
    auth_key: [u8; 256],
) -> Result<Sender<T, mtp::Encrypted>, io::Error> {
    Sender::connect(transport, mtp::Encrypted::build().finish(auth_key), addr).await
}
