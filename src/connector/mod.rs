//! Stream connector: one call leg over one transport connection.
//!
//! Lifecycle is `Idle → Connecting → Open → Closing → Closed`. Payloads
//! pushed before the connection is open, or while older payloads are still
//! queued, go to the [`OutboundBuffer`] and are drained every 100 ms once the
//! connection is open, so admission order is transmission order.
//!
//! The connector is driven from a single task: callers push payloads with
//! the synchronous `send_*` methods and poll [`StreamConnector::next_event`]
//! (or [`StreamConnector::run`]) to process transport events and timers.

pub mod buffer;

use crate::error::{ConnectorError, Result};
use crate::transport::{
    CloseInfo, Dialer, ReadyState, Transport, TransportEvent, TransportEvents, WebSocketDialer,
    NORMAL_CLOSURE,
};
use aigent_protocol::{CallMetadata, MessageType, FLUSH_PAYLOAD};
use buffer::{OutboundBuffer, OverflowPolicy, Pending, DEFAULT_BUFFER_CAPACITY};
use secrecy::{ExposeSecret, SecretString};
use std::future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use url::Url;

/// Query parameter carrying the bearer token
pub const TOKEN_QUERY_PARAM: &str = "aigent-api-token";

/// Period of the buffer drain timer
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Delay before `close()` is retried while the handshake is still running
pub const CLOSE_RETRY_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_MAX_CLOSE_RETRIES: u32 = 30;

/// Logs at info level for verbose connectors, debug otherwise
macro_rules! note {
    ($connector:expr, $($arg:tt)+) => {
        if $connector.options.verbose {
            log::info!($($arg)+)
        } else {
            log::debug!($($arg)+)
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    pub verbose: bool,
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Close attempts made while the handshake is pending before giving up
    pub max_close_retries: u32,
    /// Force the connection down this long after `close()` if the peer
    /// has not closed it. `None` waits for the peer indefinitely.
    pub close_linger: Option<Duration>,
    /// Send an immediate flush under the voice code (2), as older cluster
    /// receivers expect. Buffered flushes always use the flush code.
    pub legacy_flush_code: bool,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            max_close_retries: DEFAULT_MAX_CLOSE_RETRIES,
            close_linger: None,
            legacy_flush_code: false,
        }
    }
}

/// Outcome of pushing a payload into the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Handed to the transport right away
    Sent,
    /// Queued behind the connection or older payloads
    Buffered,
    /// Not accepted: the buffer was full or the stream is closed
    Dropped,
}

pub struct StreamConnector<D: Dialer = WebSocketDialer> {
    endpoint: Url,
    metadata: CallMetadata,
    metadata_payload: Vec<u8>,
    options: ConnectorOptions,
    dialer: D,
    state: ConnectionState,
    transport: Option<D::Transport>,
    events: Option<TransportEvents>,
    buffer: OutboundBuffer,
    metadata_sent: bool,
    flush_admitted: bool,
    drain_timer: Option<Interval>,
    close_retry: Option<Pin<Box<Sleep>>>,
    close_retries: u32,
    linger: Option<Pin<Box<Sleep>>>,
    dropped: u64,
}

impl StreamConnector<WebSocketDialer> {
    pub fn new(url: &str, metadata: CallMetadata, verbose: bool) -> Result<Self> {
        let options = ConnectorOptions {
            verbose,
            ..ConnectorOptions::default()
        };
        Self::with_options(url, metadata, options)
    }

    pub fn with_options(
        url: &str,
        metadata: CallMetadata,
        options: ConnectorOptions,
    ) -> Result<Self> {
        Self::with_dialer(url, metadata, options, WebSocketDialer::new())
    }
}

impl<D: Dialer> StreamConnector<D> {
    pub fn with_dialer(
        url: &str,
        metadata: CallMetadata,
        options: ConnectorOptions,
        dialer: D,
    ) -> Result<Self> {
        let endpoint = Url::parse(url)?;
        // Serialized once; the same bytes go out as the metadata frame
        let metadata_payload = metadata.to_payload()?;
        let buffer = OutboundBuffer::new(options.buffer_capacity, options.overflow_policy);

        Ok(Self {
            endpoint,
            metadata,
            metadata_payload,
            options,
            dialer,
            state: ConnectionState::Idle,
            transport: None,
            events: None,
            buffer,
            metadata_sent: false,
            flush_admitted: false,
            drain_timer: None,
            close_retry: None,
            close_retries: 0,
            linger: None,
            dropped: 0,
        })
    }

    /// Endpoint with the bearer token attached as a query credential
    pub fn connection_uri(&self, token: &SecretString) -> Url {
        let mut uri = self.endpoint.clone();
        uri.query_pairs_mut()
            .append_pair(TOKEN_QUERY_PARAM, token.expose_secret());
        uri
    }

    /// Open the stream. The handshake completes later, as an `Opened` event.
    pub fn start(&mut self, token: &SecretString) -> Result<()> {
        if self.state != ConnectionState::Idle {
            return Err(ConnectorError::AlreadyStarted(self.state));
        }

        let uri = self.connection_uri(token);
        let (transport, events) = self.dialer.dial(&uri);
        self.transport = Some(transport);
        self.events = Some(events);
        self.state = ConnectionState::Connecting;

        note!(
            self,
            "📡 Connector: connecting {:?} stream: call id: {}",
            self.metadata.voice.channel,
            self.metadata.voice.client_call_id
        );
        Ok(())
    }

    /// Push one audio chunk
    pub fn send_voice(&mut self, payload: impl Into<Vec<u8>>) -> Admission {
        self.admit(MessageType::Voice, payload.into(), MessageType::Voice)
    }

    /// Push the end-of-stream marker. Only the first accepted flush counts.
    pub fn send_flush(&mut self) -> Admission {
        if self.flush_admitted {
            log::debug!("Connector: flush already accepted, ignoring");
            return Admission::Dropped;
        }

        note!(self, "Connector: send flush");
        let immediate = if self.options.legacy_flush_code {
            MessageType::Voice
        } else {
            MessageType::Flush
        };
        let admission = self.admit(MessageType::Flush, FLUSH_PAYLOAD.to_vec(), immediate);
        self.flush_admitted = admission != Admission::Dropped;
        admission
    }

    fn admit(
        &mut self,
        message_type: MessageType,
        payload: Vec<u8>,
        immediate_type: MessageType,
    ) -> Admission {
        if self.state == ConnectionState::Closed {
            log::debug!("Connector: stream closed, dropping {:?} message", message_type);
            self.dropped += 1;
            return Admission::Dropped;
        }

        // Metadata goes first and a new payload never overtakes queued ones
        if !self.is_connected() || !self.metadata_sent || !self.buffer.is_empty() {
            return self.enqueue(message_type, payload);
        }

        if self.send_code(immediate_type, &payload) {
            Admission::Sent
        } else {
            self.enqueue(message_type, payload)
        }
    }

    fn enqueue(&mut self, message_type: MessageType, payload: Vec<u8>) -> Admission {
        let Some(dropped) = self.buffer.push(Pending {
            message_type,
            payload,
        }) else {
            return Admission::Buffered;
        };

        self.dropped += 1;
        log::warn!(
            "Connector: outbound buffer full ({} messages), dropping {:?} message ({} bytes)",
            self.buffer.capacity(),
            dropped.message_type,
            dropped.payload.len()
        );
        match self.options.overflow_policy {
            OverflowPolicy::DropOldest => Admission::Buffered,
            OverflowPolicy::DropNewest => Admission::Dropped,
        }
    }

    /// Encode and transmit one message; `false` if it was not sent
    ///
    /// Does not buffer. A metadata message is only ever sent once per
    /// connection; later ones are suppressed.
    pub fn send_code(&mut self, message_type: MessageType, payload: &[u8]) -> bool {
        if !self.is_connected() {
            note!(self, "Connector: unable to send data via socket.");
            return false;
        }

        if message_type == MessageType::Metadata && self.metadata_sent {
            return false;
        }

        let Some(transport) = self.transport.as_mut() else {
            return false;
        };

        match transport.send(message_type.encode(payload)) {
            Ok(()) => {
                if message_type == MessageType::Metadata {
                    self.metadata_sent = true;
                }
                true
            }
            Err(e) => {
                note!(self, "Connector: send failed: {}", e);
                false
            }
        }
    }

    /// Queued messages or metadata still waiting for the transport
    fn has_unsent(&self) -> bool {
        !self.metadata_sent || !self.buffer.is_empty()
    }

    fn send_metadata(&mut self) -> bool {
        let payload = self.metadata_payload.clone();
        self.send_code(MessageType::Metadata, &payload)
    }

    /// Transmit queued messages in order until the queue is empty or a send
    /// fails. Returns the number of queued messages sent.
    ///
    /// Metadata that has not gone out yet is sent before anything else.
    pub fn drain_buffer(&mut self) -> usize {
        if !self.metadata_sent && !self.send_metadata() {
            return 0;
        }

        let mut sent = 0;
        while let Some(pending) = self.buffer.pop_front() {
            if !self.send_code(pending.message_type, &pending.payload) {
                self.buffer.restore_front(pending);
                break;
            }
            sent += 1;
        }
        sent
    }

    /// Graceful shutdown
    ///
    /// While the handshake is still running the call is retried after one
    /// second. Once open, leftover data gets one drain attempt and the
    /// connector then waits for the transport to close.
    pub fn close(&mut self) {
        match self.state {
            ConnectionState::Idle => {
                note!(self, "Connector: closing a stream that was never started");
                self.teardown();
            }
            ConnectionState::Connecting => self.schedule_close_retry(),
            ConnectionState::Open => {
                self.drain_timer = None;
                if self.has_unsent() {
                    note!(
                        self,
                        "Connector: closing connection. Transmitting leftover data in buffer."
                    );
                    self.drain_buffer();
                }
                self.state = ConnectionState::Closing;
                if let Some(linger) = self.options.close_linger {
                    self.linger = Some(Box::pin(time::sleep(linger)));
                }
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }

    fn schedule_close_retry(&mut self) {
        if self.close_retry.is_some() {
            return;
        }

        if self.close_retries >= self.options.max_close_retries {
            log::warn!(
                "Connector: still connecting after {} close attempts, giving up on call {}",
                self.close_retries,
                self.metadata.voice.client_call_id
            );
            self.teardown();
            return;
        }

        note!(
            self,
            "Connector: connection is connecting. Wait 1 second and try again to send all the data."
        );
        self.close_retries += 1;
        self.close_retry = Some(Box::pin(time::sleep(CLOSE_RETRY_DELAY)));
    }

    /// Apply one transport event to the state machine
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Message(data) => {
                log::info!(
                    "Connector: msg from cluster: {}",
                    String::from_utf8_lossy(&data)
                );
            }
            TransportEvent::Closed(info) => {
                if info.clean {
                    note!(self, "Connector: connection closed by peer.");
                } else {
                    note!(self, "Connector: connection closed. {:?}", info);
                }
                self.teardown();
            }
            TransportEvent::Error(e) => {
                // The transport follows up with a Closed event if this was fatal
                note!(self, "Connector: error: {}", e);
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            log::debug!("Connector: ignoring open event in state {:?}", self.state);
            return;
        }

        self.state = ConnectionState::Open;
        note!(
            self,
            "✅ Connector: opened stream: call id: {}",
            self.metadata.voice.client_call_id
        );

        self.send_metadata();

        let mut timer = time::interval_at(Instant::now() + DRAIN_INTERVAL, DRAIN_INTERVAL);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.drain_timer = Some(timer);
    }

    fn on_drain_tick(&mut self) {
        if self.state == ConnectionState::Open && self.has_unsent() {
            let sent = self.drain_buffer();
            log::debug!(
                "Connector: drained {} messages, {} still buffered",
                sent,
                self.buffer.len()
            );
        }
    }

    fn on_close_retry(&mut self) {
        self.close_retry = None;
        self.close();
    }

    fn on_linger_expired(&mut self) {
        log::warn!(
            "Connector: peer did not close call {} within {:?}, closing",
            self.metadata.voice.client_call_id,
            self.options.close_linger.unwrap_or_default()
        );
        self.teardown();
    }

    /// Release everything tied to the connection. Runs once.
    fn teardown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.drain_timer = None;
        self.close_retry = None;
        self.linger = None;
        if let Some(mut transport) = self.transport.take() {
            transport.close(NORMAL_CLOSURE);
        }
        self.events = None;

        if !self.buffer.is_empty() {
            log::warn!(
                "Connector: discarding {} unsent messages for call {}",
                self.buffer.len(),
                self.metadata.voice.client_call_id
            );
            self.buffer.clear();
        }

        self.state = ConnectionState::Closed;
    }

    /// Wait for and handle the next transport event or timer.
    ///
    /// Returns `false` when there is nothing left to drive: the stream is
    /// closed or was never started.
    pub async fn next_event(&mut self) -> bool {
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Closed) {
            return false;
        }

        tokio::select! {
            biased;

            event = recv_event(&mut self.events) => {
                // A transport that vanished without a close event is closed
                let event = event.unwrap_or_else(|| TransportEvent::Closed(CloseInfo::default()));
                self.handle_event(event);
            }
            _ = fire(&mut self.close_retry) => self.on_close_retry(),
            _ = tick(&mut self.drain_timer) => self.on_drain_tick(),
            _ = fire(&mut self.linger) => self.on_linger_expired(),
        }

        self.state != ConnectionState::Closed
    }

    /// Drive the connector until it is closed
    pub async fn run(&mut self) {
        while self.next_event().await {}
    }

    /// Open and able to send: `Open` or `Closing` with an open transport
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Open | ConnectionState::Closing
        ) && self
            .transport
            .as_ref()
            .is_some_and(|t| t.ready_state() == ReadyState::Open)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_metadata_sent(&self) -> bool {
        self.metadata_sent
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Payloads given up because of overflow or a closed stream
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    pub fn close_retries(&self) -> u32 {
        self.close_retries
    }

    pub fn is_close_retry_pending(&self) -> bool {
        self.close_retry.is_some()
    }

    pub fn is_draining(&self) -> bool {
        self.drain_timer.is_some()
    }
}

async fn recv_event(events: &mut Option<TransportEvents>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => future::pending().await,
    }
}

async fn fire(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
