use super::{
    CloseInfo, Dialer, ReadyState, Transport, TransportError, TransportEvent, TransportEvents,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
};
use url::Url;

enum Outbound {
    Frame(Vec<u8>),
    Close(u16),
}

/// Dials WebSocket connections, one background task per connection
#[derive(Debug, Clone, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        Self
    }
}

impl Dialer for WebSocketDialer {
    type Transport = WebSocketTransport;

    fn dial(&self, uri: &Url) -> (WebSocketTransport, TransportEvents) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));

        tokio::spawn(drive_connection(
            uri.clone(),
            Arc::clone(&ready),
            outbound_rx,
            event_tx,
        ));

        (
            WebSocketTransport {
                outbound: outbound_tx,
                ready,
            },
            event_rx,
        )
    }
}

/// Sending half of a WebSocket connection
///
/// Dropping the handle closes the connection with a normal close frame.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    ready: Arc<AtomicU8>,
}

impl Transport for WebSocketTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.ready.load(Ordering::Acquire))
    }

    fn send(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Outbound::Frame(data))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self, code: u16) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        // A handshake still in flight is abandoned by the task once it sees this
        let _ = self.outbound.send(Outbound::Close(code));
    }
}

async fn drive_connection(
    uri: Url,
    ready: Arc<AtomicU8>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let set_state = |state: ReadyState| ready.store(state as u8, Ordering::Release);

    log::debug!("WS: connecting to {}", uri.host_str().unwrap_or("<no host>"));

    let ws_stream = tokio::select! {
        result = connect_async(uri.as_str()) => match result {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                log::debug!("WS: handshake failed: {}", e);
                set_state(ReadyState::Closed);
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Closed(CloseInfo::default()));
                return;
            }
        },
        _ = wait_for_close_request(&mut outbound) => {
            log::debug!("WS: close requested during handshake");
            set_state(ReadyState::Closed);
            let _ = events.send(TransportEvent::Closed(CloseInfo::default()));
            return;
        }
    };

    set_state(ReadyState::Open);
    let _ = events.send(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();
    let mut outbound_open = true;
    let mut peer_close: Option<CloseInfo> = None;
    let mut errored = false;

    loop {
        tokio::select! {
            command = outbound.recv(), if outbound_open => match command {
                Some(Outbound::Frame(data)) => {
                    if let Err(e) = write.send(Message::Binary(data.into())).await {
                        log::warn!("WS: failed to send frame: {}", e);
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                    }
                }
                Some(Outbound::Close(code)) => {
                    set_state(ReadyState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: String::new().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        log::debug!("WS: failed to send close frame: {}", e);
                    }
                    outbound_open = false;
                }
                None => {
                    // Handle dropped
                    set_state(ReadyState::Closing);
                    let _ = write.close().await;
                    outbound_open = false;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(TransportEvent::Message(data.as_slice().to_vec()));
                }
                Some(Ok(Message::Text(text))) => {
                    let data = text.as_str().as_bytes().to_vec();
                    let _ = events.send(TransportEvent::Message(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    set_state(ReadyState::Closing);
                    log::debug!("WS: peer sent close frame: {:?}", frame);
                    peer_close = Some(CloseInfo {
                        clean: true,
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    });
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    log::debug!("WS: read error: {}", e);
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    errored = true;
                    break;
                }
                None => break,
            }
        }
    }

    set_state(ReadyState::Closed);
    let info = match peer_close {
        Some(info) if !errored => info,
        Some(info) => CloseInfo {
            clean: false,
            ..info
        },
        None => CloseInfo::default(),
    };
    let _ = events.send(TransportEvent::Closed(info));
}

/// Resolves once the handle asks for a close (or is dropped) before the
/// handshake finished. Frames queued meanwhile are rejected by `send`.
async fn wait_for_close_request(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close(_)) | None => return,
            Some(Outbound::Frame(_)) => continue,
        }
    }
}
